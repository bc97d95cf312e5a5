//! Content-addressed geometry layout interning

use super::codec::{self, GeometryLayoutDescriptor};
use crate::backend::types::*;
use crate::error::LayoutError;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_CACHE_TAG: AtomicU32 = AtomicU32::new(0);

/// Id of an interned layout.
///
/// Indices are dense and never reused within one cache. The cache tag is
/// unique per process, so ids minted by different caches never compare
/// equal even when their indices match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutId {
    cache: u32,
    index: u32,
}

impl LayoutId {
    /// Position in the owning cache, in interning order
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn cache_tag(&self) -> u32 {
        self.cache
    }
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layout#{}.{}", self.cache, self.index)
    }
}

/// An interned, canonical geometry layout.
///
/// Only the cache constructs these, and nothing mutates one after it is
/// shared, so two `Arc`s with the same id always describe the same layout.
#[derive(Debug, PartialEq, Eq)]
pub struct GeometryLayout {
    id: LayoutId,
    key: String,
    descriptor: GeometryLayoutDescriptor,
}

impl GeometryLayout {
    pub fn id(&self) -> LayoutId {
        self.id
    }

    /// Hex key; stable across runs for the same format table
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn buffers(&self) -> &[VertexBufferLayout] {
        &self.descriptor.buffers
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.descriptor.topology
    }

    pub fn strip_index_format(&self) -> Option<IndexFormat> {
        self.descriptor.strip_index_format
    }

    pub fn descriptor(&self) -> &GeometryLayoutDescriptor {
        &self.descriptor
    }

    /// Find the attribute bound to a shader location
    pub fn attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.descriptor
            .buffers
            .iter()
            .flat_map(|b| b.attributes.iter())
            .find(|a| a.location == location)
    }
}

#[derive(Default)]
struct Interned {
    by_key: FxHashMap<String, Arc<GeometryLayout>>,
    by_id: Vec<Arc<GeometryLayout>>,
}

/// Append-only intern table for geometry layouts.
///
/// Structurally equal layouts map to the same shared instance and id.
/// Lookups take a read lock; only the first sighting of a new shape takes
/// the write lock.
pub struct GeometryLayoutCache {
    tag: u32,
    interned: RwLock<Interned>,
}

impl Default for GeometryLayoutCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryLayoutCache {
    pub fn new() -> Self {
        Self {
            tag: NEXT_CACHE_TAG.fetch_add(1, Ordering::Relaxed),
            interned: RwLock::default(),
        }
    }

    /// Tag stamped into every [`LayoutId`] this cache hands out
    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn create_layout(
        &self,
        buffers: &[VertexBufferLayout],
        topology: PrimitiveTopology,
        strip_index_format: Option<IndexFormat>,
    ) -> Result<Arc<GeometryLayout>, LayoutError> {
        self.create_layout_from(&GeometryLayoutDescriptor {
            buffers: buffers.to_vec(),
            topology,
            strip_index_format,
        })
    }

    pub fn create_layout_from(
        &self,
        descriptor: &GeometryLayoutDescriptor,
    ) -> Result<Arc<GeometryLayout>, LayoutError> {
        let canonical = codec::canonicalize(descriptor)?;
        let key = codec::to_hex(&codec::encode_canonical(&canonical)?);
        self.intern(key, canonical)
    }

    /// Look up or rebuild a layout from its hex key
    pub fn deserialize_layout(&self, key: &str) -> Result<Arc<GeometryLayout>, LayoutError> {
        if let Some(layout) = self.interned.read().by_key.get(key) {
            return Ok(Arc::clone(layout));
        }
        let decoded = codec::decode(&codec::from_hex(key)?)?;
        self.create_layout_from(&decoded)
    }

    /// `None` for unknown indices and for ids minted by another cache
    pub fn get_layout(&self, id: LayoutId) -> Option<Arc<GeometryLayout>> {
        if id.cache != self.tag {
            return None;
        }
        self.interned.read().by_id.get(id.index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.interned.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn intern(
        &self,
        key: String,
        canonical: GeometryLayoutDescriptor,
    ) -> Result<Arc<GeometryLayout>, LayoutError> {
        if let Some(layout) = self.interned.read().by_key.get(&key) {
            return Ok(Arc::clone(layout));
        }

        let mut interned = self.interned.write();
        // Another thread may have interned the same key between the locks
        if let Some(layout) = interned.by_key.get(&key) {
            return Ok(Arc::clone(layout));
        }

        let index = u32::try_from(interned.by_id.len()).map_err(|_| LayoutError::IdSpaceExhausted)?;
        let id = LayoutId {
            cache: self.tag,
            index,
        };
        log::debug!("Interned {id} ({} buffers): {key}", canonical.buffers.len());

        let layout = Arc::new(GeometryLayout {
            id,
            key: key.clone(),
            descriptor: canonical,
        });
        interned.by_id.push(Arc::clone(&layout));
        interned.by_key.insert(key, Arc::clone(&layout));
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_normal(reversed: bool) -> Vec<VertexBufferLayout> {
        let mut attributes = vec![
            VertexAttribute::new(0, VertexFormat::Float32x3, 0),
            VertexAttribute::new(1, VertexFormat::Float32x3, 12),
        ];
        if reversed {
            attributes.reverse();
        }
        vec![VertexBufferLayout {
            array_stride: 24,
            step_mode: VertexStepMode::Vertex,
            attributes,
        }]
    }

    #[test]
    fn test_equivalent_layouts_share_id() {
        let cache = GeometryLayoutCache::new();
        let a = cache
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleList, None)
            .unwrap();
        let b = cache
            .create_layout(&position_normal(true), PrimitiveTopology::TriangleList, None)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), b.id());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let cache = GeometryLayoutCache::new();
        let list = cache
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleList, None)
            .unwrap();
        let strip = cache
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleStrip, None)
            .unwrap();
        let lines = cache
            .create_layout(&position_normal(false), PrimitiveTopology::LineList, None)
            .unwrap();
        assert_eq!(list.id().index(), 0);
        assert_eq!(strip.id().index(), 1);
        assert_eq!(lines.id().index(), 2);
        assert_eq!(cache.get_layout(strip.id()).unwrap().key(), strip.key());
    }

    #[test]
    fn test_deserialize_returns_interned_instance() {
        let cache = GeometryLayoutCache::new();
        let layout = cache
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleList, None)
            .unwrap();
        let restored = cache.deserialize_layout(layout.key()).unwrap();
        assert!(Arc::ptr_eq(&layout, &restored));

        let other = GeometryLayoutCache::new();
        let rebuilt = other.deserialize_layout(layout.key()).unwrap();
        assert_eq!(rebuilt.key(), layout.key());
        assert_eq!(rebuilt.buffers(), layout.buffers());
    }

    #[test]
    fn test_invalid_input_does_not_intern() {
        let cache = GeometryLayoutCache::new();
        assert!(cache.deserialize_layout("zz").is_err());
        let overlapping = vec![VertexBufferLayout {
            array_stride: 16,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute::new(0, VertexFormat::Float32x4, 0),
                VertexAttribute::new(1, VertexFormat::Float32, 4),
            ],
        }];
        assert!(cache
            .create_layout(&overlapping, PrimitiveTopology::TriangleList, None)
            .is_err());
        assert!(cache.is_empty());
        let never_interned = LayoutId {
            cache: cache.tag(),
            index: 0,
        };
        assert!(cache.get_layout(never_interned).is_none());
    }

    #[test]
    fn test_ids_are_scoped_to_their_cache() {
        let first = GeometryLayoutCache::new();
        let second = GeometryLayoutCache::new();
        assert_ne!(first.tag(), second.tag());

        let a = first
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleList, None)
            .unwrap();
        let b = second
            .create_layout(&position_normal(false), PrimitiveTopology::TriangleList, None)
            .unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.id().index(), b.id().index());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id().to_string(), b.id().to_string());

        assert!(second.get_layout(a.id()).is_none());
        assert!(first.get_layout(b.id()).is_none());
        assert!(Arc::ptr_eq(&first.get_layout(a.id()).unwrap(), &a));
    }

    #[test]
    fn test_concurrent_interning_yields_one_entry() {
        let cache = Arc::new(GeometryLayoutCache::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .create_layout(&position_normal(i % 2 == 0), PrimitiveTopology::TriangleList, None)
                        .unwrap()
                        .id()
                })
            })
            .collect();
        let ids: Vec<LayoutId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(cache.len(), 1);
    }
}
