//! GPU geometry bound to an interned layout

use crate::backend::*;
use crate::error::LayoutError;
use crate::layout::{codec, GeometryLayout, GeometryLayoutCache};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_GEOMETRY_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a `RenderGeometry`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(u64);

impl GeometryId {
    fn next() -> Self {
        Self(NEXT_GEOMETRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
}

impl VertexBufferBinding {
    pub fn new(buffer: BufferHandle) -> Self {
        Self { buffer, offset: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub format: IndexFormat,
}

/// Drawable geometry: vertex/index bindings plus a shared, interned layout.
///
/// Vertex bindings are stored in canonical buffer order, so slot `i` always
/// matches `layout().buffers()[i]`.
#[derive(Debug)]
pub struct RenderGeometry {
    id: GeometryId,
    draw_count: u32,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
    layout: Arc<GeometryLayout>,
    skin: Option<BindGroupHandle>,
}

impl RenderGeometry {
    pub fn builder(topology: PrimitiveTopology, draw_count: u32) -> RenderGeometryBuilder {
        RenderGeometryBuilder {
            topology,
            draw_count,
            strip_index_format: None,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            skin: None,
        }
    }

    pub fn id(&self) -> GeometryId {
        self.id
    }

    /// Index count when indexed, vertex count otherwise
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    pub fn vertex_buffers(&self) -> &[VertexBufferBinding] {
        &self.vertex_buffers
    }

    pub fn index_buffer(&self) -> Option<&IndexBufferBinding> {
        self.index_buffer.as_ref()
    }

    pub fn layout(&self) -> &Arc<GeometryLayout> {
        &self.layout
    }

    /// Joint matrix bind group for skinned geometry
    pub fn skin(&self) -> Option<BindGroupHandle> {
        self.skin
    }

    pub fn is_skinned(&self) -> bool {
        self.skin.is_some()
    }

    /// Bind vertex/index buffers and the skin group, then issue one draw
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, instances: Range<u32>) {
        for (slot, binding) in self.vertex_buffers.iter().enumerate() {
            backend.set_vertex_buffer(slot as u32, binding.buffer, binding.offset);
        }
        if let Some(skin) = self.skin {
            backend.set_bind_group(3, skin);
        }
        match &self.index_buffer {
            Some(index) => {
                backend.set_index_buffer(index.buffer, index.offset, index.format);
                backend.draw_indexed(0..self.draw_count, 0, instances);
            }
            None => backend.draw(0..self.draw_count, instances),
        }
    }
}

pub struct RenderGeometryBuilder {
    topology: PrimitiveTopology,
    draw_count: u32,
    strip_index_format: Option<IndexFormat>,
    vertex_buffers: Vec<(VertexBufferLayout, VertexBufferBinding)>,
    index_buffer: Option<IndexBufferBinding>,
    skin: Option<BindGroupHandle>,
}

impl RenderGeometryBuilder {
    pub fn vertex_buffer(mut self, layout: VertexBufferLayout, binding: VertexBufferBinding) -> Self {
        self.vertex_buffers.push((layout, binding));
        self
    }

    pub fn index_buffer(mut self, binding: IndexBufferBinding) -> Self {
        if self.topology.is_strip() {
            self.strip_index_format = Some(binding.format);
        }
        self.index_buffer = Some(binding);
        self
    }

    pub fn skin(mut self, bind_group: BindGroupHandle) -> Self {
        self.skin = Some(bind_group);
        self
    }

    /// Canonicalize the vertex buffers, intern the layout and remap bindings
    pub fn build(self, cache: &GeometryLayoutCache) -> Result<RenderGeometry, LayoutError> {
        let layouts: Vec<VertexBufferLayout> =
            self.vertex_buffers.iter().map(|(l, _)| l.clone()).collect();
        let canonical = codec::canonicalize_buffers(&layouts)?;

        let vertex_buffers = canonical
            .iter()
            .map(|c| {
                let binding = self.vertex_buffers[c.source].1;
                VertexBufferBinding {
                    buffer: binding.buffer,
                    offset: binding.offset + c.base_offset,
                }
            })
            .collect();

        let canonical_layouts: Vec<VertexBufferLayout> =
            canonical.into_iter().map(|c| c.layout).collect();
        let layout = cache.create_layout(&canonical_layouts, self.topology, self.strip_index_format)?;

        Ok(RenderGeometry {
            id: GeometryId::next(),
            draw_count: self.draw_count,
            vertex_buffers,
            index_buffer: self.index_buffer,
            layout,
            skin: self.skin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_follow_canonical_order() {
        let cache = GeometryLayoutCache::new();
        let mut backend = RecordingBackend::new(64, 64);
        let desc = BufferDescriptor {
            label: None,
            size: 1024,
            usage: BufferUsage::VERTEX,
            mapped_at_creation: false,
        };
        let uvs = backend.create_buffer(&desc).unwrap();
        let packed = backend.create_buffer(&desc).unwrap();

        // Positions then normals packed back to back in one allocation
        let planar = VertexBufferLayout {
            array_stride: 12,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute::new(1, VertexFormat::Float32x3, 36),
                VertexAttribute::new(0, VertexFormat::Float32x3, 0),
            ],
        };
        let uv_layout = VertexBufferLayout {
            array_stride: 8,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute::new(2, VertexFormat::Float32x2, 0)],
        };

        let geometry = RenderGeometry::builder(PrimitiveTopology::TriangleList, 3)
            .vertex_buffer(uv_layout, VertexBufferBinding::new(uvs))
            .vertex_buffer(
                planar,
                VertexBufferBinding {
                    buffer: packed,
                    offset: 16,
                },
            )
            .build(&cache)
            .unwrap();

        let bindings = geometry.vertex_buffers();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0], VertexBufferBinding { buffer: packed, offset: 16 });
        assert_eq!(bindings[1], VertexBufferBinding { buffer: packed, offset: 52 });
        assert_eq!(bindings[2], VertexBufferBinding { buffer: uvs, offset: 0 });
        assert_eq!(geometry.layout().buffers().len(), 3);
        assert_eq!(geometry.layout().buffers()[1].attributes[0].location, 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let cache = GeometryLayoutCache::new();
        let build = || {
            RenderGeometry::builder(PrimitiveTopology::TriangleList, 3)
                .vertex_buffer(Vertex::layout(), VertexBufferBinding::new(BufferHandle(0)))
                .build(&cache)
                .unwrap()
        };
        let a = build();
        let b = build();
        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(a.layout(), b.layout()));
    }

    #[test]
    fn test_strip_takes_index_format() {
        let cache = GeometryLayoutCache::new();
        let geometry = RenderGeometry::builder(PrimitiveTopology::TriangleStrip, 4)
            .vertex_buffer(Vertex::layout(), VertexBufferBinding::new(BufferHandle(0)))
            .index_buffer(IndexBufferBinding {
                buffer: BufferHandle(1),
                offset: 0,
                format: IndexFormat::Uint16,
            })
            .build(&cache)
            .unwrap();
        assert_eq!(geometry.layout().strip_index_format(), Some(IndexFormat::Uint16));
    }
}
