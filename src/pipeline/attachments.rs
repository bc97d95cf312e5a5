//! Size-dependent frame targets
//!
//! Everything that depends on the render target size (G-buffer, light
//! accumulation, SSAO and bloom targets, and every bind group that reads
//! them) is created through a [`ResourceScope`]. A scope releases what it
//! created unless it is committed, so a failed rebuild leaves the previous
//! [`FrameTargets`] untouched.

use super::debug_overlay::DebugBindings;
use super::postprocess::BloomBindings;
use super::ssao_pass::SsaoBindings;
use super::*;

/// A render target texture and its default view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// Handles created inside a committed scope
#[derive(Debug, Default)]
pub struct OwnedResources {
    textures: Vec<TextureHandle>,
    views: Vec<TextureViewHandle>,
    bind_groups: Vec<BindGroupHandle>,
}

impl OwnedResources {
    pub fn release(self, backend: &mut dyn GraphicsBackend) {
        for bind_group in self.bind_groups {
            backend.destroy_bind_group(bind_group);
        }
        for view in self.views {
            backend.destroy_texture_view(view);
        }
        for texture in self.textures {
            backend.destroy_texture(texture);
        }
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.views.is_empty() && self.bind_groups.is_empty()
    }
}

/// Tracks resources created during a rebuild; drops release them unless
/// [`commit`](ResourceScope::commit) was called.
pub struct ResourceScope<'a> {
    backend: &'a mut dyn GraphicsBackend,
    owned: OwnedResources,
}

impl<'a> ResourceScope<'a> {
    pub fn new(backend: &'a mut dyn GraphicsBackend) -> Self {
        Self {
            backend,
            owned: OwnedResources::default(),
        }
    }

    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        &mut *self.backend
    }

    pub fn texture(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> BackendResult<Attachment> {
        let texture = self.backend.create_texture(&TextureDescriptor {
            label: Some(label.into()),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ..Default::default()
        })?;
        self.owned.textures.push(texture);
        let view = self.backend.create_texture_view(texture)?;
        self.owned.views.push(view);
        Ok(Attachment {
            texture,
            view,
            format,
            width,
            height,
        })
    }

    pub fn bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let bind_group = self.backend.create_bind_group(layout, entries)?;
        self.owned.bind_groups.push(bind_group);
        Ok(bind_group)
    }

    pub fn commit(mut self) -> OwnedResources {
        std::mem::take(&mut self.owned)
    }
}

impl Drop for ResourceScope<'_> {
    fn drop(&mut self) {
        let owned = std::mem::take(&mut self.owned);
        if !owned.is_empty() {
            log::debug!(
                "Releasing {} textures and {} bind groups from an aborted rebuild",
                owned.texture_count(),
                owned.bind_group_count()
            );
            owned.release(&mut *self.backend);
        }
    }
}

/// SSAO output and the intermediate for the separable blur
#[derive(Debug, Clone, Copy)]
pub struct OcclusionTargets {
    pub raw: Attachment,
    pub blurred: Attachment,
}

/// Render targets for one output size
#[derive(Debug)]
pub struct FrameAttachments {
    pub width: u32,
    pub height: u32,
    pub albedo: Attachment,
    pub normal: Attachment,
    pub material: Attachment,
    pub light: Attachment,
    pub depth: Attachment,
    pub occlusion: Option<OcclusionTargets>,
    /// Bloom mip chain; level `i` is `size / 2^(i + 1)`
    pub bloom: Vec<Attachment>,
}

impl FrameAttachments {
    pub fn allocate(
        scope: &mut ResourceScope<'_>,
        width: u32,
        height: u32,
        config: &DeferredConfig,
    ) -> BackendResult<Self> {
        let albedo = scope.texture("G-Buffer albedo", width, height, ALBEDO_FORMAT)?;
        let normal = scope.texture("G-Buffer normal", width, height, NORMAL_FORMAT)?;
        let material = scope.texture("G-Buffer material", width, height, MATERIAL_FORMAT)?;
        let light = scope.texture("Light accumulation", width, height, LIGHT_FORMAT)?;
        let depth = scope.texture("Depth", width, height, DEPTH_FORMAT)?;

        let occlusion = match config.ssao {
            Some(_) => Some(OcclusionTargets {
                raw: scope.texture("SSAO", width, height, OCCLUSION_FORMAT)?,
                blurred: scope.texture("SSAO blur", width, height, OCCLUSION_FORMAT)?,
            }),
            None => None,
        };

        let mut bloom = Vec::new();
        if let Some(settings) = config.bloom {
            for level in 0..settings.mip_levels.clamp(1, 8) {
                let (w, h) = bloom_extent(width, height, level);
                bloom.push(scope.texture(&format!("Bloom mip {level}"), w, h, BLOOM_FORMAT)?);
            }
        }

        Ok(Self {
            width,
            height,
            albedo,
            normal,
            material,
            light,
            depth,
            occlusion,
            bloom,
        })
    }

    /// Bind group for the lighting pass G-buffer reads
    pub fn gbuffer_entries(&self) -> [(u32, BindGroupEntry); 4] {
        [
            (0, BindGroupEntry::Texture(self.albedo.view)),
            (1, BindGroupEntry::Texture(self.normal.view)),
            (2, BindGroupEntry::Texture(self.material.view)),
            (3, BindGroupEntry::Texture(self.depth.view)),
        ]
    }

    /// Every attachment, in allocation order
    pub fn all(&self) -> Vec<Attachment> {
        let mut all = vec![self.albedo, self.normal, self.material, self.light, self.depth];
        if let Some(occlusion) = self.occlusion {
            all.extend([occlusion.raw, occlusion.blurred]);
        }
        all.extend(self.bloom.iter().copied());
        all
    }
}

/// Extent of bloom mip `level` for a `width` x `height` output
pub fn bloom_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shift = (level + 1).min(31);
    ((width >> shift).max(1), (height >> shift).max(1))
}

/// Bind groups that reference size-dependent attachments
#[derive(Debug)]
pub struct FrameBindings {
    pub gbuffer: BindGroupHandle,
    pub ssao: Option<SsaoBindings>,
    pub bloom: Option<BloomBindings>,
    pub tonemap: BindGroupHandle,
    pub debug: DebugBindings,
}

/// Attachments plus their dependent bind groups, replaced as a unit on resize
#[derive(Debug)]
pub struct FrameTargets {
    pub attachments: FrameAttachments,
    pub bindings: FrameBindings,
    owned: OwnedResources,
}

impl FrameTargets {
    pub fn new(attachments: FrameAttachments, bindings: FrameBindings, owned: OwnedResources) -> Self {
        Self {
            attachments,
            bindings,
            owned,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.attachments.width, self.attachments.height)
    }

    pub fn release(self, backend: &mut dyn GraphicsBackend) {
        log::debug!(
            "Releasing {}x{} frame targets",
            self.attachments.width,
            self.attachments.height
        );
        self.owned.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_extent_halves_per_level() {
        assert_eq!(bloom_extent(800, 600, 0), (400, 300));
        assert_eq!(bloom_extent(800, 600, 4), (25, 18));
        assert_eq!(bloom_extent(3, 3, 5), (1, 1));
    }

    #[test]
    fn test_dropped_scope_releases_resources() {
        let mut backend = RecordingBackend::new(8, 8);
        {
            let mut scope = ResourceScope::new(&mut backend);
            scope.texture("a", 8, 8, ALBEDO_FORMAT).unwrap();
            scope.texture("b", 8, 8, LIGHT_FORMAT).unwrap();
        }
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_committed_scope_keeps_resources() {
        let mut backend = RecordingBackend::new(8, 8);
        let config = DeferredConfig {
            ssao: None,
            bloom: Some(BloomSettings {
                mip_levels: 3,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 64, 32, &config).unwrap();
        let owned = scope.commit();

        assert!(attachments.occlusion.is_none());
        assert_eq!(attachments.bloom.len(), 3);
        assert_eq!(attachments.all().len(), 8);
        assert_eq!(backend.live_texture_count(), 8);
        assert_eq!(owned.texture_count(), 8);

        owned.release(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_failed_allocation_leaves_nothing_behind() {
        let mut backend = RecordingBackend::new(8, 8);
        backend.fail_textures_after(3);
        let mut scope = ResourceScope::new(&mut backend);
        let result = FrameAttachments::allocate(&mut scope, 16, 16, &DeferredConfig::default());
        assert!(result.is_err());
        drop(scope);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
