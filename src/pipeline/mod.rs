//! Deferred rendering pipeline
//!
//! Frame passes, in recording order:
//! 1. G-Buffer pass - opaque geometry into albedo, normal and material targets
//! 2. SSAO (optional) - occlusion multiplied into the albedo alpha channel
//! 3. Lighting pass - ambient, directional and local lights accumulated additively
//! 4. Forward pass - skybox, transparent/unlit geometry, light sprites
//! 5. Post-processing - bloom (optional) and tonemapping to the output
//! 6. Debug overlay (optional) - tiled previews of intermediate targets

pub mod attachments;
pub mod debug_overlay;
pub mod forward_pass;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod postprocess;
pub mod ssao_pass;

pub use attachments::{Attachment, FrameTargets, ResourceScope};
pub use debug_overlay::DebugOverlayPass;
pub use forward_pass::{ForwardPass, ForwardPipelineFactory};
pub use gbuffer_pass::{GBufferPass, GBufferPipelineFactory};
pub use lighting_pass::LightingPass;
pub use postprocess::{BloomPass, TonemapOperator, TonemappingPass};
pub use ssao_pass::SsaoPass;

use crate::backend::*;

pub const ALBEDO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const MATERIAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const LIGHT_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const OCCLUSION_FORMAT: TextureFormat = TextureFormat::R8Unorm;
pub const BLOOM_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Screen-space ambient occlusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoSettings {
    /// Sample hemisphere radius in world units
    pub radius: f32,
    pub bias: f32,
    pub intensity: f32,
    /// Kernel size, clamped to 1..=32
    pub sample_count: u32,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            radius: 0.5,
            bias: 0.025,
            intensity: 1.0,
            sample_count: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    /// Luminance where bright-pass extraction starts
    pub threshold: f32,
    /// Soft knee width around the threshold
    pub knee: f32,
    pub intensity: f32,
    /// Mip chain length, clamped to 1..=8
    pub mip_levels: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            knee: 0.5,
            intensity: 0.5,
            mip_levels: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapSettings {
    pub operator: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            operator: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
        }
    }
}

/// Intermediate target shown as a debug overlay tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugView {
    Albedo,
    Normal,
    MetalRough,
    Occlusion,
    Depth,
    Light,
    Bloom,
}

/// Configuration for the Deferred pipeline
#[derive(Debug, Clone)]
pub struct DeferredConfig {
    /// `None` disables the SSAO passes
    pub ssao: Option<SsaoSettings>,
    /// `None` disables the bloom passes
    pub bloom: Option<BloomSettings>,
    pub tonemap: TonemapSettings,
    /// Overlay tiles, drawn in order
    pub debug_views: Vec<DebugView>,
    /// Draw the environment behind the scene when one is set
    pub skybox: bool,
    /// Draw a small sprite at every point and spot light
    pub light_sprites: bool,
    pub max_lights: u32,
    pub initial_instance_capacity: u32,
    /// Light accumulation clear value
    pub clear_color: [f32; 4],
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            ssao: Some(SsaoSettings::default()),
            bloom: Some(BloomSettings::default()),
            tonemap: TonemapSettings::default(),
            debug_views: Vec::new(),
            skybox: true,
            light_sprites: false,
            max_lights: 1024,
            initial_instance_capacity: 256,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Bind group layouts shared by the scene pipelines and the lighting pass
#[derive(Debug, Clone, Copy)]
pub struct SceneLayouts {
    /// Group 0: camera, lights, lighting uniforms
    pub frame: BindGroupLayoutHandle,
    /// Group 1 of scene pipelines: instance storage
    pub instances: BindGroupLayoutHandle,
    /// Group 2 of scene pipelines: material uniforms
    pub material: BindGroupLayoutHandle,
    /// Group 3 of skinned pipelines: joint matrices
    pub skin: BindGroupLayoutHandle,
    /// G-buffer textures read with `textureLoad`
    pub gbuffer: BindGroupLayoutHandle,
    /// Environment texture and sampler
    pub environment: BindGroupLayoutHandle,
}

impl SceneLayouts {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        let frame = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
            BindGroupLayoutEntry::new(
                1,
                ShaderStageFlags::VERTEX_FRAGMENT,
                BindingType::StorageBuffer { read_only: true },
            ),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::VERTEX_FRAGMENT, BindingType::UniformBuffer),
        ])?;
        let instances = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX,
            BindingType::StorageBuffer { read_only: true },
        )])?;
        let material = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX_FRAGMENT,
            BindingType::UniformBuffer,
        )])?;
        let skin = backend.create_bind_group_layout(&[BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::VERTEX,
            BindingType::StorageBuffer { read_only: true },
        )])?;

        let unfilterable = BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
        };
        let gbuffer = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, ShaderStageFlags::FRAGMENT, unfilterable.clone()),
            BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, unfilterable.clone()),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::FRAGMENT, unfilterable),
            BindGroupLayoutEntry::new(
                3,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                },
            ),
        ])?;
        let environment = sampled_texture_layout(backend, &[])?;

        Ok(Self {
            frame,
            instances,
            material,
            skin,
            gbuffer,
            environment,
        })
    }
}

/// Layout of a filterable texture at binding 0, a filtering sampler at 1,
/// then one uniform buffer per entry of `uniforms` starting at binding 2
pub(crate) fn sampled_texture_layout(
    backend: &mut dyn GraphicsBackend,
    uniforms: &[ShaderStageFlags],
) -> BackendResult<BindGroupLayoutHandle> {
    let mut entries = vec![
        BindGroupLayoutEntry::new(
            0,
            ShaderStageFlags::FRAGMENT,
            BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
            },
        ),
        BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, BindingType::Sampler { filtering: true }),
    ];
    for (i, stages) in uniforms.iter().enumerate() {
        entries.push(BindGroupLayoutEntry::new(2 + i as u32, *stages, BindingType::UniformBuffer));
    }
    backend.create_bind_group_layout(&entries)
}

/// Create a uniform buffer holding `data`
pub(crate) fn uniform_buffer<T: bytemuck::Pod>(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    data: &T,
) -> BackendResult<BufferHandle> {
    backend.create_buffer_init(
        &BufferDescriptor {
            label: Some(label.into()),
            size: std::mem::size_of::<T>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        },
        bytemuck::bytes_of(data),
    )
}

/// Samplers shared by the fullscreen passes
#[derive(Debug, Clone, Copy)]
pub struct Samplers {
    pub linear: SamplerHandle,
    pub nearest: SamplerHandle,
}

impl Samplers {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        Ok(Self {
            linear: backend.create_sampler(&SamplerDescriptor {
                label: Some("Linear clamp".into()),
                ..Default::default()
            })?,
            nearest: backend.create_sampler(&SamplerDescriptor::nearest("Nearest clamp"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_layouts_accept_frame_bindings() {
        let mut backend = RecordingBackend::new(4, 4);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let buffer = uniform_buffer(&mut backend, "test", &[0u32; 4]).unwrap();
        assert_eq!(backend.buffer_size(buffer), Some(16));
        let frame = backend.create_bind_group(
            layouts.frame,
            &[
                (0, BindGroupEntry::buffer(buffer)),
                (1, BindGroupEntry::buffer(buffer)),
                (2, BindGroupEntry::buffer(buffer)),
            ],
        );
        assert!(frame.is_ok());
        assert!(backend
            .create_bind_group(layouts.frame, &[(0, BindGroupEntry::buffer(buffer))])
            .is_err());
    }

    #[test]
    fn test_default_config_enables_optional_passes() {
        let config = DeferredConfig::default();
        assert!(config.ssao.is_some());
        assert_eq!(config.bloom.map(|b| b.mip_levels), Some(5));
        assert!(config.debug_views.is_empty());
        assert_eq!(config.tonemap.operator, TonemapOperator::Aces);
    }
}
