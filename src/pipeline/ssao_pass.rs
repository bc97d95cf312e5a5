//! Screen-space ambient occlusion
//!
//! Three fullscreen passes: hemisphere sampling into an R8 target, a
//! horizontal blur into a second R8 target, and a vertical blur that
//! multiplies the result into the albedo alpha channel, where the lighting
//! pass picks it up.

use super::attachments::{FrameAttachments, ResourceScope};
use super::*;
use crate::shader::{FRAME_BINDINGS, FULLSCREEN_VERTEX};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

pub const LABEL: &str = "SSAO";
pub const BLUR_H_LABEL: &str = "SSAO Blur H";
pub const BLUR_V_LABEL: &str = "SSAO Blur V";

const MAX_SAMPLES: usize = 32;
const BLUR_RADIUS: i32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoUniforms {
    radius: f32,
    bias: f32,
    intensity: f32,
    sample_count: u32,
    kernel: [[f32; 4]; MAX_SAMPLES],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BlurUniforms {
    direction: [i32; 2],
    radius: i32,
    _pad: i32,
}

/// Bind groups that read the current frame's attachments
#[derive(Debug, Clone, Copy)]
pub struct SsaoBindings {
    pub occlusion: BindGroupHandle,
    pub blur_h: BindGroupHandle,
    pub blur_v: BindGroupHandle,
}

pub struct SsaoPass {
    settings: SsaoSettings,
    input_layout: BindGroupLayoutHandle,
    blur_layout: BindGroupLayoutHandle,
    params: BufferHandle,
    blur_params: [BufferHandle; 2],
    occlusion_pipeline: RenderPipelineHandle,
    blur_h_pipeline: RenderPipelineHandle,
    blur_v_pipeline: RenderPipelineHandle,
}

impl SsaoPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        layouts: &SceneLayouts,
        settings: SsaoSettings,
    ) -> BackendResult<Self> {
        let input_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                },
            ),
            BindGroupLayoutEntry::new(
                1,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                },
            ),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
        ])?;
        let blur_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(
                0,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                },
            ),
            BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
        ])?;

        let sample_count = settings.sample_count.clamp(1, MAX_SAMPLES as u32);
        let params = uniform_buffer(
            backend,
            "SSAO params",
            &SsaoUniforms {
                radius: settings.radius,
                bias: settings.bias,
                intensity: settings.intensity,
                sample_count,
                kernel: hemisphere_kernel(sample_count as usize),
            },
        )?;
        let blur_params = [
            uniform_buffer(
                backend,
                "SSAO blur horizontal",
                &BlurUniforms {
                    direction: [1, 0],
                    radius: BLUR_RADIUS,
                    _pad: 0,
                },
            )?,
            uniform_buffer(
                backend,
                "SSAO blur vertical",
                &BlurUniforms {
                    direction: [0, 1],
                    radius: BLUR_RADIUS,
                    _pad: 0,
                },
            )?,
        ];

        let occlusion_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "SSAO occlusion",
            format!("{FRAME_BINDINGS}{FULLSCREEN_VERTEX}{SSAO_SHADER}"),
            vec![layouts.frame, input_layout],
            vec![ColorTargetState::replace(OCCLUSION_FORMAT)],
        ))?;
        let blur_shader = format!("{FULLSCREEN_VERTEX}{BLUR_SHADER}");
        let blur_h_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "SSAO blur horizontal",
            blur_shader.clone(),
            vec![blur_layout],
            vec![ColorTargetState::replace(OCCLUSION_FORMAT)],
        ))?;
        let blur_v_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "SSAO blur vertical",
            blur_shader,
            vec![blur_layout],
            vec![ColorTargetState {
                format: ALBEDO_FORMAT,
                blend: Some(BlendState::multiply()),
                write_mask: ColorWrites::ALPHA,
            }],
        ))?;

        Ok(Self {
            settings,
            input_layout,
            blur_layout,
            params,
            blur_params,
            occlusion_pipeline,
            blur_h_pipeline,
            blur_v_pipeline,
        })
    }

    pub fn settings(&self) -> &SsaoSettings {
        &self.settings
    }

    pub fn bind(
        &self,
        scope: &mut ResourceScope<'_>,
        attachments: &FrameAttachments,
    ) -> BackendResult<SsaoBindings> {
        let Some(occlusion) = attachments.occlusion else {
            return Err(BackendError::BindGroupCreationFailed(
                "SSAO targets were not allocated".into(),
            ));
        };
        Ok(SsaoBindings {
            occlusion: scope.bind_group(
                self.input_layout,
                &[
                    (0, BindGroupEntry::Texture(attachments.normal.view)),
                    (1, BindGroupEntry::Texture(attachments.depth.view)),
                    (2, BindGroupEntry::buffer(self.params)),
                ],
            )?,
            blur_h: scope.bind_group(
                self.blur_layout,
                &[
                    (0, BindGroupEntry::Texture(occlusion.raw.view)),
                    (1, BindGroupEntry::buffer(self.blur_params[0])),
                ],
            )?,
            blur_v: scope.bind_group(
                self.blur_layout,
                &[
                    (0, BindGroupEntry::Texture(occlusion.blurred.view)),
                    (1, BindGroupEntry::buffer(self.blur_params[1])),
                ],
            )?,
        })
    }

    /// Record the three SSAO passes; returns the number of draws
    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        attachments: &FrameAttachments,
        bindings: &SsaoBindings,
        frame_bind_group: BindGroupHandle,
    ) -> u32 {
        let Some(occlusion) = attachments.occlusion else {
            return 0;
        };

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![ColorAttachment::clear(occlusion.raw.view, [1.0; 4])],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(self.occlusion_pipeline);
        backend.set_bind_group(0, frame_bind_group);
        backend.set_bind_group(1, bindings.occlusion);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(BLUR_H_LABEL.into()),
            color_attachments: vec![ColorAttachment::clear(occlusion.blurred.view, [1.0; 4])],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(self.blur_h_pipeline);
        backend.set_bind_group(0, bindings.blur_h);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        // Keeps the G-buffer albedo; only alpha is multiplied
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(BLUR_V_LABEL.into()),
            color_attachments: vec![ColorAttachment::load(attachments.albedo.view)],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(self.blur_v_pipeline);
        backend.set_bind_group(0, bindings.blur_v);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        3
    }
}

/// Hemisphere sample offsets along +Z, denser near the origin
fn hemisphere_kernel(count: usize) -> [[f32; 4]; MAX_SAMPLES] {
    const GOLDEN_ANGLE: f32 = 2.399_963;
    let count = count.clamp(1, MAX_SAMPLES);
    let mut kernel = [[0.0; 4]; MAX_SAMPLES];
    for (i, sample) in kernel.iter_mut().take(count).enumerate() {
        let t = (i as f32 + 0.5) / count as f32;
        let z = (1.0 - t).max(0.1);
        let r = (1.0 - z * z).max(0.0).sqrt();
        let phi = i as f32 * GOLDEN_ANGLE;
        let direction = Vec3::new(r * phi.cos(), r * phi.sin(), z).normalize();
        let scale = 0.1 + 0.9 * t * t;
        *sample = (direction * scale).extend(0.0).to_array();
    }
    kernel
}

const SSAO_SHADER: &str = r#"
struct SsaoParams {
    radius: f32,
    bias: f32,
    intensity: f32,
    sample_count: u32,
    offsets: array<vec4<f32>, 32>,
}

@group(1) @binding(0) var normal_texture: texture_2d<f32>;
@group(1) @binding(1) var depth_texture: texture_depth_2d;
@group(1) @binding(2) var<uniform> params: SsaoParams;

fn view_position(coord: vec2<i32>, size: vec2<f32>) -> vec3<f32> {
    let depth = textureLoad(depth_texture, coord, 0);
    let uv = (vec2<f32>(coord) + 0.5) / size;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let unprojected = camera.inv_proj * ndc;
    return unprojected.xyz / unprojected.w;
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(input.position.xy);
    let size = vec2<f32>(textureDimensions(depth_texture));
    if textureLoad(depth_texture, coord, 0) >= 1.0 {
        return vec4<f32>(1.0);
    }

    let origin = view_position(coord, size);
    let world_normal = normalize(textureLoad(normal_texture, coord, 0).xyz * 2.0 - 1.0);
    let normal = normalize((camera.view * vec4<f32>(world_normal, 0.0)).xyz);

    // Per-pixel kernel rotation
    let noise = fract(sin(dot(vec2<f32>(coord), vec2<f32>(12.9898, 78.233))) * 43758.5453);
    let angle = noise * 6.2831853;
    let random = vec3<f32>(cos(angle), sin(angle), 0.0);
    let tangent = normalize(random - normal * dot(random, normal));
    let bitangent = cross(normal, tangent);

    let limit = vec2<i32>(size) - 1;
    let count = min(params.sample_count, 32u);
    var occlusion = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let k = params.offsets[i];
        let sample_pos = origin + (tangent * k.x + bitangent * k.y + normal * k.z) * params.radius;
        let clip = camera.proj * vec4<f32>(sample_pos, 1.0);
        let ndc = clip.xy / clip.w;
        let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let sample_coord = clamp(vec2<i32>(uv * size), vec2<i32>(0), limit);
        let scene_z = view_position(sample_coord, size).z;
        let range = smoothstep(0.0, 1.0, params.radius / max(abs(origin.z - scene_z), 0.0001));
        if scene_z >= sample_pos.z + params.bias {
            occlusion = occlusion + range;
        }
    }

    let ao = 1.0 - occlusion / f32(max(count, 1u)) * params.intensity;
    return vec4<f32>(clamp(ao, 0.0, 1.0), 0.0, 0.0, 1.0);
}
"#;

const BLUR_SHADER: &str = r#"
struct BlurParams {
    direction: vec2<i32>,
    radius: i32,
    pad: i32,
}

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var<uniform> blur: BlurParams;

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(input.position.xy);
    let limit = vec2<i32>(textureDimensions(source)) - 1;
    var total = 0.0;
    var weight = 0.0;
    for (var i = -blur.radius; i <= blur.radius; i = i + 1) {
        let w = 1.0 / (1.0 + abs(f32(i)));
        let sample_coord = clamp(coord + blur.direction * i, vec2<i32>(0), limit);
        total = total + textureLoad(source, sample_coord, 0).r * w;
        weight = weight + w;
    }
    let ao = total / weight;
    return vec4<f32>(ao, ao, ao, ao);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::validate_wgsl;

    #[test]
    fn test_shaders_validate() {
        validate_wgsl(&format!("{FRAME_BINDINGS}{FULLSCREEN_VERTEX}{SSAO_SHADER}")).unwrap();
        validate_wgsl(&format!("{FULLSCREEN_VERTEX}{BLUR_SHADER}")).unwrap();
    }

    #[test]
    fn test_uniform_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<SsaoUniforms>(), 16 + 32 * 16);
        assert_eq!(std::mem::size_of::<BlurUniforms>(), 16);
    }

    #[test]
    fn test_kernel_stays_in_unit_hemisphere() {
        let kernel = hemisphere_kernel(16);
        for sample in &kernel[..16] {
            let v = Vec3::new(sample[0], sample[1], sample[2]);
            assert!(v.z > 0.0);
            assert!(v.length() <= 1.0 + 1e-5);
        }
        assert_eq!(kernel[16], [0.0; 4]);
    }

    #[test]
    fn test_bind_requires_occlusion_targets() {
        let mut backend = RecordingBackend::new(8, 8);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = SsaoPass::new(&mut backend, &layouts, SsaoSettings::default()).unwrap();
        let config = DeferredConfig {
            ssao: None,
            ..Default::default()
        };
        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 8, 8, &config).unwrap();
        assert!(pass.bind(&mut scope, &attachments).is_err());
    }
}
