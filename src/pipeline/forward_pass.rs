//! Forward pass over the lit light-accumulation target
//!
//! Runs after deferred lighting and keeps its result: the skybox fills
//! untouched background pixels, then transparent and unlit geometry is
//! shaded directly, then optional light sprites mark local light positions.

use super::attachments::FrameAttachments;
use super::gbuffer_pass::scene_pipeline_descriptor;
use super::*;
use crate::batching::{PipelineFactory, PipelineKey, RenderSet};
use crate::layout::GeometryLayout;
use crate::resources::RenderMaterial;
use crate::scene::SceneMesh;
use crate::shader::{ScenePass, ShaderSourceGenerator, FRAME_BINDINGS};
use std::sync::Arc;

pub const LABEL: &str = "Forward Pass";

/// Compiles forward pipelines and accepts transparent or unlit meshes
pub struct ForwardPipelineFactory {
    generator: Arc<dyn ShaderSourceGenerator>,
    layouts: SceneLayouts,
}

impl ForwardPipelineFactory {
    pub fn new(generator: Arc<dyn ShaderSourceGenerator>, layouts: SceneLayouts) -> Self {
        Self { generator, layouts }
    }
}

impl PipelineFactory for ForwardPipelineFactory {
    fn label(&self) -> &str {
        "Forward"
    }

    fn accepts(&self, _mesh: &SceneMesh, material: &RenderMaterial) -> bool {
        let variant = material.variant();
        variant.transparent() || variant.unlit()
    }

    fn create_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: &GeometryLayout,
        material: &RenderMaterial,
        skinned: bool,
        key: &PipelineKey,
    ) -> BackendResult<RenderPipelineHandle> {
        let transparent = material.variant().transparent();
        let shader = self
            .generator
            .generate(ScenePass::Forward, layout, material.variant(), skinned);
        let mut desc = scene_pipeline_descriptor(
            format!("Forward {key}"),
            shader,
            &self.layouts,
            layout,
            material,
            skinned,
        );
        desc.depth_stencil = Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: !transparent,
            depth_compare: CompareFunction::LessEqual,
        });
        desc.color_targets = vec![if transparent {
            ColorTargetState::blended(LIGHT_FORMAT, BlendState::alpha_blending())
        } else {
            ColorTargetState::replace(LIGHT_FORMAT)
        }];
        backend.create_render_pipeline(&desc)
    }
}

/// What the forward pass draws besides its render set
#[derive(Debug, Clone, Copy)]
pub struct ForwardInputs {
    pub frame: BindGroupHandle,
    /// Environment bind group when the frame has an environment map
    pub environment: Option<BindGroupHandle>,
    pub local_lights: u32,
}

pub struct ForwardPass {
    skybox_pipeline: Option<RenderPipelineHandle>,
    sprite_pipeline: Option<RenderPipelineHandle>,
}

impl ForwardPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        layouts: &SceneLayouts,
        config: &DeferredConfig,
    ) -> BackendResult<Self> {
        let skybox_pipeline = if config.skybox {
            Some(backend.create_render_pipeline(
                &RenderPipelineDescriptor::fullscreen(
                    "Skybox",
                    format!("{FRAME_BINDINGS}{SKYBOX_SHADER}"),
                    vec![layouts.frame, layouts.environment],
                    vec![ColorTargetState::replace(LIGHT_FORMAT)],
                )
                .with_depth(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::LessEqual,
                }),
            )?)
        } else {
            None
        };
        let sprite_pipeline = if config.light_sprites {
            Some(backend.create_render_pipeline(
                &RenderPipelineDescriptor::fullscreen(
                    "Light sprites",
                    format!("{FRAME_BINDINGS}{SPRITE_SHADER}"),
                    vec![layouts.frame],
                    vec![ColorTargetState::blended(LIGHT_FORMAT, BlendState::additive())],
                )
                .with_depth(DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: CompareFunction::LessEqual,
                }),
            )?)
        } else {
            None
        };
        Ok(Self {
            skybox_pipeline,
            sprite_pipeline,
        })
    }

    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        attachments: &FrameAttachments,
        inputs: &ForwardInputs,
        render_set: &RenderSet,
    ) -> u32 {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![ColorAttachment::load(attachments.light.view)],
            depth_stencil_attachment: Some(DepthStencilAttachment::load(attachments.depth.view)),
        });
        backend.set_viewport(
            0.0,
            0.0,
            attachments.width as f32,
            attachments.height as f32,
            0.0,
            1.0,
        );
        backend.set_bind_group(0, inputs.frame);
        let mut draws = 0;

        if let (Some(pipeline), Some(environment)) = (self.skybox_pipeline, inputs.environment) {
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(1, environment);
            backend.draw(0..3, 0..1);
            draws += 1;
        }

        draws += render_set.draw(backend);

        if let Some(pipeline) = self.sprite_pipeline {
            if inputs.local_lights > 0 {
                backend.set_render_pipeline(pipeline);
                backend.draw(0..6, 0..inputs.local_lights);
                draws += 1;
            }
        }

        backend.end_render_pass();
        draws
    }
}

const SKYBOX_SHADER: &str = r#"
@group(1) @binding(0) var environment_texture: texture_2d<f32>;
@group(1) @binding(1) var environment_sampler: sampler;

struct SkyOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> SkyOutput {
    var output: SkyOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.ndc = vec2<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0);
    // On the far plane: only passes where nothing was drawn
    output.position = vec4<f32>(output.ndc, 1.0, 1.0);
    return output;
}

@fragment
fn fs_main(input: SkyOutput) -> @location(0) vec4<f32> {
    let unprojected = camera.inv_proj * vec4<f32>(input.ndc, 1.0, 1.0);
    let view_dir = unprojected.xyz / unprojected.w;
    let d = normalize((camera.inv_view * vec4<f32>(view_dir, 0.0)).xyz);
    let uv = vec2<f32>(atan2(d.z, d.x) / 6.2831853 + 0.5, acos(clamp(d.y, -1.0, 1.0)) / 3.1415927);
    let color = textureSampleLevel(environment_texture, environment_sampler, uv, 0.0).rgb;
    return vec4<f32>(color * lighting.ambient.a, 1.0);
}
"#;

const SPRITE_SHADER: &str = r#"
const SPRITE_SIZE: f32 = 0.08;

struct SpriteOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) offset: vec2<f32>,
    @location(1) color: vec3<f32>,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> SpriteOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[vertex_index];
    let light = lights[lighting.counts.y + instance_index];
    let center = camera.view * vec4<f32>(light.position_radius.xyz, 1.0);

    var output: SpriteOutput;
    output.position = camera.proj * vec4<f32>(center.xy + corner * SPRITE_SIZE, center.z, 1.0);
    output.offset = corner;
    output.color = light.color_intensity.xyz;
    return output;
}

@fragment
fn fs_main(input: SpriteOutput) -> @location(0) vec4<f32> {
    let d = length(input.offset);
    if d > 1.0 {
        discard;
    }
    let falloff = 1.0 - d * d;
    return vec4<f32>(input.color * falloff * 4.0, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::validate_wgsl;

    #[test]
    fn test_shaders_validate() {
        validate_wgsl(&format!("{FRAME_BINDINGS}{SKYBOX_SHADER}")).unwrap();
        validate_wgsl(&format!("{FRAME_BINDINGS}{SPRITE_SHADER}")).unwrap();
    }

    #[test]
    fn test_optional_pipelines_follow_config() {
        let mut backend = RecordingBackend::new(4, 4);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let config = DeferredConfig {
            skybox: false,
            light_sprites: true,
            ..Default::default()
        };
        let pass = ForwardPass::new(&mut backend, &layouts, &config).unwrap();
        assert!(pass.skybox_pipeline.is_none());
        assert!(pass.sprite_pipeline.is_some());
        assert_eq!(backend.pipeline_count(), 1);
    }
}
