//! Tonemapping post-processing
//!
//! Resolves the HDR light target (plus bloom, when enabled) to the output
//! format with exposure, a tonemap curve and gamma correction.

use crate::backend::*;
use crate::pipeline::attachments::{FrameAttachments, ResourceScope};
use crate::pipeline::{uniform_buffer, TonemapSettings, BLOOM_FORMAT};
use crate::shader::FULLSCREEN_VERTEX;
use bytemuck::{Pod, Zeroable};

pub const LABEL: &str = "Tonemap";

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    None,
}

impl TonemapOperator {
    fn shader_id(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TonemapUniforms {
    exposure: f32,
    gamma: f32,
    mode: u32,
    bloom_intensity: f32,
}

/// Tonemapping post-processing pass
pub struct TonemappingPass {
    settings: TonemapSettings,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    params: BufferHandle,
    pipeline: RenderPipelineHandle,
    // Black stand-in when bloom is disabled
    fallback_bloom: TextureHandle,
    fallback_bloom_view: TextureViewHandle,
}

impl TonemappingPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        settings: TonemapSettings,
        bloom_intensity: Option<f32>,
        sampler: SamplerHandle,
    ) -> BackendResult<Self> {
        let hdr_texture = BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
        };
        let layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry::new(0, ShaderStageFlags::FRAGMENT, hdr_texture.clone()),
            BindGroupLayoutEntry::new(1, ShaderStageFlags::FRAGMENT, hdr_texture),
            BindGroupLayoutEntry::new(2, ShaderStageFlags::FRAGMENT, BindingType::Sampler { filtering: true }),
            BindGroupLayoutEntry::new(3, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
        ])?;
        let params = uniform_buffer(
            backend,
            "Tonemap params",
            &TonemapUniforms {
                exposure: settings.exposure,
                gamma: settings.gamma.max(0.0001),
                mode: settings.operator.shader_id(),
                bloom_intensity: bloom_intensity.unwrap_or(0.0),
            },
        )?;

        let fallback_bloom = backend.create_texture(&TextureDescriptor {
            label: Some("Bloom fallback".into()),
            format: BLOOM_FORMAT,
            ..Default::default()
        })?;
        backend.write_texture(fallback_bloom, &[0u8; 8], 1, 1);
        let fallback_bloom_view = backend.create_texture_view(fallback_bloom)?;

        let output_format = backend.swapchain_format();
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "Tonemap",
            format!("{FULLSCREEN_VERTEX}{TONEMAPPING_SHADER}"),
            vec![layout],
            vec![ColorTargetState::replace(output_format)],
        ))?;

        Ok(Self {
            settings,
            layout,
            sampler,
            params,
            pipeline,
            fallback_bloom,
            fallback_bloom_view,
        })
    }

    pub fn settings(&self) -> &TonemapSettings {
        &self.settings
    }

    pub fn bind(
        &self,
        scope: &mut ResourceScope<'_>,
        attachments: &FrameAttachments,
    ) -> BackendResult<BindGroupHandle> {
        let bloom = attachments
            .bloom
            .first()
            .map_or(self.fallback_bloom_view, |mip| mip.view);
        scope.bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(attachments.light.view)),
                (1, BindGroupEntry::Texture(bloom)),
                (2, BindGroupEntry::Sampler(self.sampler)),
                (3, BindGroupEntry::buffer(self.params)),
            ],
        )
    }

    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        output: TextureViewHandle,
        bind_group: BindGroupHandle,
        width: u32,
        height: u32,
    ) -> u32 {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![ColorAttachment::clear(output, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(self.pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
        1
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture_view(self.fallback_bloom_view);
        backend.destroy_texture(self.fallback_bloom);
        backend.destroy_buffer(self.params);
    }
}

const TONEMAPPING_SHADER: &str = r#"
struct TonemapParams {
    exposure: f32,
    gamma: f32,
    mode: u32,
    bloom_intensity: f32,
}

@group(0) @binding(0) var hdr_texture: texture_2d<f32>;
@group(0) @binding(1) var bloom_texture: texture_2d<f32>;
@group(0) @binding(2) var hdr_sampler: sampler;
@group(0) @binding(3) var<uniform> params: TonemapParams;

fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn reinhard_tonemap(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

fn uncharted2_partial(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn uncharted2_tonemap(color: vec3<f32>) -> vec3<f32> {
    let white = uncharted2_partial(vec3<f32>(11.2));
    return saturate(uncharted2_partial(color * 2.0) / white);
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    var color = textureSampleLevel(hdr_texture, hdr_sampler, input.uv, 0.0).rgb;
    color = color + textureSampleLevel(bloom_texture, hdr_sampler, input.uv, 0.0).rgb * params.bloom_intensity;
    color = color * params.exposure;

    var mapped: vec3<f32>;
    switch params.mode {
        case 0u: { mapped = reinhard_tonemap(color); }
        case 1u: { mapped = aces_tonemap(color); }
        case 2u: { mapped = uncharted2_tonemap(color); }
        default: { mapped = saturate(color); }
    }

    let gamma_corrected = pow(mapped, vec3<f32>(1.0 / params.gamma));
    return vec4<f32>(gamma_corrected, 1.0);
}
"#;
