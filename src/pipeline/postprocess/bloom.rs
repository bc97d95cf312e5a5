//! Bloom post-processing effect
//!
//! A bright-pass downsample from the light target into mip 0, further
//! downsamples along the chain, then additive upsamples back to mip 0,
//! which the tonemapping pass composites.

use crate::backend::*;
use crate::pipeline::attachments::{bloom_extent, Attachment, FrameAttachments, ResourceScope};
use crate::pipeline::{sampled_texture_layout, uniform_buffer, BloomSettings, BLOOM_FORMAT};
use crate::shader::FULLSCREEN_VERTEX;
use bytemuck::{Pod, Zeroable};

/// Stage name; individual passes are labelled per mip level
pub const LABEL: &str = "Bloom";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct BloomUniforms {
    threshold: f32,
    knee: f32,
    intensity: f32,
    prefilter: u32,
}

/// Bind groups sampling the light target and the mip chain
#[derive(Debug, Clone)]
pub struct BloomBindings {
    /// `downsample[i]` reads the source of mip `i`
    pub downsample: Vec<BindGroupHandle>,
    /// `upsample[i]` reads mip `i + 1`
    pub upsample: Vec<BindGroupHandle>,
}

pub struct BloomPass {
    settings: BloomSettings,
    layout: BindGroupLayoutHandle,
    sampler: SamplerHandle,
    prefilter_params: BufferHandle,
    params: BufferHandle,
    downsample_pipeline: RenderPipelineHandle,
    upsample_pipeline: RenderPipelineHandle,
}

impl BloomPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        settings: BloomSettings,
        sampler: SamplerHandle,
    ) -> BackendResult<Self> {
        let layout = sampled_texture_layout(backend, &[ShaderStageFlags::FRAGMENT])?;
        let uniforms = BloomUniforms {
            threshold: settings.threshold,
            knee: settings.knee,
            intensity: settings.intensity,
            prefilter: 1,
        };
        let prefilter_params = uniform_buffer(backend, "Bloom prefilter params", &uniforms)?;
        let params = uniform_buffer(
            backend,
            "Bloom params",
            &BloomUniforms {
                prefilter: 0,
                ..uniforms
            },
        )?;

        let downsample_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "Bloom downsample",
            format!("{FULLSCREEN_VERTEX}{BLOOM_COMMON}{DOWNSAMPLE_SHADER}"),
            vec![layout],
            vec![ColorTargetState::replace(BLOOM_FORMAT)],
        ))?;
        let upsample_pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor::fullscreen(
            "Bloom upsample",
            format!("{FULLSCREEN_VERTEX}{BLOOM_COMMON}{UPSAMPLE_SHADER}"),
            vec![layout],
            vec![ColorTargetState::blended(BLOOM_FORMAT, BlendState::additive())],
        ))?;

        Ok(Self {
            settings,
            layout,
            sampler,
            prefilter_params,
            params,
            downsample_pipeline,
            upsample_pipeline,
        })
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    pub fn bind(
        &self,
        scope: &mut ResourceScope<'_>,
        attachments: &FrameAttachments,
    ) -> BackendResult<BloomBindings> {
        let chain = &attachments.bloom;
        if chain.is_empty() {
            return Err(BackendError::BindGroupCreationFailed(
                "Bloom targets were not allocated".into(),
            ));
        }

        let mut downsample = Vec::with_capacity(chain.len());
        for level in 0..chain.len() {
            let (source, params) = if level == 0 {
                (attachments.light, self.prefilter_params)
            } else {
                (chain[level - 1], self.params)
            };
            downsample.push(self.bind_source(scope, source, params)?);
        }
        let mut upsample = Vec::with_capacity(chain.len() - 1);
        for source in &chain[1..] {
            upsample.push(self.bind_source(scope, *source, self.params)?);
        }
        Ok(BloomBindings { downsample, upsample })
    }

    fn bind_source(
        &self,
        scope: &mut ResourceScope<'_>,
        source: Attachment,
        params: BufferHandle,
    ) -> BackendResult<BindGroupHandle> {
        scope.bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::Texture(source.view)),
                (1, BindGroupEntry::Sampler(self.sampler)),
                (2, BindGroupEntry::buffer(params)),
            ],
        )
    }

    /// Record the downsample and upsample chain; returns the number of draws
    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        attachments: &FrameAttachments,
        bindings: &BloomBindings,
    ) -> u32 {
        let chain = &attachments.bloom;
        let mut draws = 0;

        for (level, target) in chain.iter().enumerate() {
            let Some(&bind_group) = bindings.downsample.get(level) else {
                break;
            };
            self.draw_level(
                backend,
                format!("Bloom Downsample {level}"),
                ColorAttachment::clear(target.view, [0.0; 4]),
                attachments,
                level as u32,
                self.downsample_pipeline,
                bind_group,
            );
            draws += 1;
        }

        for level in (0..chain.len().saturating_sub(1)).rev() {
            let Some(&bind_group) = bindings.upsample.get(level) else {
                continue;
            };
            self.draw_level(
                backend,
                format!("Bloom Upsample {level}"),
                ColorAttachment::load(chain[level].view),
                attachments,
                level as u32,
                self.upsample_pipeline,
                bind_group,
            );
            draws += 1;
        }
        draws
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_level(
        &self,
        backend: &mut dyn GraphicsBackend,
        label: String,
        target: ColorAttachment,
        attachments: &FrameAttachments,
        level: u32,
        pipeline: RenderPipelineHandle,
        bind_group: BindGroupHandle,
    ) {
        let (width, height) = bloom_extent(attachments.width, attachments.height, level);
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(label),
            color_attachments: vec![target],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }
}

const BLOOM_COMMON: &str = r#"
struct BloomParams {
    threshold: f32,
    knee: f32,
    intensity: f32,
    prefilter: u32,
}

@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: BloomParams;
"#;

const DOWNSAMPLE_SHADER: &str = r#"
fn bright_pass(color: vec3<f32>) -> vec3<f32> {
    let luminance = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    let soft = clamp(luminance - params.threshold + params.knee, 0.0, 2.0 * params.knee);
    let curve = soft * soft / (4.0 * params.knee + 0.0001);
    let weight = max(curve, luminance - params.threshold) / max(luminance, 0.0001);
    return color * weight;
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(source_texture));
    var color = textureSampleLevel(source_texture, source_sampler, input.uv, 0.0).rgb * 0.5;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + texel * vec2<f32>(-1.0, -1.0), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + texel * vec2<f32>(1.0, -1.0), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + texel * vec2<f32>(-1.0, 1.0), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + texel * vec2<f32>(1.0, 1.0), 0.0).rgb * 0.125;
    if params.prefilter != 0u {
        color = bright_pass(color);
    }
    return vec4<f32>(color, 1.0);
}
"#;

const UPSAMPLE_SHADER: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(source_texture));
    var color = textureSampleLevel(source_texture, source_sampler, input.uv, 0.0).rgb * 0.25;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + vec2<f32>(texel.x, 0.0), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv - vec2<f32>(texel.x, 0.0), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + vec2<f32>(0.0, texel.y), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv - vec2<f32>(0.0, texel.y), 0.0).rgb * 0.125;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + texel, 0.0).rgb * 0.0625;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv - texel, 0.0).rgb * 0.0625;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + vec2<f32>(texel.x, -texel.y), 0.0).rgb * 0.0625;
    color = color + textureSampleLevel(source_texture, source_sampler, input.uv + vec2<f32>(-texel.x, texel.y), 0.0).rgb * 0.0625;
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DeferredConfig, Samplers};
    use crate::shader::validate_wgsl;

    #[test]
    fn test_shaders_validate() {
        validate_wgsl(&format!("{FULLSCREEN_VERTEX}{BLOOM_COMMON}{DOWNSAMPLE_SHADER}")).unwrap();
        validate_wgsl(&format!("{FULLSCREEN_VERTEX}{BLOOM_COMMON}{UPSAMPLE_SHADER}")).unwrap();
    }

    #[test]
    fn test_records_down_then_up_chain() {
        let mut backend = RecordingBackend::new(64, 64);
        let samplers = Samplers::new(&mut backend).unwrap();
        let settings = BloomSettings {
            mip_levels: 3,
            ..Default::default()
        };
        let pass = BloomPass::new(&mut backend, settings, samplers.linear).unwrap();
        let config = DeferredConfig {
            ssao: None,
            bloom: Some(settings),
            ..Default::default()
        };

        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 64, 64, &config).unwrap();
        let bindings = pass.bind(&mut scope, &attachments).unwrap();
        let _owned = scope.commit();
        assert_eq!(bindings.downsample.len(), 3);
        assert_eq!(bindings.upsample.len(), 2);

        let draws = pass.record(&mut backend, &attachments, &bindings);
        assert_eq!(draws, 5);
        assert_eq!(
            backend.pass_labels(),
            vec![
                "Bloom Downsample 0",
                "Bloom Downsample 1",
                "Bloom Downsample 2",
                "Bloom Upsample 1",
                "Bloom Upsample 0",
            ]
        );
        let upsample = backend.pass("Bloom Upsample 0").unwrap();
        assert_eq!(upsample.color_load_ops(), vec![LoadOp::Load]);
    }
}
