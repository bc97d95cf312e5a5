//! Deferred lighting pass
//!
//! Reads the G-buffer and accumulates lighting into the HDR light target
//! with additive blending. The depth attachment is bound read-only so local
//! light volumes can be depth tested against the scene.
//!
//! Three draws at most:
//! - ambient and image based lighting, one fullscreen triangle
//! - directional lights, one fullscreen triangle per light (instanced)
//! - point and spot lights, one billboard per light (instanced)

use super::attachments::FrameAttachments;
use super::*;
use crate::scene::LightCounts;
use crate::shader::{FRAME_BINDINGS, FULLSCREEN_VERTEX, LIGHT_FUNCTIONS};

pub const LABEL: &str = "Lighting Pass";

/// Bind groups the lighting pass reads for one frame
#[derive(Debug, Clone, Copy)]
pub struct LightingInputs {
    pub frame: BindGroupHandle,
    pub gbuffer: BindGroupHandle,
    pub environment: BindGroupHandle,
    pub lights: LightCounts,
}

pub struct LightingPass {
    ambient_pipeline: RenderPipelineHandle,
    directional_pipeline: RenderPipelineHandle,
    local_pipeline: RenderPipelineHandle,
}

impl LightingPass {
    pub fn new(backend: &mut dyn GraphicsBackend, layouts: &SceneLayouts) -> BackendResult<Self> {
        let bind_group_layouts = vec![layouts.frame, layouts.gbuffer, layouts.environment];
        let target = vec![ColorTargetState::blended(LIGHT_FORMAT, BlendState::additive())];
        let depth_test = |compare| DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: compare,
        };

        let ambient_pipeline = backend.create_render_pipeline(
            &RenderPipelineDescriptor::fullscreen(
                "Lighting ambient",
                lighting_source(FULLSCREEN_VERTEX, AMBIENT_FRAGMENT),
                bind_group_layouts.clone(),
                target.clone(),
            )
            .with_depth(depth_test(CompareFunction::Always)),
        )?;
        let directional_pipeline = backend.create_render_pipeline(
            &RenderPipelineDescriptor::fullscreen(
                "Lighting directional",
                lighting_source(DIRECTIONAL_VERTEX, LIGHT_FRAGMENT),
                bind_group_layouts.clone(),
                target.clone(),
            )
            .with_depth(depth_test(CompareFunction::Always)),
        )?;
        let local_pipeline = backend.create_render_pipeline(
            &RenderPipelineDescriptor::fullscreen(
                "Lighting local",
                lighting_source(LOCAL_VERTEX, LIGHT_FRAGMENT),
                bind_group_layouts,
                target,
            )
            .with_depth(depth_test(CompareFunction::LessEqual)),
        )?;

        Ok(Self {
            ambient_pipeline,
            directional_pipeline,
            local_pipeline,
        })
    }

    /// Clear the light target and accumulate every light; returns the
    /// number of draws
    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        attachments: &FrameAttachments,
        inputs: &LightingInputs,
        clear_color: [f32; 4],
    ) -> u32 {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![ColorAttachment::clear(attachments.light.view, clear_color)],
            depth_stencil_attachment: Some(DepthStencilAttachment::read_only(attachments.depth.view)),
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
        backend.set_bind_group(1, inputs.gbuffer);
        backend.set_bind_group(2, inputs.environment);

        backend.set_render_pipeline(self.ambient_pipeline);
        backend.draw(0..3, 0..1);
        let mut draws = 1;

        if inputs.lights.directional > 0 {
            backend.set_render_pipeline(self.directional_pipeline);
            backend.draw(0..3, 0..inputs.lights.directional);
            draws += 1;
        }
        if inputs.lights.local > 0 {
            backend.set_render_pipeline(self.local_pipeline);
            backend.draw(0..6, 0..inputs.lights.local);
            draws += 1;
        }

        backend.end_render_pass();
        log::trace!(
            "Lighting: {} directional, {} local lights",
            inputs.lights.directional,
            inputs.lights.local
        );
        draws
    }
}

fn lighting_source(vertex: &str, fragment: &str) -> String {
    format!("{FRAME_BINDINGS}{LIGHT_FUNCTIONS}{GBUFFER_READ}{vertex}{fragment}")
}

/// G-buffer and environment bindings plus surface reconstruction
pub(crate) const GBUFFER_READ: &str = r#"
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_depth: texture_depth_2d;

@group(2) @binding(0) var environment_texture: texture_2d<f32>;
@group(2) @binding(1) var environment_sampler: sampler;

struct Surface {
    albedo: vec3<f32>,
    occlusion: f32,
    normal: vec3<f32>,
    metallic: f32,
    roughness: f32,
    world_position: vec3<f32>,
    depth: f32,
}

fn load_surface(frag_coord: vec4<f32>) -> Surface {
    let coord = vec2<i32>(frag_coord.xy);
    let size = vec2<f32>(textureDimensions(gbuffer_depth));
    var surface: Surface;

    let albedo = textureLoad(gbuffer_albedo, coord, 0);
    surface.albedo = albedo.rgb;
    surface.occlusion = albedo.a;
    surface.normal = normalize(textureLoad(gbuffer_normal, coord, 0).xyz * 2.0 - 1.0);
    let params = textureLoad(gbuffer_material, coord, 0);
    surface.metallic = params.r;
    surface.roughness = params.g;
    surface.depth = textureLoad(gbuffer_depth, coord, 0);

    let uv = frag_coord.xy / size;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, surface.depth, 1.0);
    let world = camera.inv_view * (camera.inv_proj * ndc);
    surface.world_position = world.xyz / world.w;
    return surface;
}

fn equirect_uv(direction: vec3<f32>) -> vec2<f32> {
    let d = normalize(direction);
    return vec2<f32>(atan2(d.z, d.x) / 6.2831853 + 0.5, acos(clamp(d.y, -1.0, 1.0)) / 3.1415927);
}
"#;

const AMBIENT_FRAGMENT: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let surface = load_surface(input.position);
    if surface.depth >= 1.0 {
        discard;
    }

    var ambient = lighting.ambient.rgb * surface.albedo;
    if lighting.params.x > 0.5 {
        let irradiance = textureSampleLevel(environment_texture, environment_sampler, equirect_uv(surface.normal), 4.0).rgb;
        ambient = ambient + irradiance * lighting.ambient.a * surface.albedo * (1.0 - 0.5 * surface.metallic);
    }
    return vec4<f32>(ambient * surface.occlusion, 1.0);
}
"#;

const DIRECTIONAL_VERTEX: &str = r#"
struct LightVertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) light_index: u32,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> LightVertexOutput {
    var output: LightVertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    // Directional lights are stored first
    output.light_index = instance_index;
    return output;
}
"#;

const LOCAL_VERTEX: &str = r#"
struct LightVertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) light_index: u32,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> LightVertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[vertex_index];
    let light_index = lighting.counts.y + instance_index;
    let light = lights[light_index];
    let radius = light.position_radius.w;
    let center = (camera.view * vec4<f32>(light.position_radius.xyz, 1.0)).xyz;
    let front_z = center.z + radius;

    var output: LightVertexOutput;
    output.light_index = light_index;
    if -front_z <= camera.near_far.x {
        // Camera inside the volume: cover the screen at the near plane
        output.position = vec4<f32>(corner, 0.0, 1.0);
        return output;
    }

    // Billboard on the sphere's front plane. Projection onto that plane can
    // only pull silhouette points toward the view axis by at most k.
    let k = -front_z / (radius - center.z);
    let lo = center.xy - vec2<f32>(radius);
    let hi = center.xy + vec2<f32>(radius);
    let xy = mix(min(lo, lo * k), max(hi, hi * k), corner * 0.5 + 0.5);
    output.position = camera.proj * vec4<f32>(xy, front_z, 1.0);
    return output;
}
"#;

const LIGHT_FRAGMENT: &str = r#"
@fragment
fn fs_main(input: LightVertexOutput) -> @location(0) vec4<f32> {
    let surface = load_surface(input.position);
    if surface.depth >= 1.0 {
        discard;
    }
    let view_dir = normalize(camera.position.xyz - surface.world_position);
    let color = calculate_light(
        lights[input.light_index],
        surface.world_position,
        surface.normal,
        surface.albedo,
        surface.metallic,
        surface.roughness,
        view_dir,
    );
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordedCommand;
    use crate::pipeline::attachments::ResourceScope;
    use crate::shader::validate_wgsl;

    #[test]
    fn test_shaders_validate() {
        validate_wgsl(&lighting_source(FULLSCREEN_VERTEX, AMBIENT_FRAGMENT)).unwrap();
        validate_wgsl(&lighting_source(DIRECTIONAL_VERTEX, LIGHT_FRAGMENT)).unwrap();
        validate_wgsl(&lighting_source(LOCAL_VERTEX, LIGHT_FRAGMENT)).unwrap();
    }

    #[test]
    fn test_draws_per_light_group() {
        let mut backend = RecordingBackend::new(16, 16);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = LightingPass::new(&mut backend, &layouts).unwrap();
        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 16, 16, &DeferredConfig::default()).unwrap();
        let _owned = scope.commit();

        let handle = BindGroupHandle(9999);
        let inputs = LightingInputs {
            frame: handle,
            gbuffer: handle,
            environment: handle,
            lights: LightCounts {
                directional: 2,
                local: 5,
            },
        };
        assert_eq!(pass.record(&mut backend, &attachments, &inputs, [0.0; 4]), 3);

        let recorded = backend.pass(LABEL).unwrap();
        let depth = recorded.descriptor.depth_stencil_attachment.as_ref().unwrap();
        assert!(depth.read_only);
        let draws: Vec<_> = recorded.draws().cloned().collect();
        assert_eq!(
            draws[1],
            RecordedCommand::Draw {
                vertices: 0..3,
                instances: 0..2
            }
        );
        assert_eq!(
            draws[2],
            RecordedCommand::Draw {
                vertices: 0..6,
                instances: 0..5
            }
        );
    }

    #[test]
    fn test_no_lights_draws_ambient_only() {
        let mut backend = RecordingBackend::new(16, 16);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let pass = LightingPass::new(&mut backend, &layouts).unwrap();
        let mut scope = ResourceScope::new(&mut backend);
        let attachments = FrameAttachments::allocate(&mut scope, 16, 16, &DeferredConfig::default()).unwrap();
        let _owned = scope.commit();

        let handle = BindGroupHandle(1);
        let inputs = LightingInputs {
            frame: handle,
            gbuffer: handle,
            environment: handle,
            lights: LightCounts::default(),
        };
        assert_eq!(pass.record(&mut backend, &attachments, &inputs, [0.0; 4]), 1);
    }
}
