//! WGSL shader sources and validation.
//!
//! Scene pipelines get their source from a [`ShaderSourceGenerator`], which
//! specializes the vertex input for a geometry layout and the fragment stage
//! for a material variant. Fullscreen passes compose the shared snippets
//! below with their own fragment code.
//!
//! Bind group convention for scene pipelines:
//!
//! | group | contents |
//! |---|---|
//! | 0 | frame: camera, lights, lighting uniforms |
//! | 1 | per-frame instance storage buffer |
//! | 2 | material uniforms |
//! | 3 | joint matrices (skinned geometry only) |

mod generator;

pub use generator::WgslShaderGenerator;

use crate::layout::GeometryLayout;
use crate::resources::MaterialVariant;

/// Shader locations with a fixed meaning for generated scene shaders
pub mod locations {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const UV: u32 = 2;
    pub const TANGENT: u32 = 3;
    pub const JOINTS: u32 = 4;
    pub const WEIGHTS: u32 = 5;
}

/// Which scene pass a generated shader targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenePass {
    /// Writes albedo, normal and metal-rough targets
    GBuffer,
    /// Shades directly into the light accumulation target
    Forward,
}

/// Produces WGSL for a (layout, material variant, skinned) combination.
///
/// The output must contain `vs_main` and `fs_main` and only depend on its
/// inputs, since compiled pipelines are shared between every mesh with the
/// same combination.
pub trait ShaderSourceGenerator: Send + Sync {
    fn generate(
        &self,
        pass: ScenePass,
        layout: &GeometryLayout,
        variant: MaterialVariant,
        skinned: bool,
    ) -> String;
}

/// Parse and validate a WGSL module
pub fn validate_wgsl(source: &str) -> Result<(), String> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| format!("WGSL parse error: {}", e.emit_to_string(source)))?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| format!("Validation error: {e}"))?;
    Ok(())
}

/// Group 0 shared by scene and lighting shaders
pub const FRAME_BINDINGS: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct LightData {
    // xyz = position, w = radius
    position_radius: vec4<f32>,
    // xyz = color, w = intensity
    color_intensity: vec4<f32>,
    // xyz = direction, w = light type (0=point, 1=spot, 2=directional)
    direction_type: vec4<f32>,
    // x = cos(inner_angle), y = cos(outer_angle)
    spot_params: vec4<f32>,
}

struct LightingUniforms {
    // rgb = ambient color, a = environment intensity
    ambient: vec4<f32>,
    // x = all lights, y = directional lights (stored first)
    counts: vec4<u32>,
    // x = environment present
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(0) @binding(1) var<storage, read> lights: array<LightData>;
@group(0) @binding(2) var<uniform> lighting: LightingUniforms;
"#;

/// Blinn-Phong light evaluation; needs [`FRAME_BINDINGS`]
pub const LIGHT_FUNCTIONS: &str = r#"
fn calculate_light(
    light: LightData,
    world_pos: vec3<f32>,
    normal: vec3<f32>,
    albedo: vec3<f32>,
    metallic: f32,
    roughness: f32,
    view_dir: vec3<f32>,
) -> vec3<f32> {
    let light_type = u32(light.direction_type.w);
    var light_dir: vec3<f32>;
    var attenuation: f32 = 1.0;

    if light_type == 2u {
        light_dir = -normalize(light.direction_type.xyz);
    } else {
        let light_vec = light.position_radius.xyz - world_pos;
        let distance = length(light_vec);
        light_dir = light_vec / max(distance, 0.0001);

        let falloff = max(0.0, 1.0 - distance / light.position_radius.w);
        attenuation = falloff * falloff;

        if light_type == 1u {
            let cos_angle = dot(-light_dir, normalize(light.direction_type.xyz));
            let inner_cos = light.spot_params.x;
            let outer_cos = light.spot_params.y;
            attenuation = attenuation * saturate((cos_angle - outer_cos) / max(inner_cos - outer_cos, 0.0001));
        }
    }

    let ndotl = max(dot(normal, light_dir), 0.0);
    let diffuse = albedo * (1.0 - metallic);

    let half_vec = normalize(light_dir + view_dir);
    let ndoth = max(dot(normal, half_vec), 0.0);
    let shininess = mix(16.0, 128.0, 1.0 - roughness);
    let spec_strength = pow(ndoth, shininess) * (1.0 - roughness);
    let specular = mix(vec3<f32>(0.04), albedo, metallic) * spec_strength;

    return (diffuse * ndotl + specular) * light.color_intensity.xyz * light.color_intensity.w * attenuation;
}
"#;

/// Fullscreen triangle vertex stage: draw three vertices, no buffers
pub const FULLSCREEN_VERTEX: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var output: FullscreenOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_snippets_validate() {
        let source = format!(
            "{FRAME_BINDINGS}{LIGHT_FUNCTIONS}{FULLSCREEN_VERTEX}
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {{
    let light = calculate_light(lights[0], vec3<f32>(0.0), vec3<f32>(0.0, 1.0, 0.0), vec3<f32>(1.0), 0.0, 0.5, vec3<f32>(0.0, 0.0, 1.0));
    return vec4<f32>(light + lighting.ambient.rgb, 1.0);
}}
"
        );
        validate_wgsl(&source).unwrap();
    }

    #[test]
    fn test_invalid_source_is_reported() {
        let err = validate_wgsl("@vertex fn vs_main() -> @builtin(position) vec4<f32> { return 1; }")
            .unwrap_err();
        assert!(!err.is_empty());
        assert!(validate_wgsl("fn broken(").is_err());
    }
}
