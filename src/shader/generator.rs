use super::{locations, ScenePass, ShaderSourceGenerator, FRAME_BINDINGS, LIGHT_FUNCTIONS};
use crate::backend::types::{VertexAttribute, VertexFormat};
use crate::layout::GeometryLayout;
use crate::resources::MaterialVariant;
use std::fmt::Write;

/// Default generator for G-buffer and forward scene shaders
#[derive(Debug, Clone, Copy, Default)]
pub struct WgslShaderGenerator;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Float,
    Uint,
    Sint,
}

fn scalar_kind(format: VertexFormat) -> ScalarKind {
    match format {
        VertexFormat::Uint8x2
        | VertexFormat::Uint8x4
        | VertexFormat::Uint16x2
        | VertexFormat::Uint16x4
        | VertexFormat::Uint32
        | VertexFormat::Uint32x2
        | VertexFormat::Uint32x3
        | VertexFormat::Uint32x4 => ScalarKind::Uint,
        VertexFormat::Sint8x2
        | VertexFormat::Sint8x4
        | VertexFormat::Sint16x2
        | VertexFormat::Sint16x4
        | VertexFormat::Sint32
        | VertexFormat::Sint32x2
        | VertexFormat::Sint32x3
        | VertexFormat::Sint32x4 => ScalarKind::Sint,
        _ => ScalarKind::Float,
    }
}

fn wgsl_type(format: VertexFormat) -> String {
    let scalar = match scalar_kind(format) {
        ScalarKind::Float => "f32",
        ScalarKind::Uint => "u32",
        ScalarKind::Sint => "i32",
    };
    match format.components() {
        1 => scalar.to_string(),
        n => format!("vec{n}<{scalar}>"),
    }
}

/// Read an attribute as a `vecN<f32>` expression, padding with zeros (and
/// w = 1) or truncating as needed.
fn read_float(attribute: Option<&VertexAttribute>, width: u32, default: &str) -> String {
    let Some(attribute) = attribute else {
        return default.to_string();
    };
    let components = attribute.format.components();
    let raw = format!("input.attr{}", attribute.location);
    let value = match (scalar_kind(attribute.format), components) {
        (ScalarKind::Float, _) => raw,
        (_, 1) => format!("f32({raw})"),
        (_, n) => format!("vec{n}<f32>({raw})"),
    };

    if components == width {
        return value;
    }
    if components > width {
        let swizzle = &"xyzw"[..width as usize];
        return format!("({value}).{swizzle}");
    }
    let padding = ["0.0", "0.0", "0.0", "1.0"][components as usize..width as usize].join(", ");
    format!("vec{width}<f32>({value}, {padding})")
}

fn read_joints(attribute: Option<&VertexAttribute>) -> String {
    match attribute {
        Some(a) if scalar_kind(a.format) == ScalarKind::Uint && a.format.components() == 4 => {
            format!("input.attr{}", a.location)
        }
        Some(a) => format!("vec4<u32>({})", read_float(Some(a), 4, "")),
        None => "vec4<u32>(0u)".to_string(),
    }
}

impl WgslShaderGenerator {
    fn vertex_stage(&self, layout: &GeometryLayout, skinned: bool) -> String {
        let mut out = String::new();

        out.push_str("struct VertexInput {\n    @builtin(instance_index) instance_index: u32,\n");
        for buffer in layout.buffers() {
            for attribute in &buffer.attributes {
                let _ = writeln!(
                    out,
                    "    @location({0}) attr{0}: {1},",
                    attribute.location,
                    wgsl_type(attribute.format)
                );
            }
        }
        out.push_str("}\n");

        out.push_str(
            r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct Instance {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
}

@group(1) @binding(0) var<storage, read> instances: array<Instance>;
"#,
        );
        if skinned {
            out.push_str("@group(3) @binding(0) var<storage, read> joint_matrices: array<mat4x4<f32>>;\n");
        }

        let position = read_float(layout.attribute(locations::POSITION), 3, "vec3<f32>(0.0)");
        let normal = read_float(layout.attribute(locations::NORMAL), 3, "vec3<f32>(0.0, 1.0, 0.0)");
        let uv = read_float(layout.attribute(locations::UV), 2, "vec2<f32>(0.0)");

        let _ = write!(
            out,
            r#"
@vertex
fn vs_main(input: VertexInput) -> VertexOutput {{
    let instance = instances[input.instance_index];
    var local_position = vec4<f32>({position}, 1.0);
    var local_normal = vec4<f32>({normal}, 0.0);
"#
        );
        if skinned {
            let joints = read_joints(layout.attribute(locations::JOINTS));
            let weights = read_float(
                layout.attribute(locations::WEIGHTS),
                4,
                "vec4<f32>(1.0, 0.0, 0.0, 0.0)",
            );
            let _ = write!(
                out,
                r#"    let joints = {joints};
    let weights = {weights};
    let skin = joint_matrices[joints.x] * weights.x
        + joint_matrices[joints.y] * weights.y
        + joint_matrices[joints.z] * weights.z
        + joint_matrices[joints.w] * weights.w;
    local_position = skin * local_position;
    local_normal = skin * local_normal;
"#
            );
        }
        let _ = write!(
            out,
            r#"
    let world_position = instance.model * local_position;
    var output: VertexOutput;
    output.world_position = world_position.xyz;
    output.clip_position = camera.view_proj * world_position;
    output.world_normal = normalize((instance.normal_matrix * local_normal).xyz);
    output.uv = {uv};
    return output;
}}
"#
        );
        out
    }

    fn fragment_prologue(&self, variant: MaterialVariant) -> (String, String) {
        let signature = if variant.double_sided() {
            "input: VertexOutput, @builtin(front_facing) front_facing: bool".to_string()
        } else {
            "input: VertexOutput".to_string()
        };
        let mut body = String::from("    let base_color = material.base_color;\n");
        if variant.discard() {
            body.push_str("    if base_color.a < material.metallic_roughness.z {\n        discard;\n    }\n");
        }
        body.push_str("    var normal = normalize(input.world_normal);\n");
        if variant.double_sided() {
            body.push_str("    if !front_facing {\n        normal = -normal;\n    }\n");
        }
        (signature, body)
    }

    fn gbuffer_fragment(&self, variant: MaterialVariant) -> String {
        let (signature, prologue) = self.fragment_prologue(variant);
        format!(
            r#"
struct GBufferOutput {{
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) material: vec4<f32>,
}}

@fragment
fn fs_main({signature}) -> GBufferOutput {{
{prologue}
    var output: GBufferOutput;
    // Alpha holds ambient occlusion, multiplied in by the SSAO pass
    output.albedo = vec4<f32>(base_color.rgb, 1.0);
    output.normal = vec4<f32>(normal * 0.5 + 0.5, 1.0);
    output.material = vec4<f32>(material.metallic_roughness.xy, 0.0, 1.0);
    return output;
}}
"#
        )
    }

    fn forward_fragment(&self, variant: MaterialVariant) -> String {
        let (signature, prologue) = self.fragment_prologue(variant);
        let shading = if variant.unlit() {
            "    let color = base_color.rgb + emissive;\n".to_string()
        } else {
            r#"    let view_dir = normalize(camera.position.xyz - input.world_position);
    let metallic = material.metallic_roughness.x;
    let roughness = material.metallic_roughness.y;
    var color = lighting.ambient.rgb * base_color.rgb + emissive;
    for (var i = 0u; i < lighting.counts.x; i = i + 1u) {
        color = color + calculate_light(lights[i], input.world_position, normal, base_color.rgb, metallic, roughness, view_dir);
    }
"#
            .to_string()
        };
        format!(
            r#"
{LIGHT_FUNCTIONS}
@fragment
fn fs_main({signature}) -> @location(0) vec4<f32> {{
{prologue}
    let emissive = material.emissive.rgb * material.emissive.w;
{shading}
    return vec4<f32>(color, base_color.a);
}}
"#
        )
    }
}

impl ShaderSourceGenerator for WgslShaderGenerator {
    fn generate(
        &self,
        pass: ScenePass,
        layout: &GeometryLayout,
        variant: MaterialVariant,
        skinned: bool,
    ) -> String {
        let mut source = format!(
            "// {pass:?} shader for {} ({}), variant {variant}{}\n",
            layout.id(),
            layout.key(),
            if skinned { ", skinned" } else { "" },
        );
        source.push_str(FRAME_BINDINGS);
        source.push_str(
            r#"
struct MaterialUniforms {
    base_color: vec4<f32>,
    // x = metallic, y = roughness, z = alpha cutoff
    metallic_roughness: vec4<f32>,
    // rgb = emissive color, a = strength
    emissive: vec4<f32>,
}

@group(2) @binding(0) var<uniform> material: MaterialUniforms;
"#,
        );
        source.push_str(&self.vertex_stage(layout, skinned));
        source.push_str(&match pass {
            ScenePass::GBuffer => self.gbuffer_fragment(variant),
            ScenePass::Forward => self.forward_fragment(variant),
        });
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::*;
    use crate::layout::GeometryLayoutCache;
    use crate::shader::validate_wgsl;

    fn skinned_layout(cache: &GeometryLayoutCache) -> std::sync::Arc<GeometryLayout> {
        let skin = VertexBufferLayout {
            array_stride: 20,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute::new(4, VertexFormat::Uint8x4, 0),
                VertexAttribute::new(5, VertexFormat::Float32x4, 4),
            ],
        };
        cache
            .create_layout(&[Vertex::layout(), skin], PrimitiveTopology::TriangleList, None)
            .unwrap()
    }

    #[test]
    fn test_every_variant_validates() {
        let cache = GeometryLayoutCache::new();
        let standard = cache
            .create_layout(&[Vertex::layout()], PrimitiveTopology::TriangleList, None)
            .unwrap();
        let skinned = skinned_layout(&cache);
        let generator = WgslShaderGenerator;

        for bits in 0..16u8 {
            let variant = MaterialVariant::from_bits(bits);
            for pass in [ScenePass::GBuffer, ScenePass::Forward] {
                let source = generator.generate(pass, &standard, variant, false);
                if let Err(e) = validate_wgsl(&source) {
                    panic!("{pass:?} variant {variant}: {e}\n{source}");
                }
                let source = generator.generate(pass, &skinned, variant, true);
                if let Err(e) = validate_wgsl(&source) {
                    panic!("{pass:?} skinned variant {variant}: {e}\n{source}");
                }
            }
        }
    }

    #[test]
    fn test_unusual_formats_are_converted() {
        let cache = GeometryLayoutCache::new();
        let layout = cache
            .create_layout(
                &[VertexBufferLayout {
                    array_stride: 16,
                    step_mode: VertexStepMode::Vertex,
                    attributes: vec![
                        VertexAttribute::new(0, VertexFormat::Sint16x4, 0),
                        VertexAttribute::new(1, VertexFormat::Snorm8x4, 8),
                        VertexAttribute::new(2, VertexFormat::Unorm16x2, 12),
                    ],
                }],
                PrimitiveTopology::TriangleStrip,
                None,
            )
            .unwrap();
        let source = WgslShaderGenerator.generate(
            ScenePass::GBuffer,
            &layout,
            MaterialVariant::empty(),
            false,
        );
        assert!(source.contains("@location(0) attr0: vec4<i32>"));
        assert!(source.contains("(vec4<f32>(input.attr0)).xyz"));
        validate_wgsl(&source).unwrap();
    }

    #[test]
    fn test_read_float_padding() {
        let a = VertexAttribute::new(7, VertexFormat::Float32x2, 0);
        assert_eq!(read_float(Some(&a), 4, ""), "vec4<f32>(input.attr7, 0.0, 1.0)");
        assert_eq!(read_float(Some(&a), 2, ""), "input.attr7");
        assert_eq!(read_float(None, 3, "vec3<f32>(0.0)"), "vec3<f32>(0.0)");
        let u = VertexAttribute::new(1, VertexFormat::Uint32, 0);
        assert_eq!(read_float(Some(&u), 3, ""), "vec3<f32>(f32(input.attr1), 0.0, 0.0)");
    }
}
