//! G-Buffer generation pass for deferred rendering
//!
//! Renders opaque geometry to multiple render targets (MRT):
//! - Albedo (base color, alpha holds ambient occlusion)
//! - World-space normals (encoded)
//! - Material properties (metallic, roughness)
//! - Depth buffer

use super::attachments::FrameAttachments;
use super::*;
use crate::batching::{PipelineFactory, PipelineKey, RenderSet};
use crate::layout::GeometryLayout;
use crate::resources::RenderMaterial;
use crate::scene::SceneMesh;
use crate::shader::{ScenePass, ShaderSourceGenerator};
use std::sync::Arc;

pub const LABEL: &str = "G-Buffer Pass";

/// Vertex buffers, bind groups and primitive state shared by scene pipelines
pub(crate) fn scene_pipeline_descriptor(
    label: String,
    shader: String,
    layouts: &SceneLayouts,
    layout: &GeometryLayout,
    material: &RenderMaterial,
    skinned: bool,
) -> RenderPipelineDescriptor {
    let mut bind_group_layouts = vec![layouts.frame, layouts.instances, layouts.material];
    if skinned {
        bind_group_layouts.push(layouts.skin);
    }
    RenderPipelineDescriptor {
        label: Some(label),
        shader,
        has_fragment: true,
        vertex_layouts: layout.buffers().to_vec(),
        bind_group_layouts,
        primitive_topology: layout.topology(),
        strip_index_format: layout.strip_index_format(),
        front_face: FrontFace::Ccw,
        cull_mode: if material.variant().double_sided() {
            CullMode::None
        } else {
            CullMode::Back
        },
        depth_stencil: None,
        color_targets: Vec::new(),
    }
}

/// Compiles G-buffer pipelines and accepts opaque, lit meshes
pub struct GBufferPipelineFactory {
    generator: Arc<dyn ShaderSourceGenerator>,
    layouts: SceneLayouts,
}

impl GBufferPipelineFactory {
    pub fn new(generator: Arc<dyn ShaderSourceGenerator>, layouts: SceneLayouts) -> Self {
        Self { generator, layouts }
    }
}

impl PipelineFactory for GBufferPipelineFactory {
    fn label(&self) -> &str {
        "G-Buffer"
    }

    fn accepts(&self, _mesh: &SceneMesh, material: &RenderMaterial) -> bool {
        let variant = material.variant();
        !variant.transparent() && !variant.unlit()
    }

    fn create_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: &GeometryLayout,
        material: &RenderMaterial,
        skinned: bool,
        key: &PipelineKey,
    ) -> BackendResult<RenderPipelineHandle> {
        let shader = self
            .generator
            .generate(ScenePass::GBuffer, layout, material.variant(), skinned);
        let mut desc = scene_pipeline_descriptor(
            format!("G-Buffer {key}"),
            shader,
            &self.layouts,
            layout,
            material,
            skinned,
        );
        desc.depth_stencil = Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
        });
        desc.color_targets = vec![
            ColorTargetState::replace(ALBEDO_FORMAT),
            ColorTargetState::replace(NORMAL_FORMAT),
            ColorTargetState::replace(MATERIAL_FORMAT),
        ];
        backend.create_render_pipeline(&desc)
    }
}

/// Clears the G-buffer and draws the opaque render set into it
#[derive(Debug, Default)]
pub struct GBufferPass;

impl GBufferPass {
    pub fn new() -> Self {
        Self
    }

    pub fn record(
        &self,
        backend: &mut dyn GraphicsBackend,
        attachments: &FrameAttachments,
        frame_bind_group: BindGroupHandle,
        opaque: &RenderSet,
    ) -> u32 {
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(LABEL.into()),
            color_attachments: vec![
                ColorAttachment::clear(attachments.albedo.view, [0.0, 0.0, 0.0, 1.0]),
                ColorAttachment::clear(attachments.normal.view, [0.0, 0.0, 0.0, 0.0]),
                // Default roughness 0.5
                ColorAttachment::clear(attachments.material.view, [0.0, 0.5, 0.0, 0.0]),
            ],
            depth_stencil_attachment: Some(DepthStencilAttachment::clear(attachments.depth.view, 1.0)),
        });
        backend.set_viewport(
            0.0,
            0.0,
            attachments.width as f32,
            attachments.height as f32,
            0.0,
            1.0,
        );

        let draws = if opaque.is_empty() {
            0
        } else {
            backend.set_bind_group(0, frame_bind_group);
            opaque.draw(backend)
        };
        backend.end_render_pass();
        draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::GeometryLayoutCache;
    use crate::resources::{Material, MeshData};
    use crate::shader::WgslShaderGenerator;

    #[test]
    fn test_factory_filters_and_compiles() {
        let mut backend = RecordingBackend::new(4, 4);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let cache = GeometryLayoutCache::new();
        let geometry = Arc::new(MeshData::cube().upload(&mut backend, &cache).unwrap());

        let opaque = RenderMaterial::builder(Material::plastic(glam::Vec3::ONE))
            .double_sided(true)
            .build(&mut backend, layouts.material)
            .unwrap();
        let glass = RenderMaterial::builder(Material::glass())
            .transparent(true)
            .build(&mut backend, layouts.material)
            .unwrap();

        let mut factory = GBufferPipelineFactory::new(Arc::new(WgslShaderGenerator), layouts);
        let mesh = SceneMesh::new(Arc::clone(&geometry), None);
        assert!(factory.accepts(&mesh, &opaque));
        assert!(!factory.accepts(&mesh, &glass));

        let key = PipelineKey::new(geometry.layout().id(), opaque.variant(), false);
        let pipeline = factory
            .create_pipeline(&mut backend, geometry.layout(), &opaque, false, &key)
            .unwrap();
        let desc = backend.pipeline(pipeline).unwrap();
        assert_eq!(desc.color_targets.len(), 3);
        assert_eq!(desc.cull_mode, CullMode::None);
        assert_eq!(desc.bind_group_layouts.len(), 3);
        assert!(desc.depth_stencil.as_ref().unwrap().depth_write_enabled);
        crate::shader::validate_wgsl(&desc.shader).unwrap();
    }
}
