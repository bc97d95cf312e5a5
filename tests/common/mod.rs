//! Shared fixtures for the integration tests.
//!
//! Everything runs on the [`RecordingBackend`], so no GPU is needed.

#![allow(dead_code)]

use std::sync::Arc;

use deferred_renderer::backend::{RecordingBackend, TextureViewHandle};
use deferred_renderer::pipeline::{GBufferPipelineFactory, ForwardPipelineFactory, SceneLayouts};
use deferred_renderer::resources::{Material, MeshData, RenderGeometry, RenderMaterial};
use deferred_renderer::shader::WgslShaderGenerator;
use deferred_renderer::{
    DeferredConfig, DeferredRenderer, GeometryLayoutCache, GraphicsBackend, RenderSetBatcher,
};

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Renderer fixtures
// ============================================================================

pub fn renderer(config: DeferredConfig) -> DeferredRenderer<RecordingBackend> {
    init_logging();
    DeferredRenderer::new(RecordingBackend::new(WIDTH, HEIGHT), config)
        .expect("renderer should build on the recording backend")
}

/// Renderer already sized to `WIDTH` x `HEIGHT`
pub fn sized_renderer(config: DeferredConfig) -> DeferredRenderer<RecordingBackend> {
    let mut renderer = renderer(config);
    assert!(renderer.resize(WIDTH, HEIGHT).unwrap());
    renderer
}

pub fn minimal_config() -> DeferredConfig {
    DeferredConfig {
        ssao: None,
        bloom: None,
        ..Default::default()
    }
}

/// Begin a frame and drop whatever was recorded before it
pub fn begin_frame(renderer: &mut DeferredRenderer<RecordingBackend>) -> TextureViewHandle {
    let backend = renderer.backend_mut();
    backend.clear_passes();
    backend
        .begin_frame()
        .expect("recording backend always acquires")
        .swapchain_view
}

// ============================================================================
// Batching fixtures
// ============================================================================

/// Opaque and forward batchers over their own recording backend
pub struct BatchingFixture {
    pub backend: RecordingBackend,
    pub layouts: SceneLayouts,
    pub cache: GeometryLayoutCache,
    pub opaque: RenderSetBatcher<GBufferPipelineFactory>,
    pub forward: RenderSetBatcher<ForwardPipelineFactory>,
}

impl BatchingFixture {
    pub fn new() -> Self {
        init_logging();
        let mut backend = RecordingBackend::new(WIDTH, HEIGHT);
        let layouts = SceneLayouts::new(&mut backend).unwrap();
        let default_material = Arc::new(
            RenderMaterial::builder(Material::default())
                .build(&mut backend, layouts.material)
                .unwrap(),
        );
        let generator = Arc::new(WgslShaderGenerator);
        let opaque = RenderSetBatcher::new(
            &mut backend,
            GBufferPipelineFactory::new(generator.clone(), layouts),
            layouts.instances,
            Arc::clone(&default_material),
            4,
        )
        .unwrap();
        let forward = RenderSetBatcher::new(
            &mut backend,
            ForwardPipelineFactory::new(generator, layouts),
            layouts.instances,
            default_material,
            4,
        )
        .unwrap();

        Self {
            backend,
            layouts,
            cache: GeometryLayoutCache::new(),
            opaque,
            forward,
        }
    }

    pub fn mesh(&mut self, data: &MeshData) -> Arc<RenderGeometry> {
        Arc::new(data.upload(&mut self.backend, &self.cache).unwrap())
    }

    pub fn material(&mut self, material: Material) -> Arc<RenderMaterial> {
        Arc::new(
            RenderMaterial::builder(material)
                .build(&mut self.backend, self.layouts.material)
                .unwrap(),
        )
    }

    pub fn transparent_material(&mut self, material: Material) -> Arc<RenderMaterial> {
        Arc::new(
            RenderMaterial::builder(material)
                .transparent(true)
                .build(&mut self.backend, self.layouts.material)
                .unwrap(),
        )
    }
}
