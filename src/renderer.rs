//! Frame orchestration for the deferred pipeline
//!
//! [`DeferredRenderer`] owns the backend, the size-dependent
//! [`FrameTargets`], both render-set batchers and every pass. A frame is
//! recorded in a fixed order; see [`crate::pipeline`] for the sequence.

use crate::backend::*;
use crate::batching::RenderSetBatcher;
use crate::error::{RenderError, RenderResult};
use crate::layout::GeometryLayoutCache;
use crate::pipeline::attachments::{FrameAttachments, FrameBindings, ResourceScope};
use crate::pipeline::debug_overlay::{self, DebugBindings};
use crate::pipeline::forward_pass::{self, ForwardInputs};
use crate::pipeline::lighting_pass::{self, LightingInputs};
use crate::pipeline::postprocess::{bloom, tonemapping};
use crate::pipeline::{
    gbuffer_pass, ssao_pass, uniform_buffer, BloomPass, DebugOverlayPass, DeferredConfig,
    ForwardPass, ForwardPipelineFactory, FrameTargets, GBufferPass, GBufferPipelineFactory,
    LightingPass, Samplers, SceneLayouts, SsaoPass, TonemappingPass,
};
use crate::resources::{Material, MeshData, RenderGeometry, RenderMaterial, RenderMaterialBuilder};
use crate::scene::{Camera, Environment, LightManager, SceneFrame};
use crate::shader::{ShaderSourceGenerator, WgslShaderGenerator};
use glam::Vec3;
use std::path::Path;
use std::sync::Arc;

/// Draw calls recorded by one stage of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub label: &'static str,
    pub draw_calls: u32,
}

/// What [`DeferredRenderer::render`] recorded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Executed stages in recording order
    pub passes: Vec<PassStats>,
    pub opaque_instances: u32,
    pub opaque_batches: usize,
    pub forward_instances: u32,
    pub forward_batches: usize,
}

impl FrameStats {
    pub fn draw_calls(&self, label: &str) -> Option<u32> {
        self.passes
            .iter()
            .find(|pass| pass.label == label)
            .map(|pass| pass.draw_calls)
    }

    pub fn total_draw_calls(&self) -> u32 {
        self.passes.iter().map(|pass| pass.draw_calls).sum()
    }

    pub fn pass_labels(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.label).collect()
    }

    fn push(&mut self, label: &'static str, draw_calls: u32) {
        self.passes.push(PassStats { label, draw_calls });
    }
}

/// Passes that live for the whole renderer lifetime
struct FramePasses {
    gbuffer: GBufferPass,
    ssao: Option<SsaoPass>,
    lighting: LightingPass,
    forward: ForwardPass,
    bloom: Option<BloomPass>,
    tonemap: TonemappingPass,
    debug: Option<DebugOverlayPass>,
}

impl FramePasses {
    fn new(
        backend: &mut dyn GraphicsBackend,
        layouts: &SceneLayouts,
        samplers: &Samplers,
        config: &DeferredConfig,
    ) -> BackendResult<Self> {
        let ssao = match config.ssao {
            Some(settings) => Some(SsaoPass::new(backend, layouts, settings)?),
            None => None,
        };
        let bloom = match config.bloom {
            Some(settings) => Some(BloomPass::new(backend, settings, samplers.linear)?),
            None => None,
        };
        let debug = if config.debug_views.is_empty() {
            None
        } else {
            Some(DebugOverlayPass::new(backend, config.debug_views.clone())?)
        };
        Ok(Self {
            gbuffer: GBufferPass::new(),
            ssao,
            lighting: LightingPass::new(backend, layouts)?,
            forward: ForwardPass::new(backend, layouts, config)?,
            bloom,
            tonemap: TonemappingPass::new(
                backend,
                config.tonemap,
                config.bloom.map(|b| b.intensity),
                samplers.linear,
            )?,
            debug,
        })
    }

    /// Allocate every attachment and binding set for `width` x `height`.
    /// On error nothing created here survives.
    fn build_targets(
        &self,
        backend: &mut dyn GraphicsBackend,
        layouts: &SceneLayouts,
        config: &DeferredConfig,
        width: u32,
        height: u32,
    ) -> RenderResult<FrameTargets> {
        let mut scope = ResourceScope::new(backend);
        let attachments = FrameAttachments::allocate(&mut scope, width, height, config)?;
        let gbuffer = scope.bind_group(layouts.gbuffer, &attachments.gbuffer_entries())?;
        let ssao = match &self.ssao {
            Some(pass) => Some(pass.bind(&mut scope, &attachments)?),
            None => None,
        };
        let bloom = match &self.bloom {
            Some(pass) => Some(pass.bind(&mut scope, &attachments)?),
            None => None,
        };
        let tonemap = self.tonemap.bind(&mut scope, &attachments)?;
        let debug = match &self.debug {
            Some(pass) => pass.bind(&mut scope, &attachments)?,
            None => DebugBindings::default(),
        };
        let owned = scope.commit();

        Ok(FrameTargets::new(
            attachments,
            FrameBindings {
                gbuffer,
                ssao,
                bloom,
                tonemap,
                debug,
            },
            owned,
        ))
    }
}

/// Deferred renderer over any [`GraphicsBackend`]
pub struct DeferredRenderer<B: GraphicsBackend> {
    backend: B,
    config: DeferredConfig,
    layout_cache: Arc<GeometryLayoutCache>,
    layouts: SceneLayouts,
    camera_buffer: BufferHandle,
    lights: LightManager,
    frame_bind_group: BindGroupHandle,
    fallback_environment: Environment,
    opaque: RenderSetBatcher<GBufferPipelineFactory>,
    forward: RenderSetBatcher<ForwardPipelineFactory>,
    passes: FramePasses,
    targets: Option<FrameTargets>,
}

impl<B: GraphicsBackend> DeferredRenderer<B> {
    /// Create a renderer with the built-in WGSL generator.
    ///
    /// Fullscreen pipelines are compiled here; scene pipelines are compiled
    /// on first use. Call [`resize`](Self::resize) before rendering.
    pub fn new(backend: B, config: DeferredConfig) -> RenderResult<Self> {
        Self::with_generator(backend, config, Arc::new(WgslShaderGenerator))
    }

    pub fn with_generator(
        mut backend: B,
        config: DeferredConfig,
        generator: Arc<dyn ShaderSourceGenerator>,
    ) -> RenderResult<Self> {
        let layouts = SceneLayouts::new(&mut backend)?;
        let samplers = Samplers::new(&mut backend)?;

        let camera_buffer = uniform_buffer(&mut backend, "Camera", &Camera::default().uniform_data())?;
        let lights = LightManager::new(&mut backend, config.max_lights)?;
        let frame_bind_group = backend.create_bind_group(
            layouts.frame,
            &[
                (0, BindGroupEntry::buffer(camera_buffer)),
                (1, BindGroupEntry::buffer(lights.light_buffer())),
                (2, BindGroupEntry::buffer(lights.uniform_buffer())),
            ],
        )?;
        let fallback_environment = Environment::fallback(&mut backend, layouts.environment)?;

        let default_material = Arc::new(
            RenderMaterial::builder(Material::default()).build(&mut backend, layouts.material)?,
        );
        let opaque = RenderSetBatcher::new(
            &mut backend,
            GBufferPipelineFactory::new(Arc::clone(&generator), layouts),
            layouts.instances,
            Arc::clone(&default_material),
            config.initial_instance_capacity,
        )?;
        let forward = RenderSetBatcher::new(
            &mut backend,
            ForwardPipelineFactory::new(generator, layouts),
            layouts.instances,
            default_material,
            config.initial_instance_capacity,
        )?;

        let passes = FramePasses::new(&mut backend, &layouts, &samplers, &config)?;
        log::info!(
            "Deferred renderer ready (ssao: {}, bloom: {}, {} debug views)",
            passes.ssao.is_some(),
            passes.bloom.is_some(),
            config.debug_views.len()
        );

        Ok(Self {
            backend,
            config,
            layout_cache: Arc::new(GeometryLayoutCache::new()),
            layouts,
            camera_buffer,
            lights,
            frame_bind_group,
            fallback_environment,
            opaque,
            forward,
            passes,
            targets: None,
        })
    }

    /// Rebuild every size-dependent resource for a new render target size.
    ///
    /// Returns `Ok(false)` when the size is unchanged. On failure the
    /// previous targets stay in place.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<bool> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSize { width, height });
        }
        if self.targets.as_ref().map(FrameTargets::size) == Some((width, height)) {
            return Ok(false);
        }

        let targets =
            self.passes
                .build_targets(&mut self.backend, &self.layouts, &self.config, width, height)?;
        log::debug!("Frame targets rebuilt at {width}x{height}");
        if let Some(previous) = self.targets.replace(targets) {
            previous.release(&mut self.backend);
        }
        Ok(true)
    }

    pub fn update_camera(&mut self, camera: &Camera) {
        self.backend.write_buffer(
            self.camera_buffer,
            0,
            bytemuck::bytes_of(&camera.uniform_data()),
        );
    }

    /// Record one frame into `output`.
    ///
    /// Both render sets are built before any pass is recorded, so a
    /// pipeline compilation failure aborts the frame with nothing drawn.
    pub fn render(
        &mut self,
        output: TextureViewHandle,
        camera: &Camera,
        scene: &SceneFrame,
    ) -> RenderResult<FrameStats> {
        if self.targets.is_none() {
            return Err(RenderError::NotSized);
        }

        let opaque = self.opaque.get_render_set(&mut self.backend, &scene.meshes)?;
        let transparent = self.forward.get_render_set(&mut self.backend, &scene.meshes)?;

        self.update_camera(camera);
        let environment = scene.environment.as_deref();
        let lights = self.lights.update(
            &mut self.backend,
            &scene.lights,
            scene.ambient,
            environment.map(Environment::intensity),
        );

        let Some(targets) = self.targets.as_ref() else {
            return Err(RenderError::NotSized);
        };
        let attachments = &targets.attachments;
        let bindings = &targets.bindings;
        let passes = &self.passes;
        let backend: &mut dyn GraphicsBackend = &mut self.backend;

        let mut stats = FrameStats {
            opaque_instances: opaque.total_instance_count(),
            opaque_batches: opaque.batches().len(),
            forward_instances: transparent.total_instance_count(),
            forward_batches: transparent.batches().len(),
            ..Default::default()
        };

        let draws = passes
            .gbuffer
            .record(backend, attachments, self.frame_bind_group, &opaque);
        stats.push(gbuffer_pass::LABEL, draws);

        if let (Some(pass), Some(ssao)) = (&passes.ssao, &bindings.ssao) {
            let draws = pass.record(backend, attachments, ssao, self.frame_bind_group);
            stats.push(ssao_pass::LABEL, draws);
        }

        let inputs = LightingInputs {
            frame: self.frame_bind_group,
            gbuffer: bindings.gbuffer,
            environment: environment
                .unwrap_or(&self.fallback_environment)
                .bind_group(),
            lights,
        };
        let draws = passes
            .lighting
            .record(backend, attachments, &inputs, self.config.clear_color);
        stats.push(lighting_pass::LABEL, draws);

        let inputs = ForwardInputs {
            frame: self.frame_bind_group,
            environment: environment.map(Environment::bind_group),
            local_lights: lights.local,
        };
        let draws = passes
            .forward
            .record(backend, attachments, &inputs, &transparent);
        stats.push(forward_pass::LABEL, draws);

        if let (Some(pass), Some(bloom)) = (&passes.bloom, &bindings.bloom) {
            let draws = pass.record(backend, attachments, bloom);
            stats.push(bloom::LABEL, draws);
        }

        let draws = passes.tonemap.record(
            backend,
            output,
            bindings.tonemap,
            attachments.width,
            attachments.height,
        );
        stats.push(tonemapping::LABEL, draws);

        if let Some(pass) = &passes.debug {
            let draws = pass.record(
                backend,
                output,
                &bindings.debug,
                attachments.width,
                attachments.height,
            );
            if draws > 0 {
                stats.push(debug_overlay::LABEL, draws);
            }
        }

        log::trace!(
            "Frame: {} passes, {} draw calls",
            stats.passes.len(),
            stats.total_draw_calls()
        );
        Ok(stats)
    }

    /// Acquire the next surface image, follow its size, render and present.
    /// A zero-sized surface (minimized window) skips the frame.
    pub fn render_to_surface(&mut self, camera: &Camera, scene: &SceneFrame) -> RenderResult<FrameStats> {
        let (width, height) = self.backend.surface_size();
        if width == 0 || height == 0 {
            log::debug!("Skipping frame for {width}x{height} surface");
            return Ok(FrameStats::default());
        }
        self.resize(width, height)?;

        let frame = self.backend.begin_frame()?;
        let result = self.render(frame.swapchain_view, camera, scene);
        self.backend.end_frame()?;
        result
    }

    /// Finish a material description and upload it
    pub fn create_material(&mut self, builder: RenderMaterialBuilder) -> RenderResult<Arc<RenderMaterial>> {
        Ok(Arc::new(builder.build(&mut self.backend, self.layouts.material)?))
    }

    /// Upload a mesh, interning its vertex layout in the renderer's cache
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<Arc<RenderGeometry>> {
        Ok(Arc::new(mesh.upload(&mut self.backend, &self.layout_cache)?))
    }

    /// Equirectangular RGBA8 sRGB environment map
    pub fn create_environment(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        intensity: f32,
    ) -> RenderResult<Arc<Environment>> {
        Ok(Arc::new(Environment::from_rgba8(
            &mut self.backend,
            self.layouts.environment,
            width,
            height,
            pixels,
            intensity,
        )?))
    }

    /// Decode an image file (PNG, JPEG, HDR, ...) as an equirectangular environment
    pub fn load_environment(
        &mut self,
        path: impl AsRef<Path>,
        intensity: f32,
    ) -> RenderResult<Arc<Environment>> {
        let path = path.as_ref();
        let image = image::open(path)?;
        log::info!("Loaded environment {}", path.display());
        Ok(Arc::new(Environment::from_image(
            &mut self.backend,
            self.layouts.environment,
            &image,
            intensity,
        )?))
    }

    /// Procedural sky gradient environment
    pub fn create_sky_environment(
        &mut self,
        zenith: Vec3,
        horizon: Vec3,
        ground: Vec3,
        intensity: f32,
    ) -> RenderResult<Arc<Environment>> {
        Ok(Arc::new(Environment::gradient(
            &mut self.backend,
            self.layouts.environment,
            zenith,
            horizon,
            ground,
            intensity,
        )?))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn layout_cache(&self) -> &Arc<GeometryLayoutCache> {
        &self.layout_cache
    }

    pub fn layouts(&self) -> &SceneLayouts {
        &self.layouts
    }

    pub fn config(&self) -> &DeferredConfig {
        &self.config
    }

    pub fn targets(&self) -> Option<&FrameTargets> {
        self.targets.as_ref()
    }

    pub fn is_sized(&self) -> bool {
        self.targets.is_some()
    }

    pub fn opaque_batcher(&self) -> &RenderSetBatcher<GBufferPipelineFactory> {
        &self.opaque
    }

    pub fn forward_batcher(&self) -> &RenderSetBatcher<ForwardPipelineFactory> {
        &self.forward
    }

    pub fn lights(&self) -> &LightManager {
        &self.lights
    }
}
