//! # Deferred Viewer
//!
//! Demonstrates:
//! - Opaque PBR materials through the G-buffer and deferred lighting
//! - Transparent and unlit meshes through the forward pass
//! - Orbiting point lights, a sun and a procedural sky environment
//! - SSAO, bloom and the debug overlay, toggled from the command line
//!
//! ```text
//! cargo run --example viewer -- --lights 32 --debug albedo --debug normal
//! ```

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use deferred_renderer::pipeline::TonemapOperator;
use deferred_renderer::resources::{Material, MeshData, RenderMaterial};
use deferred_renderer::scene::{PointLight, Transform};
use deferred_renderer::{
    Camera, DebugView, DeferredConfig, DeferredRenderer, EngineConfig, GraphicsBackend, RenderError,
    SceneFrame, SceneMesh, WgpuBackend,
};
use glam::{Quat, Vec3, Vec4};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DebugArg {
    Albedo,
    Normal,
    MetalRough,
    Occlusion,
    Depth,
    Light,
    Bloom,
}

impl From<DebugArg> for DebugView {
    fn from(arg: DebugArg) -> Self {
        match arg {
            DebugArg::Albedo => DebugView::Albedo,
            DebugArg::Normal => DebugView::Normal,
            DebugArg::MetalRough => DebugView::MetalRough,
            DebugArg::Occlusion => DebugView::Occlusion,
            DebugArg::Depth => DebugView::Depth,
            DebugArg::Light => DebugView::Light,
            DebugArg::Bloom => DebugView::Bloom,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TonemapArg {
    Reinhard,
    Aces,
    Uncharted2,
    None,
}

impl From<TonemapArg> for TonemapOperator {
    fn from(arg: TonemapArg) -> Self {
        match arg {
            TonemapArg::Reinhard => TonemapOperator::Reinhard,
            TonemapArg::Aces => TonemapOperator::Aces,
            TonemapArg::Uncharted2 => TonemapOperator::Uncharted2,
            TonemapArg::None => TonemapOperator::None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Deferred renderer viewer")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Number of orbiting point lights
    #[arg(long, default_value_t = 16)]
    lights: u32,
    /// Grid size of the sphere field
    #[arg(long, default_value_t = 7)]
    grid: u32,
    #[arg(long)]
    no_ssao: bool,
    #[arg(long)]
    no_bloom: bool,
    #[arg(long)]
    no_vsync: bool,
    #[arg(long)]
    light_sprites: bool,
    #[arg(long, value_enum, default_value_t = TonemapArg::Aces)]
    tonemap: TonemapArg,
    #[arg(long, default_value_t = 1.0)]
    exposure: f32,
    /// Equirectangular image used instead of the procedural sky
    #[arg(long)]
    environment: Option<PathBuf>,
    /// Intermediate target to show as an overlay tile (repeatable)
    #[arg(long = "debug", value_enum)]
    debug_views: Vec<DebugArg>,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut deferred = DeferredConfig {
            debug_views: self.debug_views.iter().copied().map(DebugView::from).collect(),
            light_sprites: self.light_sprites,
            ..Default::default()
        };
        if self.no_ssao {
            deferred.ssao = None;
        }
        if self.no_bloom {
            deferred.bloom = None;
        }
        deferred.tonemap.operator = self.tonemap.into();
        deferred.tonemap.exposure = self.exposure;

        EngineConfig {
            title: "Deferred Viewer".to_string(),
            width: self.width,
            height: self.height,
            vsync: !self.no_vsync,
            deferred,
        }
    }
}

struct Viewer {
    renderer: DeferredRenderer<WgpuBackend>,
    camera: Camera,
    scene: SceneFrame,
    light_count: u32,
    started: Instant,
    frames: u32,
    last_report: Instant,
}

impl Viewer {
    fn new(window: &deferred_renderer::Window, config: &EngineConfig, args: &Args) -> Result<Self, RenderError> {
        let backend = WgpuBackend::new(window.window_arc(), config.vsync)?;
        let mut renderer = DeferredRenderer::new(backend, config.deferred.clone())?;

        let sphere = renderer.upload_mesh(&MeshData::sphere(48, 24))?;
        let cube = renderer.upload_mesh(&MeshData::cube())?;
        let plane = renderer.upload_mesh(&MeshData::plane(40.0, 40.0, 8))?;

        let mut scene = SceneFrame::new();
        scene.environment = Some(match &args.environment {
            Some(path) => renderer.load_environment(path, 1.0)?,
            None => renderer.create_sky_environment(
                Vec3::new(0.25, 0.45, 0.9),
                Vec3::new(0.8, 0.85, 0.9),
                Vec3::new(0.2, 0.18, 0.15),
                0.6,
            )?,
        });
        scene.add_directional_light(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.96, 0.9), 2.0);

        let ground = renderer.create_material(RenderMaterial::builder(Material::plastic(Vec3::splat(0.6))))?;
        scene.add_mesh(
            SceneMesh::new(Arc::clone(&plane), Some(ground))
                .with_transform(Transform::from_position(Vec3::new(0.0, -0.5, 0.0))),
        );

        // Metallic along x, roughness along z
        let grid = args.grid.max(1);
        let spacing = 1.4;
        let half = (grid - 1) as f32 * spacing * 0.5;
        for row in 0..grid {
            for column in 0..grid {
                let metallic = column as f32 / (grid - 1).max(1) as f32;
                let roughness = (row as f32 / (grid - 1).max(1) as f32).clamp(0.05, 1.0);
                let material = renderer.create_material(RenderMaterial::builder(
                    Material::new("sphere")
                        .with_base_color(Vec4::new(0.9, 0.3, 0.2, 1.0))
                        .with_metallic(metallic)
                        .with_roughness(roughness),
                ))?;
                let position = Vec3::new(column as f32 * spacing - half, 0.0, row as f32 * spacing - half);
                scene.add_mesh(
                    SceneMesh::new(Arc::clone(&sphere), Some(material))
                        .with_transform(Transform::from_position(position)),
                );
            }
        }

        // Shared material: every cube lands in one instanced batch
        let gold = renderer.create_material(RenderMaterial::builder(Material::gold()))?;
        for i in 0..8 {
            let angle = i as f32 / 8.0 * TAU;
            let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * (half + 3.0);
            scene.add_mesh(
                SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&gold))).with_transform(
                    Transform::from_position(position).with_rotation(Quat::from_rotation_y(angle)),
                ),
            );
        }

        let glass = renderer.create_material(RenderMaterial::builder(Material::glass()).transparent(true))?;
        let glow = renderer.create_material(
            RenderMaterial::builder(Material::emissive(Vec3::new(0.3, 0.8, 1.0), 6.0)).unlit(true),
        )?;
        scene.add_mesh(
            SceneMesh::new(Arc::clone(&sphere), Some(glass))
                .with_transform(Transform::from_position(Vec3::new(0.0, 1.5, 0.0)).with_uniform_scale(2.0)),
        );
        scene.add_mesh(
            SceneMesh::new(cube, Some(glow))
                .with_transform(Transform::from_position(Vec3::new(0.0, 3.5, 0.0)).with_uniform_scale(0.5)),
        );

        log::info!(
            "Scene: {} meshes, {} layouts interned",
            scene.meshes.len(),
            renderer.layout_cache().len()
        );

        let mut camera = Camera::orbit(Vec3::ZERO, half * 2.5 + 6.0, 0.0, 0.45);
        camera.set_viewport_size(config.width, config.height);

        let now = Instant::now();
        Ok(Self {
            renderer,
            camera,
            scene,
            light_count: args.lights,
            started: now,
            frames: 0,
            last_report: now,
        })
    }

    fn update(&mut self) {
        let t = self.started.elapsed().as_secs_f32();
        let target = self.camera.target;
        let distance = (self.camera.position - target).length();
        let projection = self.camera.projection;
        self.camera = Camera::orbit(target, distance, t * 0.15, 0.45);
        self.camera.projection = projection;

        // Keep the sun, replace the orbiting lights
        self.scene.lights.retain(|light| light.is_directional());
        for i in 0..self.light_count {
            let phase = i as f32 / self.light_count.max(1) as f32 * TAU;
            let radius = 3.0 + (i % 4) as f32 * 1.5;
            let angle = phase + t * (0.3 + (i % 3) as f32 * 0.2);
            let color = Vec3::new(
                0.5 + 0.5 * phase.cos(),
                0.5 + 0.5 * (phase + TAU / 3.0).cos(),
                0.5 + 0.5 * (phase + 2.0 * TAU / 3.0).cos(),
            );
            self.scene.add_light(PointLight::new(
                Vec3::new(angle.cos() * radius, 0.6, angle.sin() * radius),
                color,
                4.0,
                4.0,
            ));
        }
    }

    fn frame(&mut self, window: &mut deferred_renderer::Window) {
        if window.take_resized() {
            let (width, height) = window.dimensions();
            self.renderer.backend_mut().resize(width, height);
            self.camera.set_viewport_size(width, height);
        }

        self.update();
        match self.renderer.render_to_surface(&self.camera, &self.scene) {
            Ok(stats) => {
                self.frames += 1;
                if self.last_report.elapsed().as_secs_f32() >= 2.0 {
                    let fps = self.frames as f32 / self.last_report.elapsed().as_secs_f32();
                    log::info!(
                        "{fps:.1} fps, {} draw calls, {} opaque batches, {} forward batches",
                        stats.total_draw_calls(),
                        stats.opaque_batches,
                        stats.forward_batches
                    );
                    self.frames = 0;
                    self.last_report = Instant::now();
                }
            }
            Err(e) => log::error!("Frame failed: {e}"),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.engine_config();
    log::info!("Starting viewer at {}x{}", config.width, config.height);

    let title = config.title.clone();
    deferred_renderer::window::run(
        &title,
        config.width,
        config.height,
        move |window| Viewer::new(window, &config, &args),
        |window, viewer| viewer.frame(window),
    )?;
    Ok(())
}
