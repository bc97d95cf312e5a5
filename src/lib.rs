//! Deferred Renderer - deferred shading on wgpu with content-addressed
//! vertex layouts and instanced render-set batching
//!
//! # Features
//! - Canonical, hex-encodable vertex layout keys interned in a
//!   [`GeometryLayoutCache`]
//! - [`RenderSetBatcher`] grouping meshes by pipeline, material and geometry
//!   into instance ranges of one shared buffer, with memoized pipelines
//! - G-buffer, SSAO, deferred lighting, forward, bloom, tonemapping and
//!   debug overlay passes driven by [`DeferredRenderer`]
//! - A [`RecordingBackend`] that runs the whole frame without a GPU

pub mod backend;
pub mod batching;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;
pub mod window;

pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{GraphicsBackend, RecordingBackend};
pub use batching::{PipelineFactory, PipelineKey, RenderSet, RenderSetBatcher};
pub use error::{LayoutError, RenderError, RenderResult};
pub use layout::{GeometryLayout, GeometryLayoutCache, LayoutId};
pub use pipeline::{DebugView, DeferredConfig};
pub use renderer::{DeferredRenderer, FrameStats, PassStats};
pub use scene::{Camera, SceneFrame, SceneMesh};
pub use window::{Window, WindowError};

/// Configuration for the windowed viewer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub deferred: DeferredConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Renderer".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            deferred: DeferredConfig::default(),
        }
    }
}
