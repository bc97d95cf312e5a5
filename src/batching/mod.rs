//! Instanced render-set batching
//!
//! A [`RenderSetBatcher`] turns the frame's flat mesh list into a
//! [`RenderSet`]: one [`GeometryInstances`] per (pipeline, material,
//! geometry) triple, each owning a contiguous range of a shared instance
//! buffer. What a batcher accepts and how it compiles pipelines is decided
//! by its [`PipelineFactory`].

mod batcher;
mod instance_buffer;
mod pipeline_cache;
mod render_set;

pub use batcher::RenderSetBatcher;
pub use instance_buffer::{InstanceBuffer, MIN_INSTANCE_CAPACITY};
pub use pipeline_cache::{PipelineCache, PipelineKey};
pub use render_set::{GeometryInstances, RenderSet};

use crate::backend::{BackendResult, GraphicsBackend, RenderPipelineHandle};
use crate::layout::GeometryLayout;
use crate::resources::RenderMaterial;
use crate::scene::SceneMesh;

/// Mesh filter and pipeline compiler for one batcher
pub trait PipelineFactory {
    /// Name used in labels and logs
    fn label(&self) -> &str;

    /// Whether this batcher draws `mesh`; `material` is the mesh material
    /// or the batcher's default.
    fn accepts(&self, mesh: &SceneMesh, material: &RenderMaterial) -> bool;

    /// Compile the pipeline for `key`. Called once per key.
    fn create_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: &GeometryLayout,
        material: &RenderMaterial,
        skinned: bool,
        key: &PipelineKey,
    ) -> BackendResult<RenderPipelineHandle>;
}
