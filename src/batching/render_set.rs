//! One frame's worth of batched draws

use super::PipelineKey;
use crate::backend::*;
use crate::resources::{RenderGeometry, RenderMaterial};
use std::ops::Range;
use std::sync::Arc;

/// All instances of one geometry drawn with one material and pipeline
#[derive(Debug, Clone)]
pub struct GeometryInstances {
    pub pipeline: RenderPipelineHandle,
    pub pipeline_key: PipelineKey,
    pub material: Arc<RenderMaterial>,
    pub geometry: Arc<RenderGeometry>,
    pub first_instance: u32,
    pub instance_count: u32,
}

impl GeometryInstances {
    /// Range into the frame's instance buffer
    pub fn instances(&self) -> Range<u32> {
        self.first_instance..self.first_instance + self.instance_count
    }
}

/// Batches in nested encounter order: grouped by pipeline, then by material
/// within a pipeline. Instance ranges are contiguous and cover
/// `0..total_instance_count` exactly.
#[derive(Debug, Clone)]
pub struct RenderSet {
    batches: Vec<GeometryInstances>,
    instance_data: Vec<InstanceData>,
    instance_bind_group: BindGroupHandle,
}

impl RenderSet {
    pub(crate) fn new(
        batches: Vec<GeometryInstances>,
        instance_data: Vec<InstanceData>,
        instance_bind_group: BindGroupHandle,
    ) -> Self {
        Self {
            batches,
            instance_data,
            instance_bind_group,
        }
    }

    pub fn batches(&self) -> &[GeometryInstances] {
        &self.batches
    }

    pub fn total_instance_count(&self) -> u32 {
        self.instance_data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.instance_data.is_empty()
    }

    pub fn instance_bind_group(&self) -> BindGroupHandle {
        self.instance_bind_group
    }

    /// Instance data uploaded for `batch`
    pub fn transforms(&self, batch: &GeometryInstances) -> &[InstanceData] {
        let range = batch.instances();
        &self.instance_data[range.start as usize..range.end as usize]
    }

    /// Distinct pipelines, in draw order
    pub fn pipelines(&self) -> Vec<RenderPipelineHandle> {
        let mut pipelines: Vec<RenderPipelineHandle> = Vec::new();
        for batch in &self.batches {
            if pipelines.last() != Some(&batch.pipeline) {
                pipelines.push(batch.pipeline);
            }
        }
        pipelines
    }

    /// Record every batch into the current pass. Group 0 must already be
    /// bound. Returns the number of draw calls issued.
    pub fn draw(&self, backend: &mut dyn GraphicsBackend) -> u32 {
        if self.is_empty() {
            return 0;
        }

        backend.set_bind_group(1, self.instance_bind_group);

        let mut current_pipeline = None;
        let mut current_material = None;
        let mut draws = 0;
        for batch in &self.batches {
            if current_pipeline != Some(batch.pipeline) {
                backend.set_render_pipeline(batch.pipeline);
                current_pipeline = Some(batch.pipeline);
                current_material = None;
            }
            let material = batch.material.id();
            if current_material != Some(material) {
                backend.set_bind_group(2, batch.material.bind_group());
                current_material = Some(material);
            }
            batch.geometry.draw(backend, batch.instances());
            draws += 1;
        }

        log::trace!(
            "Drew {} batches ({} instances)",
            self.batches.len(),
            self.instance_data.len()
        );
        draws
    }
}
