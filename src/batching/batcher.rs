//! Grouping scene meshes into instanced batches

use super::{GeometryInstances, InstanceBuffer, PipelineCache, PipelineFactory, PipelineKey, RenderSet};
use crate::backend::*;
use crate::error::RenderResult;
use crate::resources::{GeometryId, MaterialId, RenderMaterial};
use crate::scene::SceneMesh;
use rustc_hash::FxHashMap;
use std::sync::Arc;

struct PendingBatch {
    pipeline_slot: usize,
    material_rank: usize,
    key: PipelineKey,
    pipeline: RenderPipelineHandle,
    material: Arc<RenderMaterial>,
    mesh: usize,
    count: u32,
}

/// Builds a `RenderSet` from the meshes its factory accepts.
///
/// Pipelines are compiled on first use of a key and reused afterwards. The
/// instance buffer is owned by the batcher and shared by every render set
/// it produces, so a set is only valid until the next `get_render_set`.
pub struct RenderSetBatcher<F: PipelineFactory> {
    factory: F,
    pipelines: PipelineCache,
    instances: InstanceBuffer,
    default_material: Arc<RenderMaterial>,
    batch_lookup: FxHashMap<(usize, MaterialId, GeometryId), usize>,
}

impl<F: PipelineFactory> RenderSetBatcher<F> {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        factory: F,
        instance_layout: BindGroupLayoutHandle,
        default_material: Arc<RenderMaterial>,
        initial_instance_capacity: u32,
    ) -> BackendResult<Self> {
        let instances = InstanceBuffer::new(
            backend,
            factory.label(),
            instance_layout,
            initial_instance_capacity,
        )?;
        Ok(Self {
            factory,
            pipelines: PipelineCache::new(),
            instances,
            default_material,
            batch_lookup: FxHashMap::default(),
        })
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn instance_buffer(&self) -> &InstanceBuffer {
        &self.instances
    }

    pub fn default_material(&self) -> &Arc<RenderMaterial> {
        &self.default_material
    }

    /// Group accepted meshes by (pipeline, material, geometry), assign each
    /// group a contiguous instance range and upload all instance data.
    pub fn get_render_set(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        meshes: &[SceneMesh],
    ) -> RenderResult<RenderSet> {
        self.batch_lookup.clear();
        let mut pipeline_slots: FxHashMap<PipelineKey, usize> = FxHashMap::default();
        let mut material_ranks: FxHashMap<(usize, MaterialId), usize> = FxHashMap::default();
        let mut materials_per_slot: Vec<usize> = Vec::new();
        let mut pending: Vec<PendingBatch> = Vec::new();
        let mut assignments: Vec<(usize, usize)> = Vec::with_capacity(meshes.len());

        for (index, mesh) in meshes.iter().enumerate() {
            let material = mesh.material.as_ref().unwrap_or(&self.default_material);
            if !self.factory.accepts(mesh, material) {
                continue;
            }

            let geometry = &mesh.geometry;
            let layout = geometry.layout();
            let skinned = geometry.is_skinned();
            let key = PipelineKey::new(layout.id(), material.variant(), skinned);

            let factory = &mut self.factory;
            let pipeline = self.pipelines.get_or_create(key, || {
                factory.create_pipeline(&mut *backend, layout, material, skinned, &key)
            })?;

            let pipeline_slot = *pipeline_slots.entry(key).or_insert_with(|| {
                materials_per_slot.push(0);
                materials_per_slot.len() - 1
            });
            let material_rank = *material_ranks
                .entry((pipeline_slot, material.id()))
                .or_insert_with(|| {
                    let rank = materials_per_slot[pipeline_slot];
                    materials_per_slot[pipeline_slot] += 1;
                    rank
                });

            let batch = *self
                .batch_lookup
                .entry((pipeline_slot, material.id(), geometry.id()))
                .or_insert_with(|| {
                    pending.push(PendingBatch {
                        pipeline_slot,
                        material_rank,
                        key,
                        pipeline,
                        material: Arc::clone(material),
                        mesh: index,
                        count: 0,
                    });
                    pending.len() - 1
                });
            pending[batch].count += 1;
            assignments.push((index, batch));
        }

        // Nested encounter order; creation order breaks ties between geometries
        let mut order: Vec<usize> = (0..pending.len()).collect();
        order.sort_by_key(|&b| (pending[b].pipeline_slot, pending[b].material_rank, b));

        let mut first_instance = vec![0u32; pending.len()];
        let mut total = 0u32;
        for &b in &order {
            first_instance[b] = total;
            total += pending[b].count;
        }

        let mut instance_data = vec![InstanceData::from_transform(glam::Mat4::IDENTITY); total as usize];
        let mut cursor = first_instance.clone();
        for (mesh, batch) in assignments {
            instance_data[cursor[batch] as usize] = InstanceData::from_transform(meshes[mesh].transform);
            cursor[batch] += 1;
        }

        self.instances.ensure_capacity(backend, total)?;
        self.instances.upload(backend, &instance_data);

        let batches = order
            .iter()
            .map(|&b| {
                let batch = &pending[b];
                GeometryInstances {
                    pipeline: batch.pipeline,
                    pipeline_key: batch.key,
                    material: Arc::clone(&batch.material),
                    geometry: Arc::clone(&meshes[batch.mesh].geometry),
                    first_instance: first_instance[b],
                    instance_count: batch.count,
                }
            })
            .collect::<Vec<_>>();

        log::trace!(
            "{}: {} meshes -> {} batches, {} pipelines, {total} instances",
            self.factory.label(),
            meshes.len(),
            batches.len(),
            pipeline_slots.len()
        );

        Ok(RenderSet::new(batches, instance_data, self.instances.bind_group()))
    }
}
