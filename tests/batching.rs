//! Render-set batching against the recording backend.
//!
//! ```bash
//! cargo test --test batching
//! ```

mod common;

use std::sync::Arc;

use common::BatchingFixture;
use deferred_renderer::backend::{
    BufferDescriptor, BufferUsage, PrimitiveTopology, RecordedCommand, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexStepMode,
};
use deferred_renderer::resources::{Material, MeshData, RenderGeometry, VertexBufferBinding};
use deferred_renderer::scene::Transform;
use deferred_renderer::{GeometryLayoutCache, GraphicsBackend, RenderError, SceneMesh};
use glam::{Mat4, Vec3};
use rstest::rstest;

fn at(x: f32) -> Mat4 {
    Transform::from_position(Vec3::new(x, 0.0, 0.0)).matrix()
}

// ============================================================================
// Grouping
// ============================================================================

#[test]
fn test_shared_geometry_and_material_form_one_batch() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let sphere = fx.mesh(&MeshData::sphere(8, 4));
    let material = fx.material(Material::plastic(Vec3::ONE));

    let meshes = vec![
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&material))).with_transform(at(0.0)),
        SceneMesh::new(Arc::clone(&sphere), Some(Arc::clone(&material))).with_transform(at(1.0)),
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&material))).with_transform(at(2.0)),
    ];
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();

    let batches = set.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(set.total_instance_count(), 3);

    assert_eq!(batches[0].geometry.id(), cube.id());
    assert_eq!(batches[0].instance_count, 2);
    assert_eq!(batches[0].instances(), 0..2);
    assert_eq!(batches[1].geometry.id(), sphere.id());
    assert_eq!(batches[1].instance_count, 1);
    assert_eq!(batches[1].instances(), 2..3);

    // Instances keep mesh order within a batch
    let cubes: Vec<Vec3> = set
        .transforms(&batches[0])
        .iter()
        .map(|instance| instance.model.w_axis.truncate())
        .collect();
    assert_eq!(cubes, vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)]);

    // Cube and sphere share a vertex layout and material, so one pipeline
    assert_eq!(set.pipelines().len(), 1);
    assert_eq!(fx.opaque.pipeline_cache().compile_count(), 1);
}

#[test]
fn test_distinct_materials_split_batches() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let red = fx.material(Material::plastic(Vec3::X));
    let blue = fx.material(Material::plastic(Vec3::Z));

    let meshes = vec![
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&red))),
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&blue))),
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&red))),
    ];
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();

    let batches = set.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].material.id(), red.id());
    assert_eq!(batches[0].instances(), 0..2);
    assert_eq!(batches[1].material.id(), blue.id());
    assert_eq!(batches[1].instances(), 2..3);
}

#[rstest]
#[case::single(1)]
#[case::few(7)]
#[case::past_initial_capacity(100)]
fn test_instance_ranges_cover_every_mesh(#[case] count: usize) {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let sphere = fx.mesh(&MeshData::sphere(6, 3));
    let materials = [
        fx.material(Material::plastic(Vec3::ONE)),
        fx.material(Material::gold()),
        fx.material(Material::copper()),
    ];

    let meshes: Vec<SceneMesh> = (0..count)
        .map(|i| {
            let geometry = if i % 2 == 0 { &cube } else { &sphere };
            SceneMesh::new(Arc::clone(geometry), Some(Arc::clone(&materials[i % 3])))
                .with_transform(at(i as f32))
        })
        .collect();
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();

    assert_eq!(set.total_instance_count() as usize, count);
    let mut expected_start = 0;
    for batch in set.batches() {
        assert!(batch.instance_count > 0);
        assert_eq!(batch.first_instance, expected_start);
        expected_start += batch.instance_count;
    }
    assert_eq!(expected_start as usize, count);
    assert!(fx.opaque.instance_buffer().capacity() as usize >= count);
    // Growth replaces the bind group; the set must carry the new one
    assert_eq!(set.instance_bind_group(), fx.opaque.instance_buffer().bind_group());
}

#[test]
fn test_empty_scene_yields_empty_set() {
    let mut fx = BatchingFixture::new();
    let set = fx.opaque.get_render_set(&mut fx.backend, &[]).unwrap();
    assert!(set.is_empty());
    assert_eq!(set.total_instance_count(), 0);
    assert_eq!(fx.opaque.pipeline_cache().compile_count(), 0);
}

#[test]
fn test_missing_material_uses_default() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let meshes = vec![SceneMesh::new(Arc::clone(&cube), None), SceneMesh::new(cube, None)];

    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();
    assert_eq!(set.batches().len(), 1);
    assert_eq!(
        set.batches()[0].material.id(),
        fx.opaque.default_material().id()
    );
    assert_eq!(set.batches()[0].material.name(), "default");
}

#[test]
fn test_opaque_and_forward_partition_the_scene() {
    let mut fx = BatchingFixture::new();
    let sphere = fx.mesh(&MeshData::sphere(8, 4));
    let opaque = fx.material(Material::plastic(Vec3::ONE));
    let glass = fx.transparent_material(Material::glass());

    let meshes = vec![
        SceneMesh::new(Arc::clone(&sphere), Some(opaque)),
        SceneMesh::new(Arc::clone(&sphere), Some(Arc::clone(&glass))),
        SceneMesh::new(sphere, Some(glass)),
    ];
    let opaque_set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();
    assert_eq!(opaque_set.total_instance_count(), 1);

    let forward_set = fx.forward.get_render_set(&mut fx.backend, &meshes).unwrap();
    assert_eq!(forward_set.total_instance_count(), 2);
    assert_eq!(forward_set.batches().len(), 1);
    assert!(forward_set.batches()[0].pipeline_key.variant.transparent());
}

// ============================================================================
// Pipeline memoization
// ============================================================================

#[test]
fn test_pipelines_compile_once_across_frames() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let material = fx.material(Material::metal(Vec3::splat(0.8), 0.3));
    let meshes = vec![SceneMesh::new(cube, Some(material))];

    let first = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();
    let first_pipeline = first.batches()[0].pipeline;
    let pipelines_after_first = fx.backend.pipeline_count();

    for _ in 0..3 {
        let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();
        assert_eq!(set.batches()[0].pipeline, first_pipeline);
    }
    assert_eq!(fx.opaque.pipeline_cache().compile_count(), 1);
    assert_eq!(fx.backend.pipeline_count(), pipelines_after_first);

    let descriptor = fx.backend.pipeline(first_pipeline).unwrap();
    assert!(descriptor.label.as_deref().unwrap_or("").starts_with("G-Buffer"));
}

#[test]
fn test_geometries_from_separate_caches_get_their_own_pipelines() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());

    // Both caches hand out index 0 for their first layout
    let other_cache = GeometryLayoutCache::new();
    let positions = fx
        .backend
        .create_buffer(&BufferDescriptor {
            label: Some("positions".into()),
            size: 36,
            usage: BufferUsage::VERTEX,
            mapped_at_creation: false,
        })
        .unwrap();
    let position_only = VertexBufferLayout {
        array_stride: 12,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute::new(0, VertexFormat::Float32x3, 0)],
    };
    let triangle = Arc::new(
        RenderGeometry::builder(PrimitiveTopology::TriangleList, 3)
            .vertex_buffer(position_only, VertexBufferBinding::new(positions))
            .build(&other_cache)
            .unwrap(),
    );
    assert_eq!(cube.layout().id().index(), triangle.layout().id().index());
    assert_ne!(cube.layout().id(), triangle.layout().id());

    let material = fx.material(Material::plastic(Vec3::ONE));
    let meshes = vec![
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&material))),
        SceneMesh::new(Arc::clone(&triangle), Some(material)),
    ];
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();

    assert_eq!(set.batches().len(), 2);
    assert_eq!(fx.opaque.pipeline_cache().compile_count(), 2);
    let [cube_batch, triangle_batch] = set.batches() else {
        panic!("expected two batches");
    };
    assert_ne!(cube_batch.pipeline_key, triangle_batch.pipeline_key);
    assert_ne!(cube_batch.pipeline, triangle_batch.pipeline);

    assert_eq!(triangle_batch.geometry.id(), triangle.id());

    let triangle_pipeline = fx.backend.pipeline(triangle_batch.pipeline).unwrap();
    assert_eq!(triangle_pipeline.vertex_layouts.as_slice(), triangle.layout().buffers());
    assert_eq!(triangle_pipeline.vertex_layouts[0].attributes.len(), 1);
    let cube_pipeline = fx.backend.pipeline(cube_batch.pipeline).unwrap();
    assert_eq!(cube_pipeline.vertex_layouts.as_slice(), cube.layout().buffers());
}

#[test]
fn test_pipeline_failure_is_reported_and_retried() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let material = fx.material(Material::plastic(Vec3::ONE));
    let meshes = vec![SceneMesh::new(cube, Some(material))];

    fx.backend.fail_pipelines_containing("G-Buffer");
    let result = fx.opaque.get_render_set(&mut fx.backend, &meshes);
    assert!(matches!(result, Err(RenderError::PipelineCompilation { .. })));
    assert!(fx.opaque.pipeline_cache().is_empty());

    fx.backend.clear_failures();
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();
    assert_eq!(set.batches().len(), 1);
    assert_eq!(fx.opaque.pipeline_cache().compile_count(), 2);
}

// ============================================================================
// Drawing
// ============================================================================

#[test]
fn test_draw_issues_one_instanced_draw_per_batch() {
    use deferred_renderer::backend::{ColorAttachment, RenderPassDescriptor};

    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let sphere = fx.mesh(&MeshData::sphere(8, 4));
    let material = fx.material(Material::plastic(Vec3::ONE));
    let meshes = vec![
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&material))),
        SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&material))),
        SceneMesh::new(sphere, Some(material)),
    ];
    let set = fx.opaque.get_render_set(&mut fx.backend, &meshes).unwrap();

    let frame = fx.backend.begin_frame().unwrap();
    fx.backend.begin_render_pass(&RenderPassDescriptor {
        label: Some("batches".into()),
        color_attachments: vec![ColorAttachment::load(frame.swapchain_view)],
        depth_stencil_attachment: None,
    });
    let draws = set.draw(&mut fx.backend);
    fx.backend.end_render_pass();

    assert_eq!(draws, 2);
    let pass = fx.backend.pass("batches").unwrap();
    let instances: Vec<_> = pass.draws().filter_map(RecordedCommand::instances).collect();
    assert_eq!(instances, vec![0..2, 2..3]);

    // One pipeline bind for both batches
    let pipeline_binds = pass
        .commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::SetPipeline(_)))
        .count();
    assert_eq!(pipeline_binds, 1);
}
