//! Whole-frame tests: pass order, resize behavior and failure handling.
//!
//! ```bash
//! cargo test --test frame
//! ```

mod common;

use std::sync::Arc;

use common::{begin_frame, minimal_config, renderer, sized_renderer, HEIGHT, WIDTH};
use deferred_renderer::backend::LoadOp;
use deferred_renderer::pipeline::postprocess::{bloom, tonemapping};
use deferred_renderer::pipeline::{
    debug_overlay, forward_pass, gbuffer_pass, lighting_pass, ssao_pass, BloomSettings,
};
use deferred_renderer::resources::{Material, MeshData, RenderMaterial};
use deferred_renderer::scene::{PointLight, Transform};
use deferred_renderer::{
    Camera, DebugView, DeferredConfig, DeferredRenderer, RecordingBackend, RenderError, SceneFrame,
    SceneMesh,
};
use glam::Vec3;
use rstest::rstest;

fn is_clear(op: &LoadOp) -> bool {
    matches!(op, LoadOp::Clear(_))
}

/// Two opaque cubes, one opaque sphere and a transparent sphere
fn populated_scene(renderer: &mut DeferredRenderer<RecordingBackend>) -> SceneFrame {
    let cube = renderer.upload_mesh(&MeshData::cube()).unwrap();
    let sphere = renderer.upload_mesh(&MeshData::sphere(12, 6)).unwrap();
    let plastic = renderer
        .create_material(RenderMaterial::builder(Material::plastic(Vec3::ONE)))
        .unwrap();
    let glass = renderer
        .create_material(RenderMaterial::builder(Material::glass()).transparent(true))
        .unwrap();

    let mut scene = SceneFrame::new();
    for x in [-2.0, 2.0] {
        scene.add_mesh(
            SceneMesh::new(Arc::clone(&cube), Some(Arc::clone(&plastic)))
                .with_transform(Transform::from_position(Vec3::new(x, 0.0, 0.0))),
        );
    }
    scene.add_mesh(SceneMesh::new(Arc::clone(&sphere), Some(plastic)));
    scene.add_mesh(
        SceneMesh::new(sphere, Some(glass))
            .with_transform(Transform::from_position(Vec3::new(0.0, 2.0, 0.0))),
    );
    scene.add_directional_light(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1.5);
    scene.add_light(PointLight::new(Vec3::new(0.0, 1.0, 2.0), Vec3::ONE, 3.0, 5.0));
    scene.add_light(PointLight::new(Vec3::new(1.0, 1.0, -2.0), Vec3::X, 3.0, 5.0));
    scene
}

// ============================================================================
// Pass structure
// ============================================================================

#[test]
fn test_full_frame_pass_order_and_load_ops() {
    let mut renderer = sized_renderer(DeferredConfig::default());
    let scene = populated_scene(&mut renderer);
    let output = begin_frame(&mut renderer);

    let stats = renderer.render(output, &Camera::default(), &scene).unwrap();
    let backend = renderer.backend();

    let mut expected = vec![
        gbuffer_pass::LABEL.to_string(),
        ssao_pass::LABEL.to_string(),
        ssao_pass::BLUR_H_LABEL.to_string(),
        ssao_pass::BLUR_V_LABEL.to_string(),
        lighting_pass::LABEL.to_string(),
        forward_pass::LABEL.to_string(),
    ];
    let mips = BloomSettings::default().mip_levels as usize;
    expected.extend((0..mips).map(|i| format!("Bloom Downsample {i}")));
    expected.extend((0..mips - 1).rev().map(|i| format!("Bloom Upsample {i}")));
    expected.push(tonemapping::LABEL.to_string());
    assert_eq!(backend.pass_labels(), expected);

    let gbuffer = backend.pass(gbuffer_pass::LABEL).unwrap();
    assert_eq!(gbuffer.color_load_ops().len(), 3);
    assert!(gbuffer.color_load_ops().iter().all(is_clear));
    // Cubes share a batch, the sphere gets its own
    assert_eq!(gbuffer.draw_count(), 2);

    let blur_v = backend.pass(ssao_pass::BLUR_V_LABEL).unwrap();
    assert_eq!(blur_v.color_load_ops(), vec![LoadOp::Load]);

    let lighting = backend.pass(lighting_pass::LABEL).unwrap();
    assert!(lighting.color_load_ops().iter().all(is_clear));
    // Ambient, directional, local
    assert_eq!(lighting.draw_count(), 3);

    let forward = backend.pass(forward_pass::LABEL).unwrap();
    assert_eq!(forward.color_load_ops(), vec![LoadOp::Load]);
    assert_eq!(forward.draw_count(), 1);

    let tonemap = backend.pass(tonemapping::LABEL).unwrap();
    assert!(tonemap.color_load_ops().iter().all(is_clear));
    assert_eq!(
        tonemap.descriptor.color_attachments[0].view,
        output,
        "tonemapping writes the frame output"
    );

    assert_eq!(stats.opaque_instances, 3);
    assert_eq!(stats.opaque_batches, 2);
    assert_eq!(stats.forward_instances, 1);
    assert_eq!(stats.forward_batches, 1);
    assert_eq!(stats.draw_calls(ssao_pass::LABEL), Some(3));
    assert_eq!(stats.draw_calls(bloom::LABEL), Some(2 * mips as u32 - 1));
    assert_eq!(stats.draw_calls(debug_overlay::LABEL), None);
    assert_eq!(stats.total_draw_calls() as usize, backend.total_draw_count());
}

#[test]
fn test_empty_scene_still_records_every_stage() {
    let mut renderer = sized_renderer(minimal_config());
    let output = begin_frame(&mut renderer);

    let stats = renderer
        .render(output, &Camera::default(), &SceneFrame::new())
        .unwrap();

    assert_eq!(stats.draw_calls(gbuffer_pass::LABEL), Some(0));
    assert_eq!(stats.draw_calls(lighting_pass::LABEL), Some(1));
    assert_eq!(stats.draw_calls(tonemapping::LABEL), Some(1));
    assert_eq!(
        renderer.backend().pass(gbuffer_pass::LABEL).unwrap().draw_count(),
        0
    );
}

#[rstest]
#[case::all_enabled(true, true)]
#[case::no_ssao(false, true)]
#[case::no_bloom(true, false)]
#[case::neither(false, false)]
fn test_optional_stages_follow_config(#[case] ssao: bool, #[case] bloom_enabled: bool) {
    let mut config = DeferredConfig::default();
    if !ssao {
        config.ssao = None;
    }
    if !bloom_enabled {
        config.bloom = None;
    }
    let mut renderer = sized_renderer(config);
    let output = begin_frame(&mut renderer);
    let stats = renderer
        .render(output, &Camera::default(), &SceneFrame::new())
        .unwrap();

    let backend = renderer.backend();
    assert_eq!(backend.pass(ssao_pass::LABEL).is_some(), ssao);
    assert_eq!(backend.pass("Bloom Downsample 0").is_some(), bloom_enabled);
    assert_eq!(stats.draw_calls(ssao_pass::LABEL).is_some(), ssao);
    assert_eq!(stats.draw_calls(bloom::LABEL).is_some(), bloom_enabled);

    let targets = renderer.targets().unwrap();
    assert_eq!(targets.attachments.occlusion.is_some(), ssao);
    assert_eq!(!targets.attachments.bloom.is_empty(), bloom_enabled);
}

#[test]
fn test_skybox_draws_only_with_environment() {
    let mut renderer = sized_renderer(minimal_config());
    let mut scene = SceneFrame::new();

    let output = begin_frame(&mut renderer);
    renderer.render(output, &Camera::default(), &scene).unwrap();
    assert_eq!(
        renderer.backend().pass(forward_pass::LABEL).unwrap().draw_count(),
        0
    );

    scene.environment = Some(
        renderer
            .create_sky_environment(Vec3::Z, Vec3::ONE, Vec3::splat(0.2), 1.0)
            .unwrap(),
    );
    let output = begin_frame(&mut renderer);
    renderer.render(output, &Camera::default(), &scene).unwrap();
    assert_eq!(
        renderer.backend().pass(forward_pass::LABEL).unwrap().draw_count(),
        1
    );
}

#[test]
fn test_debug_overlay_tiles() {
    let config = DeferredConfig {
        ssao: None,
        bloom: None,
        // Occlusion has no source without SSAO and is skipped
        debug_views: vec![DebugView::Albedo, DebugView::Occlusion, DebugView::Depth],
        ..Default::default()
    };
    let mut renderer = sized_renderer(config);
    let output = begin_frame(&mut renderer);
    let stats = renderer
        .render(output, &Camera::default(), &SceneFrame::new())
        .unwrap();

    let backend = renderer.backend();
    assert_eq!(backend.pass_labels().last(), Some(&debug_overlay::LABEL));
    let overlay = backend.pass(debug_overlay::LABEL).unwrap();
    assert_eq!(overlay.color_load_ops(), vec![LoadOp::Load]);
    assert_eq!(overlay.draw_count(), 2);
    assert_eq!(stats.draw_calls(debug_overlay::LABEL), Some(2));
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_to_same_size_keeps_targets() {
    let mut renderer = sized_renderer(DeferredConfig::default());
    let before = renderer.targets().unwrap().attachments.all();
    let textures = renderer.backend().live_texture_count();

    assert!(!renderer.resize(WIDTH, HEIGHT).unwrap());
    assert_eq!(renderer.targets().unwrap().attachments.all(), before);
    assert_eq!(renderer.backend().live_texture_count(), textures);
}

#[test]
fn test_resize_rebuilds_and_releases_previous_targets() {
    let mut renderer = sized_renderer(DeferredConfig::default());
    let old = renderer.targets().unwrap();
    let old_views: Vec<_> = old.attachments.all().iter().map(|a| a.view).collect();
    let old_gbuffer = old.bindings.gbuffer;
    let old_tonemap = old.bindings.tonemap;
    let textures = renderer.backend().live_texture_count();

    assert!(renderer.resize(1024, 768).unwrap());

    let targets = renderer.targets().unwrap();
    assert_eq!(targets.size(), (1024, 768));
    assert_eq!(targets.attachments.albedo.width, 1024);
    assert_eq!(targets.attachments.light.height, 768);
    assert_eq!(targets.attachments.bloom[0].width, 512);
    assert_ne!(targets.bindings.gbuffer, old_gbuffer);

    let backend = renderer.backend();
    assert!(old_views.iter().all(|view| !backend.is_view_live(*view)));
    assert!(!backend.is_bind_group_live(old_gbuffer));
    assert!(!backend.is_bind_group_live(old_tonemap));
    assert_eq!(backend.live_texture_count(), textures);

    // The lighting pass reads the new G-buffer
    let entries = backend.bind_group_entries(targets.bindings.gbuffer).unwrap();
    assert_eq!(entries.len(), 4);
}

#[test]
fn test_failed_resize_keeps_previous_targets() {
    let mut renderer = sized_renderer(DeferredConfig::default());
    let before = renderer.targets().unwrap().attachments.all();
    let gbuffer = renderer.targets().unwrap().bindings.gbuffer;
    let textures = renderer.backend().live_texture_count();
    let bind_groups = renderer.backend().live_bind_group_count();

    renderer.backend_mut().fail_textures_after(3);
    let result = renderer.resize(1024, 768);
    assert!(matches!(result, Err(RenderError::Backend(_))));

    assert_eq!(renderer.targets().unwrap().size(), (WIDTH, HEIGHT));
    assert_eq!(renderer.targets().unwrap().attachments.all(), before);
    let backend = renderer.backend();
    assert_eq!(backend.live_texture_count(), textures);
    assert_eq!(backend.live_bind_group_count(), bind_groups);
    assert!(backend.is_bind_group_live(gbuffer));
    assert!(before.iter().all(|a| backend.is_view_live(a.view)));

    renderer.backend_mut().clear_failures();
    assert!(renderer.resize(1024, 768).unwrap());
}

#[rstest]
#[case::zero_width(0, 600)]
#[case::zero_height(800, 0)]
fn test_zero_size_is_rejected(#[case] width: u32, #[case] height: u32) {
    let mut renderer = renderer(minimal_config());
    assert!(matches!(
        renderer.resize(width, height),
        Err(RenderError::InvalidSize { .. })
    ));
    assert!(!renderer.is_sized());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_pipeline_failure_aborts_before_recording() {
    let mut renderer = sized_renderer(DeferredConfig::default());
    let scene = populated_scene(&mut renderer);
    renderer.backend_mut().fail_pipelines_containing("Forward");

    let output = begin_frame(&mut renderer);
    let result = renderer.render(output, &Camera::default(), &scene);

    assert!(matches!(result, Err(RenderError::PipelineCompilation { .. })));
    assert!(renderer.backend().passes().is_empty());

    // The opaque pipeline compiled before the failure stays cached
    assert_eq!(renderer.opaque_batcher().pipeline_cache().len(), 1);

    renderer.backend_mut().clear_failures();
    let output = begin_frame(&mut renderer);
    renderer.render(output, &Camera::default(), &scene).unwrap();
    assert_eq!(renderer.forward_batcher().pipeline_cache().len(), 1);
}

#[test]
fn test_render_to_surface_tracks_surface_resizes() {
    let mut renderer = renderer(minimal_config());
    let scene = SceneFrame::new();

    renderer
        .render_to_surface(&Camera::default(), &scene)
        .unwrap();
    assert_eq!(renderer.targets().unwrap().size(), (WIDTH, HEIGHT));

    use deferred_renderer::GraphicsBackend;
    renderer.backend_mut().resize(640, 480);
    renderer
        .render_to_surface(&Camera::default(), &scene)
        .unwrap();
    assert_eq!(renderer.targets().unwrap().size(), (640, 480));
    assert_eq!(renderer.backend().frames_submitted(), 2);
}
