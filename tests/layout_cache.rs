//! Geometry layout interning through the public API.

mod common;

use std::sync::Arc;

use common::{init_logging, BatchingFixture};
use deferred_renderer::backend::{
    IndexFormat, PrimitiveTopology, Vertex, VertexAttribute, VertexBufferLayout, VertexFormat,
    VertexStepMode,
};
use deferred_renderer::resources::MeshData;
use deferred_renderer::{GeometryLayoutCache, LayoutError};
use rstest::rstest;

fn buffer(stride: u64, attributes: Vec<VertexAttribute>) -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: stride,
        step_mode: VertexStepMode::Vertex,
        attributes,
    }
}

/// Position + normal, interleaved
fn interleaved() -> Vec<VertexBufferLayout> {
    vec![buffer(
        24,
        vec![
            VertexAttribute::new(0, VertexFormat::Float32x3, 0),
            VertexAttribute::new(1, VertexFormat::Float32x3, 12),
        ],
    )]
}

#[test]
fn test_attribute_and_buffer_order_do_not_matter() {
    init_logging();
    let cache = GeometryLayoutCache::new();

    let reference = cache
        .create_layout(&interleaved(), PrimitiveTopology::TriangleList, None)
        .unwrap();
    let reordered = cache
        .create_layout(
            &[buffer(
                24,
                vec![
                    VertexAttribute::new(1, VertexFormat::Float32x3, 12),
                    VertexAttribute::new(0, VertexFormat::Float32x3, 0),
                ],
            )],
            PrimitiveTopology::TriangleList,
            None,
        )
        .unwrap();
    assert!(Arc::ptr_eq(&reference, &reordered));

    let split_a = vec![
        buffer(12, vec![VertexAttribute::new(0, VertexFormat::Float32x3, 0)]),
        buffer(8, vec![VertexAttribute::new(1, VertexFormat::Float32x2, 0)]),
    ];
    let split_b: Vec<_> = split_a.iter().rev().cloned().collect();
    let a = cache
        .create_layout(&split_a, PrimitiveTopology::TriangleList, None)
        .unwrap();
    let b = cache
        .create_layout(&split_b, PrimitiveTopology::TriangleList, None)
        .unwrap();
    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), reference.id());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_strip_index_format_is_part_of_identity() {
    let cache = GeometryLayoutCache::new();
    let implicit = cache
        .create_layout(&interleaved(), PrimitiveTopology::TriangleStrip, None)
        .unwrap();
    let explicit32 = cache
        .create_layout(
            &interleaved(),
            PrimitiveTopology::TriangleStrip,
            Some(IndexFormat::Uint32),
        )
        .unwrap();
    let explicit16 = cache
        .create_layout(
            &interleaved(),
            PrimitiveTopology::TriangleStrip,
            Some(IndexFormat::Uint16),
        )
        .unwrap();

    assert_eq!(implicit.id(), explicit32.id());
    assert_ne!(implicit.id(), explicit16.id());

    // Irrelevant for list topologies
    let list16 = cache
        .create_layout(
            &interleaved(),
            PrimitiveTopology::TriangleList,
            Some(IndexFormat::Uint16),
        )
        .unwrap();
    let list = cache
        .create_layout(&interleaved(), PrimitiveTopology::TriangleList, None)
        .unwrap();
    assert_eq!(list16.id(), list.id());
    assert_eq!(list.strip_index_format(), None);
}

#[test]
fn test_keys_travel_between_caches() {
    let source = GeometryLayoutCache::new();
    let layout = source
        .create_layout(&[Vertex::layout()], PrimitiveTopology::TriangleList, None)
        .unwrap();
    assert!(layout.key().chars().all(|c| c.is_ascii_hexdigit()));

    let target = GeometryLayoutCache::new();
    // Pre-populate so the restored id differs from the source id
    target
        .create_layout(&interleaved(), PrimitiveTopology::PointList, None)
        .unwrap();
    let restored = target.deserialize_layout(layout.key()).unwrap();

    assert_eq!(restored.key(), layout.key());
    assert_eq!(restored.buffers(), layout.buffers());
    assert_eq!(restored.topology(), layout.topology());
    assert_eq!(restored.id().index(), 1);
    assert!(Arc::ptr_eq(
        &restored,
        &target.deserialize_layout(layout.key()).unwrap()
    ));
}

#[rstest]
#[case::odd_length("0", LayoutError::InvalidHexLength(1))]
#[case::bad_digit("0g", LayoutError::InvalidHexDigit { position: 1, digit: 'g' })]
fn test_malformed_keys_are_rejected(#[case] key: &str, #[case] expected: LayoutError) {
    let cache = GeometryLayoutCache::new();
    assert_eq!(cache.deserialize_layout(key).unwrap_err(), expected);
    assert!(cache.is_empty());
}

#[rstest]
#[case::overlap(
    vec![buffer(24, vec![
        VertexAttribute::new(0, VertexFormat::Float32x4, 0),
        VertexAttribute::new(1, VertexFormat::Float32x2, 8),
    ])],
    LayoutError::OverlappingAttributes { first: 0, second: 1 },
)]
#[case::duplicate_location(
    vec![
        buffer(12, vec![VertexAttribute::new(3, VertexFormat::Float32x3, 0)]),
        buffer(12, vec![VertexAttribute::new(3, VertexFormat::Float32x3, 0)]),
    ],
    LayoutError::DuplicateLocation { location: 3 },
)]
#[case::location_out_of_range(
    vec![buffer(4, vec![VertexAttribute::new(16, VertexFormat::Float32, 0)])],
    LayoutError::LocationOutOfRange { location: 16 },
)]
fn test_invalid_layouts_are_not_interned(
    #[case] buffers: Vec<VertexBufferLayout>,
    #[case] expected: LayoutError,
) {
    let cache = GeometryLayoutCache::new();
    let result = cache.create_layout(&buffers, PrimitiveTopology::TriangleList, None);
    assert_eq!(result.unwrap_err(), expected);
    assert!(cache.is_empty());
}

#[test]
fn test_uploaded_meshes_share_the_standard_layout() {
    let mut fx = BatchingFixture::new();
    let cube = fx.mesh(&MeshData::cube());
    let sphere = fx.mesh(&MeshData::sphere(12, 6));
    let plane = fx.mesh(&MeshData::plane(4.0, 4.0, 2));

    assert_eq!(cube.layout().id(), sphere.layout().id());
    assert_eq!(cube.layout().id(), plane.layout().id());
    assert_eq!(fx.cache.len(), 1);
    assert_eq!(
        fx.cache.get_layout(cube.layout().id()).unwrap().key(),
        cube.layout().key()
    );
}
