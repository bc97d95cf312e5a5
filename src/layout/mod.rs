//! Vertex layout canonicalization, encoding and interning

pub mod cache;
pub mod codec;

pub use cache::{GeometryLayout, GeometryLayoutCache, LayoutId};
pub use codec::{CanonicalBuffer, GeometryLayoutDescriptor};
