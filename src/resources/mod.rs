//! Drawable resources
//!
//! Geometry bound to interned layouts, materials with their variant keys,
//! and primitive mesh generators.

mod geometry;
mod material;
mod mesh;

pub use geometry::*;
pub use material::*;
pub use mesh::*;
