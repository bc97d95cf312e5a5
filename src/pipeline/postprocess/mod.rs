//! Post-processing effects

pub mod bloom;
pub mod tonemapping;

pub use bloom::{BloomBindings, BloomPass};
pub use tonemapping::{TonemapOperator, TonemappingPass};
