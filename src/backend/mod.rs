//! Backend abstraction layer
//!
//! Provides the handle-based [`GraphicsBackend`] trait plus two
//! implementations: wgpu for real devices and a recording backend that runs
//! without a GPU.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use recording::{RecordedCommand, RecordedPass, RecordingBackend};
pub use traits::*;
pub use types::*;
