//! Error types for the renderer

use crate::backend::BackendError;
use crate::batching::PipelineKey;
use thiserror::Error;

/// Malformed vertex layout input or layout key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Vertex buffer {buffer} has no attributes")]
    EmptyBuffer { buffer: usize },
    #[error("Vertex buffer {buffer} has {count} attributes (max 15)")]
    TooManyAttributes { buffer: usize, count: usize },
    #[error("Vertex buffer {buffer} stride {stride} exceeds 2047 bytes")]
    StrideOutOfRange { buffer: usize, stride: u64 },
    #[error("Attribute at location {location} has offset {offset} (max 4095)")]
    OffsetOutOfRange { location: u32, offset: u64 },
    #[error("Shader location {location} is out of range (max 15)")]
    LocationOutOfRange { location: u32 },
    #[error("Shader location {location} is used more than once")]
    DuplicateLocation { location: u32 },
    #[error("Attributes at locations {first} and {second} overlap")]
    OverlappingAttributes { first: u32, second: u32 },
    #[error("Unknown primitive topology byte {0:#04x}")]
    UnknownTopology(u8),
    #[error("Unknown vertex format id {0}")]
    UnknownFormat(u8),
    #[error("Layout key truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("Hex key has odd length {0}")]
    InvalidHexLength(usize),
    #[error("Invalid hex digit {digit:?} at position {position}")]
    InvalidHexDigit { position: usize, digit: char },
    #[error("Layout id space exhausted")]
    IdSpaceExhausted,
}

/// Renderer error type
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Renderer is not sized; call resize() before rendering")]
    NotSized,

    #[error("Invalid render target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Failed to compile pipeline {key}: {source}")]
    PipelineCompilation {
        key: PipelineKey,
        #[source]
        source: BackendError,
    },
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LayoutError::EmptyBuffer { buffer: 2 };
        assert_eq!(err.to_string(), "Vertex buffer 2 has no attributes");

        let err: RenderError = LayoutError::UnknownFormat(200).into();
        assert_eq!(err.to_string(), "Unknown vertex format id 200");

        let err = RenderError::InvalidSize { width: 0, height: 600 };
        assert!(err.to_string().contains("0x600"));
    }
}
