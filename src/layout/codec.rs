//! Canonical vertex layout encoding.
//!
//! A geometry layout is first canonicalized (buffers rebased to their lowest
//! attribute offset, non-interleaved attributes split out, attributes and
//! buffers sorted by shader location) and then bit-packed:
//!
//! ```text
//! byte 0           topology id (bits 0-2) | strip index is u16 (bit 3)
//! per buffer       u16 LE: attribute count (bits 0-3) | stride (bits 4-14) | step mode (bit 15)
//!   per attribute  u16 LE: offset (bits 0-11) | shader location (bits 12-15), then format id (u8)
//! ```
//!
//! The byte string is rendered as lowercase hex and used as the layout key.

use crate::backend::types::*;
use crate::error::LayoutError;

const MAX_ATTRIBUTES: usize = 0xF;
const MAX_STRIDE: u64 = 0x7FF;
const MAX_OFFSET: u64 = 0xFFF;
const MAX_LOCATION: u32 = 0xF;

const TOPOLOGY_MASK: u8 = 0x07;
const STRIP_UINT16_BIT: u8 = 0x08;
const INSTANCE_STEP_BIT: u16 = 0x8000;

/// Structural description of a geometry layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeometryLayoutDescriptor {
    pub buffers: Vec<VertexBufferLayout>,
    pub topology: PrimitiveTopology,
    pub strip_index_format: Option<IndexFormat>,
}

impl GeometryLayoutDescriptor {
    pub fn new(buffers: Vec<VertexBufferLayout>, topology: PrimitiveTopology) -> Self {
        Self {
            buffers,
            topology,
            strip_index_format: None,
        }
    }

    pub fn with_strip_index_format(mut self, format: IndexFormat) -> Self {
        self.strip_index_format = Some(format);
        self
    }
}

/// A canonical buffer and where its data lives in the caller's input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBuffer {
    /// Index of the input buffer this one was derived from
    pub source: usize,
    /// Byte offset of element 0 relative to the input buffer binding
    pub base_offset: u64,
    pub layout: VertexBufferLayout,
}

/// Rebase, split and sort `buffers`. Buffers without attributes are dropped.
pub fn canonicalize_buffers(
    buffers: &[VertexBufferLayout],
) -> Result<Vec<CanonicalBuffer>, LayoutError> {
    let mut out = Vec::with_capacity(buffers.len());

    for (source, buffer) in buffers.iter().enumerate() {
        let Some(base) = buffer.attributes.iter().map(|a| a.offset).min() else {
            continue;
        };

        let mut interleaved = Vec::with_capacity(buffer.attributes.len());
        for attribute in &buffer.attributes {
            let rebased = attribute.offset - base;
            if buffer.array_stride > 0 && rebased >= buffer.array_stride {
                out.push(CanonicalBuffer {
                    source,
                    base_offset: attribute.offset,
                    layout: VertexBufferLayout {
                        array_stride: buffer.array_stride,
                        step_mode: buffer.step_mode,
                        attributes: vec![VertexAttribute {
                            offset: 0,
                            ..*attribute
                        }],
                    },
                });
            } else {
                interleaved.push(VertexAttribute {
                    offset: rebased,
                    ..*attribute
                });
            }
        }

        interleaved.sort_by_key(|a| a.location);
        out.push(CanonicalBuffer {
            source,
            base_offset: base,
            layout: VertexBufferLayout {
                array_stride: buffer.array_stride,
                step_mode: buffer.step_mode,
                attributes: interleaved,
            },
        });
    }

    out.sort_by_key(|b| b.layout.attributes[0].location);

    let layouts: Vec<&VertexBufferLayout> = out.iter().map(|b| &b.layout).collect();
    validate(&layouts)?;
    Ok(out)
}

/// Strip topologies always carry an index format; list topologies never do.
pub fn canonical_strip_index_format(
    topology: PrimitiveTopology,
    format: Option<IndexFormat>,
) -> Option<IndexFormat> {
    if topology.is_strip() {
        Some(format.unwrap_or(IndexFormat::Uint32))
    } else {
        None
    }
}

/// Normalize a layout so structurally equal layouts compare equal
pub fn canonicalize(layout: &GeometryLayoutDescriptor) -> Result<GeometryLayoutDescriptor, LayoutError> {
    let buffers = canonicalize_buffers(&layout.buffers)?
        .into_iter()
        .map(|b| b.layout)
        .collect();
    Ok(GeometryLayoutDescriptor {
        buffers,
        topology: layout.topology,
        strip_index_format: canonical_strip_index_format(layout.topology, layout.strip_index_format),
    })
}

/// Canonicalize and encode
pub fn encode(layout: &GeometryLayoutDescriptor) -> Result<Vec<u8>, LayoutError> {
    encode_canonical(&canonicalize(layout)?)
}

/// Encode a layout exactly as given. Fails on any field the packing cannot hold.
pub fn encode_canonical(layout: &GeometryLayoutDescriptor) -> Result<Vec<u8>, LayoutError> {
    let buffers: Vec<&VertexBufferLayout> = layout.buffers.iter().collect();
    validate(&buffers)?;

    let attribute_count: usize = layout.buffers.iter().map(|b| b.attributes.len()).sum();
    let mut bytes = Vec::with_capacity(1 + layout.buffers.len() * 2 + attribute_count * 3);

    let mut head = layout.topology.codec_id();
    if layout.topology.is_strip() && layout.strip_index_format == Some(IndexFormat::Uint16) {
        head |= STRIP_UINT16_BIT;
    }
    bytes.push(head);

    for buffer in &layout.buffers {
        let mut header = buffer.attributes.len() as u16 | ((buffer.array_stride as u16) << 4);
        if buffer.step_mode == VertexStepMode::Instance {
            header |= INSTANCE_STEP_BIT;
        }
        bytes.extend_from_slice(&header.to_le_bytes());

        for attribute in &buffer.attributes {
            let packed = attribute.offset as u16 | ((attribute.location as u16) << 12);
            bytes.extend_from_slice(&packed.to_le_bytes());
            bytes.push(attribute.format.codec_id());
        }
    }

    Ok(bytes)
}

/// Decode bytes produced by [`encode`]
pub fn decode(bytes: &[u8]) -> Result<GeometryLayoutDescriptor, LayoutError> {
    let (&head, mut rest) = bytes
        .split_first()
        .ok_or(LayoutError::Truncated { offset: 0 })?;

    if head & !(TOPOLOGY_MASK | STRIP_UINT16_BIT) != 0 {
        return Err(LayoutError::UnknownTopology(head));
    }
    let topology = PrimitiveTopology::from_codec_id(head & TOPOLOGY_MASK)
        .ok_or(LayoutError::UnknownTopology(head))?;
    let strip_index_format = topology.is_strip().then(|| {
        if head & STRIP_UINT16_BIT != 0 {
            IndexFormat::Uint16
        } else {
            IndexFormat::Uint32
        }
    });

    let mut buffers = Vec::new();
    while !rest.is_empty() {
        let offset = bytes.len() - rest.len();
        let [lo, hi, tail @ ..] = rest else {
            return Err(LayoutError::Truncated { offset });
        };
        let header = u16::from_le_bytes([*lo, *hi]);
        rest = tail;

        let count = (header & 0xF) as usize;
        if count == 0 {
            return Err(LayoutError::EmptyBuffer {
                buffer: buffers.len(),
            });
        }
        let array_stride = ((header >> 4) & 0x7FF) as u64;
        let step_mode = if header & INSTANCE_STEP_BIT != 0 {
            VertexStepMode::Instance
        } else {
            VertexStepMode::Vertex
        };

        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = bytes.len() - rest.len();
            let [lo, hi, format, tail @ ..] = rest else {
                return Err(LayoutError::Truncated { offset });
            };
            let packed = u16::from_le_bytes([*lo, *hi]);
            attributes.push(VertexAttribute {
                location: (packed >> 12) as u32,
                format: VertexFormat::from_codec_id(*format)
                    .ok_or(LayoutError::UnknownFormat(*format))?,
                offset: (packed & 0xFFF) as u64,
            });
            rest = tail;
        }

        buffers.push(VertexBufferLayout {
            array_stride,
            step_mode,
            attributes,
        });
    }

    let refs: Vec<&VertexBufferLayout> = buffers.iter().collect();
    validate(&refs)?;

    Ok(GeometryLayoutDescriptor {
        buffers,
        topology,
        strip_index_format,
    })
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";
const INVALID_NIBBLE: u8 = 0xFF;

const BYTE_TO_HEX: [[u8; 2]; 256] = {
    let mut table = [[0u8; 2]; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = [HEX_DIGITS[i >> 4], HEX_DIGITS[i & 0xF]];
        i += 1;
    }
    table
};

const HEX_TO_NIBBLE: [u8; 256] = {
    let mut table = [INVALID_NIBBLE; 256];
    let mut i = 0;
    while i < 16 {
        table[HEX_DIGITS[i] as usize] = i as u8;
        table[HEX_DIGITS[i].to_ascii_uppercase() as usize] = i as u8;
        i += 1;
    }
    table
};

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        let [hi, lo] = BYTE_TO_HEX[byte as usize];
        out.push(hi as char);
        out.push(lo as char);
    }
    out
}

pub fn from_hex(hex: &str) -> Result<Vec<u8>, LayoutError> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(LayoutError::InvalidHexLength(digits.len()));
    }

    let nibble = |position: usize| -> Result<u8, LayoutError> {
        match HEX_TO_NIBBLE[digits[position] as usize] {
            INVALID_NIBBLE => Err(LayoutError::InvalidHexDigit {
                position,
                digit: hex
                    .get(position..)
                    .and_then(|s| s.chars().next())
                    .unwrap_or('?'),
            }),
            value => Ok(value),
        }
    };

    (0..digits.len())
        .step_by(2)
        .map(|i| Ok((nibble(i)? << 4) | nibble(i + 1)?))
        .collect()
}

/// Check that every field fits the packing and that attributes don't collide.
fn validate(buffers: &[&VertexBufferLayout]) -> Result<(), LayoutError> {
    let mut seen_locations = 0u16;

    for (index, buffer) in buffers.iter().enumerate() {
        if buffer.attributes.is_empty() {
            return Err(LayoutError::EmptyBuffer { buffer: index });
        }
        if buffer.attributes.len() > MAX_ATTRIBUTES {
            return Err(LayoutError::TooManyAttributes {
                buffer: index,
                count: buffer.attributes.len(),
            });
        }
        if buffer.array_stride > MAX_STRIDE {
            return Err(LayoutError::StrideOutOfRange {
                buffer: index,
                stride: buffer.array_stride,
            });
        }

        for attribute in &buffer.attributes {
            if attribute.location > MAX_LOCATION {
                return Err(LayoutError::LocationOutOfRange {
                    location: attribute.location,
                });
            }
            if attribute.offset > MAX_OFFSET {
                return Err(LayoutError::OffsetOutOfRange {
                    location: attribute.location,
                    offset: attribute.offset,
                });
            }
            let bit = 1u16 << attribute.location;
            if seen_locations & bit != 0 {
                return Err(LayoutError::DuplicateLocation {
                    location: attribute.location,
                });
            }
            seen_locations |= bit;
        }

        let mut by_offset: Vec<&VertexAttribute> = buffer.attributes.iter().collect();
        by_offset.sort_by_key(|a| a.offset);
        for pair in by_offset.windows(2) {
            if pair[0].byte_range().end > pair[1].offset {
                return Err(LayoutError::OverlappingAttributes {
                    first: pair[0].location,
                    second: pair[1].location,
                });
            }
        }
    }

    Ok(())
}
