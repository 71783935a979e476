//! Exposes the struct `Decoder` that allows for HPACK-encoded header
//! blocks to be decoded into a header list.
//!
//! The decoder follows HPACK rules only; it treats header names and
//! values as opaque octets and performs no semantic checks.

use tracing::trace;

use super::{HeaderPair, HeaderTable, StaticTable, STATIC_TABLE};

/// Decodes an integer encoded with a given prefix size (in bits),
/// cf. RFC 7541 section 5.1.
///
/// The first byte of `buf` is the octet carrying the prefix. Returns
/// the decoded integer and the number of octets consumed.
pub(crate) fn decode_integer(buf: &[u8], prefix_size: u8) -> Result<(usize, usize), DecoderError> {
    if !(1..=8).contains(&prefix_size) {
        return Err(DecoderError::Integer(IntegerDecodingError::InvalidPrefix));
    }
    let Some(&first) = buf.first() else {
        return Err(DecoderError::Integer(IntegerDecodingError::NotEnoughOctets));
    };

    let mask: u8 = if prefix_size == 8 {
        0xff
    } else {
        (1u8 << prefix_size) - 1
    };
    let mut value = (first & mask) as usize;
    if value < mask as usize {
        // the value fit in the prefix bits
        return Ok((value, 1));
    }

    // continuation octets follow, 7 value bits each. The octet limit
    // keeps the largest decodable value well under 2^32; RFC 7541
    // section 5.1 requires excessively large encodings to be errors.
    const OCTET_LIMIT: usize = 5;

    let mut consumed = 1;
    let mut shift = 0u32;
    for &octet in &buf[1..] {
        consumed += 1;
        value += ((octet & 0x7f) as usize) << shift;
        shift += 7;

        if octet & 0x80 == 0 {
            return Ok((value, consumed));
        }
        if consumed == OCTET_LIMIT {
            return Err(DecoderError::Integer(IntegerDecodingError::TooManyOctets));
        }
    }

    // ran out of input before the terminating octet
    Err(DecoderError::Integer(IntegerDecodingError::NotEnoughOctets))
}

/// Decodes a length-prefixed octet string, cf. RFC 7541 section 5.2.
///
/// Returns the string and the number of octets consumed. Huffman-coded
/// strings (H bit set) are rejected: this engine never emits them and
/// does not carry the code table.
pub(crate) fn decode_string(buf: &[u8]) -> Result<(&[u8], usize), DecoderError> {
    let Some(&first) = buf.first() else {
        return Err(DecoderError::String(StringDecodingError::NotEnoughOctets));
    };
    if first & 0x80 != 0 {
        return Err(DecoderError::String(
            StringDecodingError::HuffmanNotSupported,
        ));
    }

    let (len, consumed) = decode_integer(buf, 7)?;
    trace!(%consumed, %len, "decode_string");
    if consumed + len > buf.len() {
        return Err(DecoderError::String(StringDecodingError::NotEnoughOctets));
    }
    Ok((&buf[consumed..consumed + len], consumed + len))
}

/// The five ways a unit of an HPACK block can be represented,
/// classified by the leading bits of its first octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRepresentation {
    /// `1xxxxxxx`
    Indexed,
    /// `01xxxxxx`
    LiteralWithIncrementalIndexing,
    /// `001xxxxx`
    SizeUpdate,
    /// `0001xxxx`
    LiteralNeverIndexed,
    /// `0000xxxx`
    LiteralWithoutIndexing,
}

impl FieldRepresentation {
    fn new(octet: u8) -> FieldRepresentation {
        if octet & 0x80 != 0 {
            FieldRepresentation::Indexed
        } else if octet & 0x40 != 0 {
            FieldRepresentation::LiteralWithIncrementalIndexing
        } else if octet & 0x20 != 0 {
            FieldRepresentation::SizeUpdate
        } else if octet & 0x10 != 0 {
            FieldRepresentation::LiteralNeverIndexed
        } else {
            FieldRepresentation::LiteralWithoutIndexing
        }
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IntegerDecodingError {
    /// Excessively long encodings must be treated as errors, whether
    /// measured in octets or in value.
    #[error("too many octets in the integer encoding")]
    TooManyOctets,
    #[error("not enough octets in the buffer")]
    NotEnoughOctets,
    /// Only prefixes of 1 to 8 bits are valid.
    #[error("invalid prefix")]
    InvalidPrefix,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StringDecodingError {
    #[error("not enough octets in the buffer")]
    NotEnoughOctets,
    #[error("huffman-coded string literals are not supported")]
    HuffmanNotSupported,
}

/// Everything that can go wrong while decoding an HPACK header block.
#[derive(PartialEq, Eq, Copy, Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DecoderError {
    /// An indexed unit referenced past the end of the combined table.
    #[error("header index out of bounds")]
    HeaderIndexOutOfBounds,
    #[error("integer decoding error: {0}")]
    Integer(IntegerDecodingError),
    #[error("string decoding error: {0}")]
    String(StringDecodingError),
    /// A size update tried to grow the table past the bound the
    /// protocol negotiated for this decoder.
    #[error("dynamic table size update exceeds the negotiated maximum")]
    InvalidMaxDynamicSize,
    /// A header block may not end with a size update.
    #[error("dynamic table size update at the end of a header block")]
    SizeUpdateAtEnd,
}

/// Decodes headers encoded using HPACK. Maintains the dynamic table
/// state necessary to correctly decode subsequent blocks on the same
/// connection; blocks must be fed in the order they arrived.
pub struct Decoder<'a> {
    header_table: HeaderTable<'a>,
    max_allowed_table_size: Option<usize>,
}

impl Default for Decoder<'_> {
    fn default() -> Decoder<'static> {
        Decoder::with_static_table(STATIC_TABLE)
    }
}

impl<'a> Decoder<'a> {
    pub fn new() -> Decoder<'a> {
        Decoder::with_static_table(STATIC_TABLE)
    }

    fn with_static_table(static_table: StaticTable<'a>) -> Decoder<'a> {
        Decoder {
            header_table: HeaderTable::with_static_table(static_table),
            max_allowed_table_size: None,
        }
    }

    /// Sets a new maximum dynamic table size for the decoder, evicting
    /// entries as needed.
    pub fn set_max_table_size(&mut self, new_max_size: usize) {
        self.header_table
            .dynamic_table
            .set_max_table_size(new_max_size);
    }

    /// Sets the ceiling that in-band size updates may not exceed; they
    /// error out with [DecoderError::InvalidMaxDynamicSize] past it.
    pub fn set_max_allowed_table_size(&mut self, max_allowed_size: usize) {
        self.max_allowed_table_size = Some(max_allowed_size);
    }

    /// Current size of the dynamic table (sum of entry sizes).
    pub fn table_size(&self) -> usize {
        self.header_table.dynamic_table.size()
    }

    /// Decode the header block in `buf`, returning the header list in
    /// wire order with duplicates preserved.
    ///
    /// The buffer must hold one entire block: in HTTP/2 terms, a
    /// HEADERS fragment plus any CONTINUATION fragments the peer chose
    /// to split it into, or one fragment at a time if the peer encodes
    /// each fragment as a self-contained block.
    ///
    /// Iterates until the input is exhausted; an empty input yields an
    /// empty list. Never recurses, so adversarial block lengths cannot
    /// exhaust the stack.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<HeaderPair>, DecoderError> {
        let mut headers = Vec::new();
        let mut cursor = 0;
        let mut last_was_size_update = false;

        while cursor < buf.len() {
            let rest = &buf[cursor..];
            let representation = FieldRepresentation::new(rest[0]);
            last_was_size_update = representation == FieldRepresentation::SizeUpdate;

            let consumed = match representation {
                FieldRepresentation::Indexed => {
                    let (index, consumed) = decode_integer(rest, 7)?;
                    trace!(%index, "indexed header");
                    let (name, value) = self
                        .header_table
                        .get_from_table(index)
                        .ok_or(DecoderError::HeaderIndexOutOfBounds)?;
                    headers.push((name.to_vec(), value.to_vec()));
                    consumed
                }
                FieldRepresentation::LiteralWithIncrementalIndexing => {
                    let ((name, value), consumed) = self.decode_literal(rest, 6)?;
                    headers.push((name.clone(), value.clone()));
                    self.header_table.add_header(name, value);
                    consumed
                }
                FieldRepresentation::LiteralWithoutIndexing => {
                    let ((name, value), consumed) = self.decode_literal(rest, 4)?;
                    headers.push((name, value));
                    consumed
                }
                FieldRepresentation::LiteralNeverIndexed => {
                    // same as above on the decode side; the distinction
                    // only matters to intermediaries re-encoding blocks
                    let ((name, value), consumed) = self.decode_literal(rest, 4)?;
                    headers.push((name, value));
                    consumed
                }
                FieldRepresentation::SizeUpdate => self.apply_size_update(rest)?,
            };

            cursor += consumed;
        }

        if last_was_size_update {
            return Err(DecoderError::SizeUpdateAtEnd);
        }

        Ok(headers)
    }

    /// Decodes a literal unit: an N-bit name index (0 meaning a literal
    /// name string follows) and a literal value string.
    fn decode_literal(
        &self,
        buf: &[u8],
        prefix: u8,
    ) -> Result<((Vec<u8>, Vec<u8>), usize), DecoderError> {
        let (name_index, mut consumed) = decode_integer(buf, prefix)?;

        let name = if name_index == 0 {
            let (name, name_len) = decode_string(&buf[consumed..])?;
            consumed += name_len;
            name.to_vec()
        } else {
            let (name, _) = self
                .header_table
                .get_from_table(name_index)
                .ok_or(DecoderError::HeaderIndexOutOfBounds)?;
            name.to_vec()
        };

        let (value, value_len) = decode_string(&buf[consumed..])?;
        consumed += value_len;

        Ok(((name, value.to_vec()), consumed))
    }

    /// Applies a dynamic table size update, evicting entries when the
    /// bound shrinks. Returns octets consumed.
    fn apply_size_update(&mut self, buf: &[u8]) -> Result<usize, DecoderError> {
        let (new_size, consumed) = decode_integer(buf, 5)?;
        if let Some(max_allowed) = self.max_allowed_table_size {
            if new_size > max_allowed {
                return Err(DecoderError::InvalidMaxDynamicSize);
            }
        }
        trace!(
            old_size = self.header_table.dynamic_table.max_size(),
            %new_size,
            "dynamic table size update"
        );
        self.header_table.dynamic_table.set_max_table_size(new_size);
        Ok(consumed)
    }
}
