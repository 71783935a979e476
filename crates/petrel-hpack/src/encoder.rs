//! Exposes the struct `Encoder` that turns header lists into
//! HPACK-encoded header blocks.
//!
//! The encoder mirrors every incremental-indexing insertion into its
//! own dynamic table, so a peer decoder fed the same blocks in the same
//! order reconstructs identical state: `decode(encode(headers))`
//! reproduces `headers` in content and order.

use tracing::trace;

use super::{HeaderTable, STATIC_TABLE};

/// Writes an integer under the given bit prefix, cf. RFC 7541
/// section 5.1. `leading` carries the representation bits above the
/// prefix (e.g. `0x80` for an indexed unit).
pub(crate) fn encode_integer_into(value: usize, prefix_size: u8, leading: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&prefix_size));
    let mask = if prefix_size == 8 {
        0xff
    } else {
        (1u8 << prefix_size) - 1
    };

    if value < mask as usize {
        out.push(leading | value as u8);
        return;
    }

    out.push(leading | mask);
    let mut rest = value - mask as usize;
    while rest >= 128 {
        out.push(0x80 | (rest % 128) as u8);
        rest /= 128;
    }
    out.push(rest as u8);
}

/// Writes a raw (non-Huffman) length-prefixed string, cf. RFC 7541
/// section 5.2.
fn encode_string_into(s: &[u8], out: &mut Vec<u8>) {
    encode_integer_into(s.len(), 7, 0, out);
    out.extend_from_slice(s);
}

/// Encodes header lists using HPACK. Maintains the dynamic table state
/// necessary for the peer decoder to follow along; blocks must be sent
/// in the order they were encoded.
pub struct Encoder<'a> {
    header_table: HeaderTable<'a>,
    /// A queued dynamic-table size update, emitted at the head of the
    /// next encoded block, cf. RFC 7541 section 4.2.
    pending_size_update: Option<usize>,
}

impl Default for Encoder<'_> {
    fn default() -> Encoder<'static> {
        Encoder::new()
    }
}

impl<'a> Encoder<'a> {
    pub fn new() -> Encoder<'a> {
        Encoder {
            header_table: HeaderTable::with_static_table(STATIC_TABLE),
            pending_size_update: None,
        }
    }

    /// Lower (or raise) the dynamic table bound. The change is applied
    /// to the local table immediately and signalled to the peer at the
    /// start of the next block.
    pub fn set_max_table_size(&mut self, max_size: usize) {
        self.header_table.dynamic_table.set_max_table_size(max_size);
        self.pending_size_update = Some(max_size);
    }

    /// Current size of the dynamic table (sum of entry sizes).
    pub fn table_size(&self) -> usize {
        self.header_table.dynamic_table.size()
    }

    /// Encode a header list into a self-contained block.
    pub fn encode<'b>(
        &mut self,
        headers: impl IntoIterator<Item = (&'b [u8], &'b [u8])>,
    ) -> Vec<u8> {
        let mut out = Vec::new();

        if let Some(new_size) = self.pending_size_update.take() {
            encode_integer_into(new_size, 5, 0x20, &mut out);
        }

        for (name, value) in headers {
            self.encode_header_into(name, value, &mut out);
        }
        out
    }

    /// Encode a header list entirely as never-indexed literals, for
    /// values that must not enter any compression table on the path.
    pub fn encode_sensitive<'b>(
        &mut self,
        headers: impl IntoIterator<Item = (&'b [u8], &'b [u8])>,
    ) -> Vec<u8> {
        let mut out = Vec::new();

        if let Some(new_size) = self.pending_size_update.take() {
            encode_integer_into(new_size, 5, 0x20, &mut out);
        }

        for (name, value) in headers {
            let name_index = self.header_table.find_name(name).unwrap_or(0);
            encode_integer_into(name_index, 4, 0x10, &mut out);
            if name_index == 0 {
                encode_string_into(name, &mut out);
            }
            encode_string_into(value, &mut out);
        }
        out
    }

    fn encode_header_into(&mut self, name: &[u8], value: &[u8], out: &mut Vec<u8>) {
        if let Some(index) = self.header_table.find(name, value) {
            trace!(%index, "fully indexed");
            encode_integer_into(index, 7, 0x80, out);
            return;
        }

        // literal with incremental indexing: indexed name if we have
        // one, literal name otherwise; either way the pair enters the
        // dynamic table, matching what the peer decoder will do
        let name_index = self.header_table.find_name(name).unwrap_or(0);
        encode_integer_into(name_index, 6, 0x40, out);
        if name_index == 0 {
            encode_string_into(name, out);
        }
        encode_string_into(value, out);

        self.header_table.add_header(name.to_vec(), value.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decoder, HeaderPair};
    use pretty_assertions::assert_eq;

    fn owned(raw: &[(&[u8], &[u8])]) -> Vec<HeaderPair> {
        raw.iter().map(|(n, v)| (n.to_vec(), v.to_vec())).collect()
    }

    fn round_trip(headers: &[(&[u8], &[u8])]) {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let block = encoder.encode(headers.iter().copied());
        assert_eq!(decoder.decode(&block).unwrap(), owned(headers));
    }

    #[test]
    fn static_entry_encodes_as_single_octet() {
        let mut encoder = Encoder::new();
        let block = encoder.encode([(&b":method"[..], &b"GET"[..])]);
        assert_eq!(block, vec![0x82]);
    }

    #[test]
    fn round_trip_static_resolvable() {
        round_trip(&[
            (b":method", b"GET"),
            (b":path", b"/"),
            (b":scheme", b"https"),
        ]);
    }

    #[test]
    fn round_trip_literals() {
        round_trip(&[
            (b":method", b"GET"),
            (b":path", b"/api/v1/flock"),
            (b"x-petrel-trace", b"0123456789abcdef"),
            (b"accept", b"application/json"),
        ]);
    }

    #[test]
    fn round_trip_duplicates_in_order() {
        round_trip(&[
            (b"set-cookie", b"a=1"),
            (b"set-cookie", b"b=2"),
            (b"set-cookie", b"a=1"),
        ]);
    }

    #[test]
    fn repeated_header_uses_the_dynamic_table() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();

        let first = encoder.encode([(&b"x-request-id"[..], &b"7f3a"[..])]);
        assert_eq!(
            decoder.decode(&first).unwrap(),
            owned(&[(b"x-request-id", b"7f3a")])
        );

        // the second occurrence is a one-octet indexed reference
        let second = encoder.encode([(&b"x-request-id"[..], &b"7f3a"[..])]);
        assert_eq!(second, vec![0xbe]);
        assert_eq!(
            decoder.decode(&second).unwrap(),
            owned(&[(b"x-request-id", b"7f3a")])
        );
    }

    #[test]
    fn size_update_is_emitted_and_tracked() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();

        let first = encoder.encode([(&b"x-a"[..], &b"1"[..])]);
        decoder.decode(&first).unwrap();
        assert!(decoder.table_size() > 0);

        encoder.set_max_table_size(0);
        let second = encoder.encode([(&b":method"[..], &b"GET"[..])]);
        // the block leads with a size update to zero
        assert_eq!(second[0], 0x20);
        decoder.decode(&second).unwrap();
        assert_eq!(decoder.table_size(), 0);
        assert_eq!(encoder.table_size(), 0);
    }

    #[test]
    fn sensitive_headers_stay_out_of_the_table() {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new();

        let block = encoder.encode_sensitive([(&b"authorization"[..], &b"Bearer shhh"[..])]);
        // never-indexed representation with the name index for
        // `authorization` (static table entry 23, spilling past the
        // 4-bit prefix: 0x1f then 23 - 15)
        assert_eq!(&block[..2], &[0x1f, 8]);
        assert_eq!(
            decoder.decode(&block).unwrap(),
            owned(&[(b"authorization", b"Bearer shhh")])
        );
        assert_eq!(encoder.table_size(), 0);
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn integer_encoding_matches_decoding() {
        for value in [0usize, 9, 30, 31, 127, 128, 255, 1337, 1 << 20] {
            for prefix in [4u8, 5, 6, 7, 8] {
                let mut out = Vec::new();
                encode_integer_into(value, prefix, 0, &mut out);
                let (decoded, consumed) = crate::decoder::decode_integer(&out, prefix).unwrap();
                assert_eq!((decoded, consumed), (value, out.len()), "value={value} prefix={prefix}");
            }
        }
    }
}
