//! Name-value pair codec.
//!
//! Pairs are used for `FCGI_PARAMS` streams and for capability negotiation
//! (`FCGI_GET_VALUES` / `FCGI_GET_VALUES_RESULT`). Each pair is encoded as
//! a key length, a value length, then the raw key and value bytes.
//!
//! ## Length Format
//!
//! ```text
//! 0xxxxxxx                              lengths 0..=127
//! 1xxxxxxx xxxxxxxx xxxxxxxx xxxxxxxx   31-bit big-endian length
//! ```

use bytes::BufMut;

/// Largest length that fits the one-byte form.
const SHORT_LENGTH_MAX: usize = 0x7f;

/// Largest length the four-byte form can carry.
pub const MAX_PAIR_LENGTH: usize = 0x7fff_ffff;

/// Decode a sequence of name-value pairs.
///
/// Decoding stops at the first pair that cannot be completed from the
/// remaining bytes; pairs decoded before that point are returned.
pub fn decode_pairs(input: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let Some((key_len, n)) = read_length(&input[pos..]) else {
            break;
        };
        pos += n;

        let Some((value_len, n)) = read_length(&input[pos..]) else {
            break;
        };
        pos += n;

        let remaining = input.len() - pos;
        if remaining < key_len || remaining - key_len < value_len {
            break;
        }

        let key = input[pos..pos + key_len].to_vec();
        pos += key_len;
        let value = input[pos..pos + value_len].to_vec();
        pos += value_len;

        pairs.push((key, value));
    }

    pairs
}

/// Append one encoded pair to `buf`.
///
/// Keys and values are limited to [`MAX_PAIR_LENGTH`] bytes; longer
/// inputs trip a debug assertion.
pub fn encode_pair_into<B: BufMut>(buf: &mut B, key: &[u8], value: &[u8]) {
    write_length(buf, key.len());
    write_length(buf, value.len());
    buf.put_slice(key);
    buf.put_slice(value);
}

/// Encode one pair using the shortest length forms.
pub fn encode_pair(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + value.len() + 8);
    encode_pair_into(&mut buf, key, value);
    buf
}

/// Read a length prefix, returning the length and the bytes it occupied.
fn read_length(input: &[u8]) -> Option<(usize, usize)> {
    let first = *input.first()?;
    if first & 0x80 == 0 {
        return Some((first as usize, 1));
    }
    let bytes: [u8; 4] = input.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(bytes) & 0x7fff_ffff;
    Some((len as usize, 4))
}

fn write_length<B: BufMut>(buf: &mut B, len: usize) {
    debug_assert!(len <= MAX_PAIR_LENGTH, "pair length {len} exceeds 31 bits");
    if len <= SHORT_LENGTH_MAX {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32((len as u32 & 0x7fff_ffff) | 0x8000_0000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_lengths() {
        let encoded = encode_pair(b"REQUEST_URI", b"/x");
        assert_eq!(encoded[0], 11);
        assert_eq!(encoded[1], 2);
        assert_eq!(&encoded[2..13], b"REQUEST_URI");
        assert_eq!(&encoded[13..], b"/x");
    }

    #[test]
    fn test_largest_length() {
        let mut buf = Vec::new();
        write_length(&mut buf, MAX_PAIR_LENGTH);
        assert_eq!(buf, [0xff, 0xff, 0xff, 0xff]);
        assert_eq!(read_length(&buf), Some((MAX_PAIR_LENGTH, 4)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exceeds 31 bits")]
    fn test_oversized_length_asserts() {
        let mut buf = Vec::new();
        write_length(&mut buf, MAX_PAIR_LENGTH + 1);
    }

    #[test]
    fn test_long_lengths() {
        let key = vec![b'k'; 128];
        let value = vec![b'v'; 70_000];
        let encoded = encode_pair(&key, &value);

        assert_eq!(&encoded[..4], &[0x80, 0x00, 0x00, 0x80]);
        assert_eq!(&encoded[4..8], &[0x80, 0x01, 0x11, 0x70]);
        assert_eq!(encoded.len(), 8 + 128 + 70_000);
    }

    #[test]
    fn test_round_trip() {
        let long_key = vec![0xffu8; 200];
        let mut buf = encode_pair(b"", b"empty key");
        buf.extend_from_slice(&encode_pair(&long_key, b""));
        buf.extend_from_slice(&encode_pair(b"a=b\0c", b"\x01\x02"));

        let pairs = decode_pairs(&buf);
        assert_eq!(
            pairs,
            vec![
                (b"".to_vec(), b"empty key".to_vec()),
                (long_key, b"".to_vec()),
                (b"a=b\0c".to_vec(), b"\x01\x02".to_vec()),
            ]
        );
    }

    #[test]
    fn test_boundary_127() {
        let key = vec![b'a'; 127];
        let encoded = encode_pair(&key, b"1");
        assert_eq!(encoded[0], 127);
        assert_eq!(decode_pairs(&encoded), vec![(key, b"1".to_vec())]);
    }

    #[test]
    fn test_truncated_value_stops() {
        let mut buf = encode_pair(b"A", b"1");
        let second = encode_pair(b"B", b"22");
        buf.extend_from_slice(&second[..second.len() - 1]);

        assert_eq!(decode_pairs(&buf), vec![(b"A".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn test_truncated_length_stops() {
        // Long-form key length cut after two bytes
        assert!(decode_pairs(&[0x80, 0x00]).is_empty());
        // Key length present, value length missing
        assert!(decode_pairs(&[0x01]).is_empty());
        assert!(decode_pairs(&[]).is_empty());
    }
}
