//! CESU-8: identical to UTF-8 except that supplementary-plane code points
//! (>= U+10000) are encoded as two three-byte surrogate sequences instead
//! of one four-byte sequence. Every string on the wire uses this encoding,
//! so the protocol handler never reaches for the platform's UTF-8 routines
//! when talking to the engine (spec.md Design Notes §9).

use crate::errors::{CodecError, CodecResult};

/// Decode a CESU-8 byte sequence into a `String`.
pub fn decode(bytes: &[u8]) -> CodecResult<String> {
    cesu8::from_cesu8(bytes)
        .map(|cow| cow.into_owned())
        .map_err(|_| CodecError::InvalidCesu8)
}

/// Encode `s` as CESU-8.
pub fn encode(s: &str) -> Vec<u8> {
    cesu8::to_cesu8(s).into_owned()
}

/// Encode `s` as CESU-8 into a buffer that reserves `prefix_len` leading
/// bytes for a caller-supplied header. The returned buffer has length
/// `prefix_len + encoded_len`; bytes `[0..prefix_len)` are zeroed and the
/// caller fills them in afterwards (tag byte, length field, ...).
///
/// Returns the buffer together with the encoded payload length (i.e. the
/// length excluding the reserved prefix), since callers typically need
/// that value for a length header.
pub fn encode_with_prefix(s: &str, prefix_len: usize) -> (Vec<u8>, usize) {
    let payload = encode(s);
    let payload_len = payload.len();
    let mut buf = vec![0u8; prefix_len + payload_len];
    buf[prefix_len..].copy_from_slice(&payload);
    (buf, payload_len)
}
