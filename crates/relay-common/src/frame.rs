//! RFC 6455 frame decoding and encoding.
//!
//! [`decode`] parses exactly one frame off the front of a byte buffer and
//! reports how many bytes it consumed, so a caller can reassemble frames
//! from arbitrarily chunked socket reads. [`encode`] builds server-side
//! (always unmasked, always final) frames. No I/O happens here.

use thiserror::Error;

/// Text frame opcode.
pub const OP_TEXT: u8 = 0x1;
/// Connection close opcode.
pub const OP_CLOSE: u8 = 0x8;
/// Ping opcode.
pub const OP_PING: u8 = 0x9;
/// Pong opcode.
pub const OP_PONG: u8 = 0xA;

/// Largest payload length [`decode`] accepts (2^53 − 1).
///
/// A 64-bit length extension can declare far more than any peer of this
/// relay legitimately sends; declarations beyond this cap are rejected
/// before any payload bytes are buffered.
pub const MAX_PAYLOAD_LEN: u64 = (1 << 53) - 1;

/// A decoded protocol unit. Payloads are already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this is the final fragment of a message.
    pub fin: bool,
    /// Raw opcode nibble; see the `OP_*` constants.
    pub opcode: u8,
    /// Payload bytes, unmasked if the wire frame carried a masking key.
    pub payload: Vec<u8>,
}

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame header declared a payload beyond [`MAX_PAYLOAD_LEN`].
    /// The connection must be closed with status 1009.
    #[error("declared payload length {declared} exceeds maximum {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge {
        /// Length the header declared.
        declared: u64,
    },
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(raw)
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a complete frame is
/// available, where `consumed` is the number of bytes the frame occupied.
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// no bytes are consumed and the caller should retry once more bytes
/// arrive. Never reads past the available bytes.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] when the header declares a
/// payload beyond [`MAX_PAYLOAD_LEN`].
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 == 0x80;
    let opcode = buf[0] & 0x0f;
    let masked = buf[1] & 0x80 == 0x80;
    let mut payload_len = u64::from(buf[1] & 0x7f);
    let mut offset = 2usize;

    if payload_len == 126 {
        if buf.len() < offset + 2 {
            return Ok(None);
        }
        payload_len = u64::from(be_u16(&buf[offset..]));
        offset += 2;
    } else if payload_len == 127 {
        if buf.len() < offset + 8 {
            return Ok(None);
        }
        let declared = be_u64(&buf[offset..]);
        if declared > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge { declared });
        }
        payload_len = declared;
        offset += 8;
    }

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[offset..offset + 4]);
        offset += 4;
        Some(key)
    } else {
        None
    };

    // On 32-bit targets a length above usize::MAX can never be buffered.
    let len =
        usize::try_from(payload_len).map_err(|_| FrameError::PayloadTooLarge {
            declared: payload_len,
        })?;
    let end = offset
        .checked_add(len)
        .ok_or(FrameError::PayloadTooLarge { declared: payload_len })?;
    if buf.len() < end {
        return Ok(None);
    }

    let mut payload = buf[offset..end].to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        end,
    )))
}

/// Encodes a server-side frame: unmasked, fin always set (this relay
/// never produces fragmented messages). The length field is chosen by
/// payload size: <126 literal, ≤65535 via the 16-bit extension, else the
/// 64-bit extension.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // casts guarded by the length branches
pub fn encode(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(10 + len);
    out.push(0x80 | (opcode & 0x0f));

    if len < 126 {
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

/// Encodes a close frame: 2-byte big-endian status code followed by the
/// UTF-8 reason bytes, wrapped via [`encode`] with [`OP_CLOSE`].
#[must_use]
pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + reason.len());
    body.extend_from_slice(&code.to_be_bytes());
    body.extend_from_slice(reason.as_bytes());
    encode(OP_CLOSE, &body)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..2048)
    }

    fn arb_opcode() -> impl Strategy<Value = u8> {
        prop::sample::select(vec![OP_TEXT, OP_CLOSE, OP_PING, OP_PONG])
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(opcode in arb_opcode(), payload in arb_payload()) {
            let bytes = encode(opcode, &payload);
            let (frame, consumed) = decode(&bytes).unwrap().expect("complete");
            prop_assert_eq!(consumed, bytes.len());
            prop_assert!(frame.fin);
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert_eq!(frame.payload, payload);
        }

        /// Splitting an encoded frame at any point must round-trip through
        /// "need more data" and still yield exactly one identical frame.
        #[test]
        fn any_two_chunk_split_reassembles(payload in arb_payload(), split in any::<prop::sample::Index>()) {
            let bytes = encode(OP_TEXT, &payload);
            let cut = split.index(bytes.len() + 1);

            let mut buf = bytes[..cut].to_vec();
            if cut < bytes.len() {
                prop_assert_eq!(decode(&buf).unwrap(), None);
            }
            buf.extend_from_slice(&bytes[cut..]);

            let (frame, consumed) = decode(&buf).unwrap().expect("complete");
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(frame.payload, payload);
        }

        #[test]
        fn masking_is_self_inverse(payload in arb_payload(), key in any::<[u8; 4]>()) {
            // Build a masked wire frame by hand and decode it.
            let unmasked = encode(OP_TEXT, &payload);
            let header_len = unmasked.len() - payload.len();
            let mut wire = unmasked[..header_len].to_vec();
            wire[1] |= 0x80;
            wire.extend_from_slice(&key);
            wire.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));

            let (frame, consumed) = decode(&wire).unwrap().expect("complete");
            prop_assert_eq!(consumed, wire.len());
            prop_assert_eq!(frame.payload, payload);
        }
    }
}
