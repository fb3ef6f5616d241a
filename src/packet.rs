//! Packet Codec (C1): frames `$payload#cc`, checksums, RLE, binary escape,
//! and ack/nak bytes. Oblivious to semantics — yields a tagged `Packet`
//! sum type per §4.1. Grounded on the wire grammar in distilled spec §6
//! and the enum-first style of the `gdbstub` crate family in
//! `examples/other_examples/*gdbstub*`.

use crate::error::ProtocolError;

pub const ACK: u8 = b'+';
pub const NAK: u8 = b'-';
pub const START: u8 = b'$';
pub const END: u8 = b'#';
pub const ESCAPE: u8 = 0x7d;
pub const ESCAPE_XOR: u8 = 0x20;
pub const RLE_MARK: u8 = b'*';
pub const NOTIFICATION_START: u8 = b'%';

/// Tagged sum type the codec hands to higher layers; the codec itself
/// never interprets payload contents.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    /// A normal command/response payload, raw bytes (already de-escaped
    /// and RLE-expanded).
    Normal(Vec<u8>),
    Ok,
    Error(u8),
    /// Empty reply: stub doesn't support this request.
    Unsupported,
    /// `%...` — out of band, not subject to the request/response queue.
    Notification(Vec<u8>),
}

/// Sum of payload bytes mod 256, rendered as two lowercase hex digits.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn hex_digit(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        10..=15 => b'a' + (nibble - 10),
        _ => unreachable!(),
    }
}

fn from_hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Escape `0x7d` and any byte XORed into `0x7d` needs escaping too — the
/// protocol escapes `$`, `#`, `}`, and `*` when they appear in binary `X`
/// payloads; those are exactly the 4 bytes with protocol meaning.
pub fn escape_binary(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        match b {
            b'$' | b'#' | ESCAPE | RLE_MARK => {
                out.push(ESCAPE);
                out.push(b ^ ESCAPE_XOR);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Reverse of `escape_binary`, also expanding RLE runs introduced by the
/// stub (`*<n>` repeats the previous byte `n - 29 + 1` times per the GDB
/// remote protocol convention for `*`).
pub fn unescape_and_expand(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        let b = payload[i];
        if b == ESCAPE {
            let next = *payload
                .get(i + 1)
                .ok_or_else(|| ProtocolError::Malformed("dangling escape byte".into()))?;
            out.push(next ^ ESCAPE_XOR);
            i += 2;
        } else if b == RLE_MARK {
            let prev = *out
                .last()
                .ok_or_else(|| ProtocolError::Malformed("RLE run with no preceding byte".into()))?;
            let count_byte = *payload
                .get(i + 1)
                .ok_or_else(|| ProtocolError::Malformed("dangling RLE count".into()))?;
            if (count_byte as i16) < 29 {
                return Err(ProtocolError::Malformed("RLE count below minimum 29".into()));
            }
            let repeat = (count_byte - 29) as usize;
            for _ in 0..repeat {
                out.push(prev);
            }
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

/// Encode a raw payload (already binary-escaped by the caller if it's an
/// `X` packet) into a full `$payload#cc` frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let cc = checksum(payload);
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(START);
    out.extend_from_slice(payload);
    out.push(END);
    out.push(hex_digit(cc >> 4));
    out.push(hex_digit(cc & 0xf));
    out
}

/// Result of attempting to decode one frame out of a byte buffer: either
/// a complete frame was found (with the ack byte the reader should emit),
/// or more bytes are needed, or the buffer starts with an ack/nak byte
/// to consume, or a notification frame.
pub enum DecodeOutcome {
    /// `(packet, consumed_bytes, checksum_ok)` — caller is responsible for
    /// emitting `+`/`-` based on `checksum_ok` and feeding it back in for
    /// no-ack-mode distinction.
    Frame {
        packet: Packet,
        consumed: usize,
        checksum_ok: bool,
    },
    /// A lone `+` or `-` byte at the head of the buffer.
    AckByte { ack: bool, consumed: usize },
    NeedMoreBytes,
}

/// Scan `buf` for one complete packet (command/response or notification).
/// Does not classify command-vs-response semantics — callers decide that
/// from context using `Packet::Normal`'s raw bytes.
pub fn decode_one(buf: &[u8]) -> Result<DecodeOutcome, ProtocolError> {
    if buf.is_empty() {
        return Ok(DecodeOutcome::NeedMoreBytes);
    }
    match buf[0] {
        ACK => return Ok(DecodeOutcome::AckByte { ack: true, consumed: 1 }),
        NAK => return Ok(DecodeOutcome::AckByte { ack: false, consumed: 1 }),
        _ => {}
    }

    let is_notification = buf[0] == NOTIFICATION_START;
    if buf[0] != START && !is_notification {
        return Err(ProtocolError::Malformed(format!(
            "expected '$', '%', '+' or '-', got {:#x}",
            buf[0]
        )));
    }

    let end_idx = match buf.iter().position(|&b| b == END) {
        Some(idx) => idx,
        None => return Ok(DecodeOutcome::NeedMoreBytes),
    };
    if buf.len() < end_idx + 3 {
        return Ok(DecodeOutcome::NeedMoreBytes);
    }

    let raw_payload = &buf[1..end_idx];
    let hi = from_hex_digit(buf[end_idx + 1])
        .ok_or_else(|| ProtocolError::Malformed("non-hex checksum digit".into()))?;
    let lo = from_hex_digit(buf[end_idx + 2])
        .ok_or_else(|| ProtocolError::Malformed("non-hex checksum digit".into()))?;
    let expected = (hi << 4) | lo;
    let actual = checksum(raw_payload);
    let checksum_ok = expected == actual;
    let consumed = end_idx + 3;

    if is_notification {
        let expanded = unescape_and_expand(raw_payload)?;
        return Ok(DecodeOutcome::Frame {
            packet: Packet::Notification(expanded),
            consumed,
            checksum_ok,
        });
    }

    let packet = if raw_payload.is_empty() {
        Packet::Unsupported
    } else if raw_payload == b"OK" {
        Packet::Ok
    } else if raw_payload[0] == b'E' && raw_payload.len() == 3 {
        match (from_hex_digit(raw_payload[1]), from_hex_digit(raw_payload[2])) {
            (Some(hi), Some(lo)) => Packet::Error((hi << 4) | lo),
            _ => Packet::Normal(unescape_and_expand(raw_payload)?),
        }
    } else {
        Packet::Normal(unescape_and_expand(raw_payload)?)
    };

    Ok(DecodeOutcome::Frame {
        packet,
        consumed,
        checksum_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_law_round_trips_plain_payload() {
        let payload = b"qSupported:xmlRegisters=i386";
        let frame = encode_frame(payload);
        match decode_one(&frame).unwrap() {
            DecodeOutcome::Frame {
                packet,
                consumed,
                checksum_ok,
            } => {
                assert!(checksum_ok);
                assert_eq!(consumed, frame.len());
                assert_eq!(packet, Packet::Normal(payload.to_vec()));
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn checksum_law_round_trips_payload_with_special_bytes() {
        // payload containing '#', '$', '}', '*' must survive escape+encode+decode.
        let raw: &[u8] = &[b'#', b'$', ESCAPE, RLE_MARK, b'z'];
        let escaped = escape_binary(raw);
        let frame = encode_frame(&escaped);
        match decode_one(&frame).unwrap() {
            DecodeOutcome::Frame {
                packet,
                checksum_ok,
                ..
            } => {
                assert!(checksum_ok);
                assert_eq!(packet, Packet::Normal(raw.to_vec()));
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn mismatched_checksum_is_detected() {
        let mut frame = encode_frame(b"OK");
        let last = frame.len() - 1;
        frame[last] = if frame[last] == b'0' { b'1' } else { b'0' };
        match decode_one(&frame).unwrap() {
            DecodeOutcome::Frame { checksum_ok, .. } => assert!(!checksum_ok),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn binary_read_escape_round_trips() {
        let raw: &[u8] = &[0x7d, 0x23, 0x24, 0x2a, 0x5d, 0x10];
        let escaped = escape_binary(raw);
        // 0x7d and 0x23 ('#') get escaped; 0x24 ('$') and 0x2a ('*') too.
        assert!(escaped.windows(2).any(|w| w == [ESCAPE, 0x7d ^ ESCAPE_XOR]));
        let unescaped = unescape_and_expand(&escaped).unwrap();
        assert_eq!(unescaped, raw);
    }

    #[test]
    fn rle_expands() {
        // 'a' followed by *,'-' (45 = 29 + 16) means 16 more 'a's.
        let payload = b"a*-";
        let expanded = unescape_and_expand(payload).unwrap();
        assert_eq!(expanded.len(), 1 + (b'-' - 29) as usize);
        assert!(expanded.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn ack_and_nak_bytes_are_recognized() {
        match decode_one(b"+").unwrap() {
            DecodeOutcome::AckByte { ack, consumed } => {
                assert!(ack);
                assert_eq!(consumed, 1);
            }
            _ => panic!("expected ack"),
        }
        match decode_one(b"-").unwrap() {
            DecodeOutcome::AckByte { ack, consumed } => {
                assert!(!ack);
                assert_eq!(consumed, 1);
            }
            _ => panic!("expected nak"),
        }
    }

    #[test]
    fn notification_is_distinguished_from_response() {
        let frame = encode_frame(b"Stop:T0505:;");
        let mut notif = frame.clone();
        notif[0] = NOTIFICATION_START;
        // checksum covers payload only, still valid since payload unchanged.
        match decode_one(&notif).unwrap() {
            DecodeOutcome::Frame { packet, .. } => {
                assert!(matches!(packet, Packet::Notification(_)));
            }
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn error_reply_carries_code() {
        let frame = encode_frame(b"E01");
        match decode_one(&frame).unwrap() {
            DecodeOutcome::Frame { packet, .. } => assert_eq!(packet, Packet::Error(1)),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn empty_payload_is_unsupported() {
        let frame = encode_frame(b"");
        match decode_one(&frame).unwrap() {
            DecodeOutcome::Frame { packet, .. } => assert_eq!(packet, Packet::Unsupported),
            _ => panic!("expected a frame"),
        }
    }

    #[test]
    fn incomplete_frame_asks_for_more_bytes() {
        let frame = encode_frame(b"OK");
        let partial = &frame[..frame.len() - 1];
        assert!(matches!(
            decode_one(partial).unwrap(),
            DecodeOutcome::NeedMoreBytes
        ));
    }
}
