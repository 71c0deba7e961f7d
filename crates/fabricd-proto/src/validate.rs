use bytes::Bytes;

use crate::error::Violation;
use crate::packet::{
    Operation, Packet, CORE_MASK, CORE_SENTINEL, HEADER_SIZE, MAX_PAYLOAD, NUM_CORES, OP_AUTOINC,
    OP_AUTOPUSH, OP_READ, OP_SENTINEL, OP_WRITE, SENTINEL_MASK,
};

/// Decide whether one deframed buffer is a well-formed inbound packet.
///
/// Checks run in order and short-circuit on the first failure: minimum
/// length, operation sentinel and bits, core sentinel and range, then count
/// consistency. Inbound `Read` frames are read *responses*: the count field
/// holds the requested byte count, the payload holds what was returned, and
/// the trailing remainder byte must equal `requested - returned` or the
/// frame is rejected as truncated/corrupted.
///
/// A violation is reported for logging; it never tears down the link.
pub fn validate(frame: &[u8]) -> Result<Packet, Violation> {
    if frame.len() < HEADER_SIZE {
        return Err(Violation::TooShort { len: frame.len() });
    }

    let op_byte = frame[0];
    if op_byte & SENTINEL_MASK != OP_SENTINEL {
        return Err(Violation::BadOpSentinel { byte: op_byte });
    }
    let bits = op_byte & !SENTINEL_MASK;
    let op = match (bits & OP_READ != 0, bits & OP_WRITE != 0) {
        (true, false) => Operation::Read,
        (false, true) => Operation::Write,
        // All-zero operation bits, or read and write at once.
        _ => return Err(Violation::UnknownOperation { bits }),
    };

    let core_byte = frame[1];
    if core_byte & SENTINEL_MASK != CORE_SENTINEL {
        return Err(Violation::BadCoreSentinel { byte: core_byte });
    }
    let core = core_byte & CORE_MASK;
    if core as usize >= NUM_CORES {
        return Err(Violation::CoreOutOfRange { core });
    }

    let register = frame[2];
    let count = frame[3];
    if count as usize > MAX_PAYLOAD {
        return Err(Violation::CountTooLarge { count });
    }

    let (payload, remaining) = match op {
        Operation::Read => {
            // Header + at least the trailing remainder byte.
            if frame.len() < HEADER_SIZE + 1 {
                return Err(Violation::TooShort { len: frame.len() });
            }
            let returned = frame.len() - HEADER_SIZE - 1;
            if returned > count as usize {
                return Err(Violation::LengthMismatch {
                    declared: count,
                    actual: returned,
                });
            }
            let expected = count - returned as u8;
            let actual = frame[frame.len() - 1];
            if actual != expected {
                return Err(Violation::CountMismatch { expected, actual });
            }
            (
                Bytes::copy_from_slice(&frame[HEADER_SIZE..HEADER_SIZE + returned]),
                Some(actual),
            )
        }
        Operation::Write => {
            let actual = frame.len() - HEADER_SIZE;
            if actual != count as usize {
                return Err(Violation::LengthMismatch {
                    declared: count,
                    actual,
                });
            }
            (Bytes::copy_from_slice(&frame[HEADER_SIZE..]), None)
        }
    };

    Ok(Packet {
        op,
        auto_inc: bits & OP_AUTOINC != 0,
        auto_push: bits & OP_AUTOPUSH != 0,
        core,
        register,
        count,
        payload,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a read-response frame: header, returned payload, remainder.
    fn read_response(core: u8, register: u8, requested: u8, returned: &[u8], rem: u8) -> Vec<u8> {
        let mut frame = vec![0xA0 | 0x02, 0xE0 | core, register, requested];
        frame.extend_from_slice(returned);
        frame.push(rem);
        frame
    }

    #[test]
    fn accepts_full_read_response() {
        let frame = read_response(2, 0x08, 4, &[1, 2, 3, 4], 0);
        let pkt = validate(&frame).unwrap();
        assert_eq!(pkt.op, Operation::Read);
        assert_eq!(pkt.core, 2);
        assert_eq!(pkt.register, 0x08);
        assert_eq!(pkt.count, 4);
        assert_eq!(pkt.payload.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(pkt.remaining, Some(0));
    }

    #[test]
    fn accepts_partial_read_response() {
        let frame = read_response(1, 0, 10, &[9, 9], 8);
        let pkt = validate(&frame).unwrap();
        assert_eq!(pkt.returned(), 2);
        assert_eq!(pkt.remaining, Some(8));
    }

    #[test]
    fn rejects_read_count_mismatch() {
        // remainder says 3 but requested - returned = 8 - 2 = 6
        let frame = read_response(1, 0, 8, &[9, 9], 3);
        assert_eq!(
            validate(&frame),
            Err(Violation::CountMismatch {
                expected: 6,
                actual: 3
            })
        );
    }

    #[test]
    fn accepts_write_frame() {
        let frame = [0xA1, 0xE4, 0x20, 0x02, 0xAA, 0xBB];
        let pkt = validate(&frame).unwrap();
        assert_eq!(pkt.op, Operation::Write);
        assert_eq!(pkt.core, 4);
        assert_eq!(pkt.payload.as_ref(), &[0xAA, 0xBB]);
        assert_eq!(pkt.remaining, None);
    }

    #[test]
    fn rejects_short_frame() {
        assert_eq!(validate(&[0xA1, 0xE0]), Err(Violation::TooShort { len: 2 }));
    }

    #[test]
    fn rejects_bad_op_sentinel() {
        let frame = [0x51, 0xE0, 0, 0];
        assert_eq!(
            validate(&frame),
            Err(Violation::BadOpSentinel { byte: 0x51 })
        );
    }

    #[test]
    fn rejects_all_zero_operation_bits() {
        let frame = [0xA0, 0xE0, 0, 0];
        assert_eq!(
            validate(&frame),
            Err(Violation::UnknownOperation { bits: 0 })
        );
    }

    #[test]
    fn rejects_read_and_write_together() {
        let frame = [0xA3, 0xE0, 0, 0];
        assert!(matches!(
            validate(&frame),
            Err(Violation::UnknownOperation { .. })
        ));
    }

    #[test]
    fn rejects_bad_core_sentinel() {
        let frame = [0xA1, 0x03, 0, 0];
        assert_eq!(
            validate(&frame),
            Err(Violation::BadCoreSentinel { byte: 0x03 })
        );
    }

    #[test]
    fn rejects_oversized_count() {
        let frame = [0xA2, 0xE0, 0, 0xFF, 0];
        assert_eq!(
            validate(&frame),
            Err(Violation::CountTooLarge { count: 0xFF })
        );
    }

    #[test]
    fn rejects_write_length_mismatch() {
        let frame = [0xA1, 0xE0, 0, 5, 1, 2];
        assert_eq!(
            validate(&frame),
            Err(Violation::LengthMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn decodes_push_and_autoinc_flags() {
        // Hardware-initiated update: read response with push + auto-inc.
        let mut frame = vec![0xA0 | 0x02 | 0x04 | 0x08, 0xE7, 0x00, 1, 0x33];
        frame.push(0);
        let pkt = validate(&frame).unwrap();
        assert!(pkt.auto_inc);
        assert!(pkt.auto_push);
        assert_eq!(pkt.core, 7);
    }

    #[test]
    fn roundtrips_outbound_write_through_validate() {
        let mut wire = bytes::BytesMut::new();
        let sent = Packet::write(6, 0x11, vec![4, 5, 6]);
        sent.to_wire(&mut wire);
        let got = validate(&wire).unwrap();
        assert_eq!(got, sent);
    }
}
