//! Framing: type (1) + sequence (2, LE) + checksum (2, LE) + payload.
//! The checksum covers the whole frame with its own field zeroed.

use crate::address::MacAddr;

/// Fixed header: type + sequence + checksum.
pub const HEADER_LEN: usize = 5;

/// Largest frame the radio will accept in one transmission.
pub const MAX_FRAME_LEN: usize = 250;

const KIND_OFFSET: usize = 0;
const SEQ_OFFSET: usize = 1;
const CRC_OFFSET: usize = 3;

/// Frame type. The discriminant is the on-wire type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Broadcast = 0,
    Unicast = 1,
}

impl FrameKind {
    /// Broadcast for the all-ones address, unicast for everything else.
    pub fn for_destination(dest: &MacAddr) -> Self {
        if dest.is_broadcast() {
            FrameKind::Broadcast
        } else {
            FrameKind::Unicast
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Broadcast),
            1 => Some(FrameKind::Unicast),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Independent sequence counters, one per frame kind. Start at 0 and wrap at 65536.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounters {
    next: [u16; 2],
}

impl SequenceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next frame of `kind` will carry.
    pub fn peek(&self, kind: FrameKind) -> u16 {
        self.next[kind.index()]
    }

    fn advance(&mut self, kind: FrameKind) -> u16 {
        let slot = &mut self.next[kind.index()];
        let seq = *slot;
        *slot = slot.wrapping_add(1);
        seq
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

/// Append one frame to `out`: header, payload, then the checksum patched in.
/// Consumes a sequence number from the counter for `kind`.
pub fn encode_frame(
    kind: FrameKind,
    counters: &mut SequenceCounters,
    payload: &[u8],
    out: &mut Vec<u8>,
) {
    let start = out.len();
    let seq = counters.advance(kind);
    out.push(kind as u8);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);
    let crc = checksum(&out[start..]);
    out[start + CRC_OFFSET..start + CRC_OFFSET + 2].copy_from_slice(&crc.to_le_bytes());
}

/// Decode one complete frame. The type byte is only trusted once the checksum matches.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameDecodeError::TooShort { len: bytes.len() });
    }
    let sequence = u16::from_le_bytes([bytes[SEQ_OFFSET], bytes[SEQ_OFFSET + 1]]);
    let stored = u16::from_le_bytes([bytes[CRC_OFFSET], bytes[CRC_OFFSET + 1]]);
    let computed = checksum(bytes);
    if stored != computed {
        return Err(FrameDecodeError::ChecksumMismatch { stored, computed });
    }
    let kind = FrameKind::from_byte(bytes[KIND_OFFSET])
        .ok_or(FrameDecodeError::UnknownKind(bytes[KIND_OFFSET]))?;
    Ok(Frame {
        kind,
        sequence,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

/// Error decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too short: {len} bytes, header is {HEADER_LEN}")]
    TooShort { len: usize },
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },
    #[error("unknown frame type {0}")]
    UnknownKind(u8),
}

/// Frame checksum with the checksum field read as zero. `frame` must be at least HEADER_LEN long.
pub fn checksum(frame: &[u8]) -> u16 {
    let crc = crc16_update(0, &frame[..CRC_OFFSET]);
    let crc = crc16_update(crc, &[0, 0]);
    !crc16_update(crc, &frame[HEADER_LEN..])
}

/// CRC-16/CCITT, reflected (poly 0x8408), no output inversion. Matches the radio SDK's
/// little-endian CRC when seeded with 0xFFFF, which it inverts on entry and exit.
fn crc16_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc ^= u16::from(b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    crc
}
