//! SerialAPI frame codec.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+-----+------+------------------------+----------+
//! | SOF | LEN | TYPE |  FUNC ID + PAYLOAD     | CHECKSUM |
//! +-----+-----+------+------------------------+----------+
//! | 1   | 1   | 1    |  LEN - 2               | 1        |
//! +-----+-----+------+------------------------+----------+
//! ```
//!
//! `LEN` counts TYPE, the command bytes and the checksum. The checksum is
//! `0xFF` XORed with every byte from `LEN` through the last payload byte, so a
//! well-formed frame XORs to zero over `LEN..=CHECKSUM` when seeded with `0xFF`.
//!
//! ACK, NAK and CAN are single bytes sent outside of any frame.

use crate::error::{Error, Result};

/// Start of frame.
pub const SOF: u8 = 0x01;

/// Frame accepted.
pub const ACK: u8 = 0x06;

/// Frame rejected (bad checksum or timeout on the receiving side).
pub const NAK: u8 = 0x15;

/// Frame dropped because the receiver was busy transmitting.
pub const CAN: u8 = 0x18;

/// Largest command (function id + payload) that fits the one-byte length field.
pub const MAX_COMMAND_LEN: usize = 253;

/// Seed of the running XOR checksum.
const CHECKSUM_SEED: u8 = 0xFF;

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Host command, or unsolicited callback from the controller.
    Request = 0x00,
    /// Answer to a request.
    Response = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Request),
            0x01 => Ok(Self::Response),
            other => Err(Error::ProtocolViolation(format!(
                "unknown frame type 0x{other:02X}"
            ))),
        }
    }
}

/// A decoded frame with type and checksum stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request or response.
    pub frame_type: FrameType,
    /// Function id followed by its payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Function id carried by the frame, if any.
    pub fn function(&self) -> Option<u8> {
        self.payload
            .first()
            .copied()
    }
}

/// Running XOR over `bytes`, seeded with `0xFF`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(CHECKSUM_SEED, |acc, b| acc ^ b)
}

/// XOR residue of a received frame: zero iff the trailing checksum matches.
///
/// `body` is everything after the length byte, checksum included.
pub fn residue(len: u8, body: &[u8]) -> u8 {
    checksum(body) ^ len
}

/// Encode a command as an outgoing REQUEST frame.
pub fn encode(command: &[u8]) -> Result<Vec<u8>> {
    if command.is_empty() {
        return Err(Error::ProtocolViolation("empty command".into()));
    }
    if command.len() > MAX_COMMAND_LEN {
        return Err(Error::ProtocolViolation(format!(
            "command of {} bytes exceeds the {MAX_COMMAND_LEN}-byte frame limit",
            command.len()
        )));
    }

    // Bounded by MAX_COMMAND_LEN above
    #[allow(clippy::cast_possible_truncation)]
    let len = (command.len() + 2) as u8;

    let mut frame = Vec::with_capacity(command.len() + 4);
    frame.push(SOF);
    frame.push(len);
    frame.push(FrameType::Request as u8);
    frame.extend_from_slice(command);
    let cs = checksum(&frame[1..]);
    frame.push(cs);

    Ok(frame)
}

/// Decode a received frame body.
///
/// The caller has already consumed `SOF` and `len`, and read exactly `len`
/// bytes into `body`.
pub fn decode(len: u8, body: &[u8]) -> Result<Frame> {
    if body.len() != usize::from(len) || body.len() < 2 {
        return Err(Error::ProtocolViolation(format!(
            "frame body of {} bytes does not match length byte {len}",
            body.len()
        )));
    }

    let residue = residue(len, body);
    if residue != 0 {
        return Err(Error::ChecksumMismatch { residue });
    }

    let frame_type = FrameType::try_from(body[0])?;
    Ok(Frame {
        frame_type,
        payload: body[1..body.len() - 1].to_vec(),
    })
}
