//! Error types for zwflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for zwflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for zwflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial channel could not be opened.
    #[error("Cannot open serial port {port}: {reason}")]
    ChannelUnavailable {
        /// Port name/path.
        port: String,
        /// Reason reported by the platform.
        reason: String,
    },

    /// Malformed outgoing command or inbound frame structure.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Inbound frame failed the XOR checksum.
    #[error("Checksum mismatch on received frame (residue {residue:#04x})")]
    ChecksumMismatch {
        /// Non-zero XOR residue over the frame.
        residue: u8,
    },

    /// The device never acknowledged a request frame.
    #[error("Link timeout: request not acknowledged after {attempts} attempts")]
    LinkTimeout {
        /// Number of transmissions made.
        attempts: u32,
    },

    /// No response frame arrived in time.
    #[error("No response frame within {0:?}")]
    ResponseTimeout(Duration),

    /// The response did not echo the command that was sent.
    #[error("Unexpected response: expected {expected}, got {received:02X?}")]
    UnexpectedResponse {
        /// Expected echo (function id and sub-command).
        expected: String,
        /// Received response payload.
        received: Vec<u8>,
    },

    /// The device refused a firmware block.
    #[error("Block write at offset {offset:#07x} rejected with status {status:#04x}")]
    WriteRejected {
        /// Image offset of the rejected block.
        offset: u32,
        /// Status byte returned by the device.
        status: u8,
    },

    /// The device cannot be updated over the wire.
    #[error("Device is not OTW updatable: {0}")]
    NotUpdatable(String),

    /// The written image failed the device-side CRC check.
    #[error("CRC validation failed: status {status:#04x}, CRC {crc:#06x}")]
    CrcValidationFailed {
        /// Status byte returned by the device.
        status: u8,
        /// CRC16 computed by the device.
        crc: u16,
    },

    /// A radio transmission was refused or did not complete.
    #[error("Transmission to node {node} failed: {reason}")]
    TransmitFailed {
        /// Destination node id.
        node: u8,
        /// Refusal or transmit-complete status.
        reason: String,
    },

    /// Invalid firmware image.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),
}
