//! Port abstraction for the SerialAPI byte channel.
//!
//! The protocol layers never touch a serial device directly. They talk to a
//! [`Port`], which only has to provide blocking reads and writes plus a
//! non-blocking count of pending input bytes:
//!
//! ```text
//! +------------------+
//! |  Session / Link  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port Trait    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! Tests substitute in-memory ports that simulate a controller.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zwflash::port::Port;
//!
//! fn drain<P: Port>(port: &mut P) -> zwflash::Result<Vec<u8>> {
//!     let mut pending = vec![0u8; port.bytes_to_read()? as usize];
//!     std::io::Read::read_exact(port, &mut pending)?;
//!     Ok(pending)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate of the Z-Wave SerialAPI.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// The SerialAPI always runs 8N1 without flow control, so only the port,
/// speed and driver-level timeout are configurable.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Driver read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(2000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte channel to the Z-Wave controller.
pub trait Port: Read + Write + Send {
    /// Number of received bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
