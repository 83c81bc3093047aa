//! # zwflash
//!
//! Over-the-wire (OTW) firmware updates for Z-Wave 500 series controllers.
//!
//! This crate talks to the controller through its UART SerialAPI and
//! replaces the firmware held in the external NVM:
//!
//! - SerialAPI frame codec with XOR checksum
//! - Link layer with ACK/NAK/CAN handshake and bounded retransmission
//! - Typed SerialAPI commands (capabilities, version, node list, NVM update)
//! - Update state machine: probe, transfer, validate, commit, reboot, verify
//! - Intel HEX firmware images
//!
//! ## Supported Devices
//!
//! - 500 series controllers running a SerialAPI with `FIRMWARE_UPDATE_NVM`
//! - 700 series and later are detected and refused; they use a bootloader
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for device information
//!
//! ## Example
//!
//! ```rust,no_run
//! use zwflash::{FirmwareImage, SerialConfig, SessionConfig, UpdateConfig, UpdateOutcome, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_hex_file("controller.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let serial = SerialConfig::new("/dev/ttyACM0", 115_200);
//!         let mut updater =
//!             Updater::open(&serial, SessionConfig::default(), UpdateConfig::default())?;
//!
//!         let outcome = updater.run(Some(&image), |phase, done, total| {
//!             println!("{phase}: {done}/{total}");
//!         })?;
//!
//!         if let UpdateOutcome::Updated(report) = outcome {
//!             println!("Now running {}", report.after.version.version);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod update;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::{FirmwareImage, ImageSource},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Frame, FrameType, FunctionId, Link, LinkConfig, NvmCommand},
    session::{
        Capabilities, CrcCheck, DeviceInfo, InitData, LibraryType, Session, SessionConfig,
        VersionInfo, WriteStatus,
    },
    update::{Phase, UpdateConfig, UpdateOutcome, UpdateReport, Updater},
};
