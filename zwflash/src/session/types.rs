//! Typed SerialAPI responses.
//!
//! Every parser takes the full response payload, function id echo included,
//! and reads multi-byte fields big-endian.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::protocol::command::FunctionId;

/// WRITE status: block stored.
pub const WRITE_STATUS_WRITTEN: u8 = 0x01;

/// WRITE status: block already held the same data.
pub const WRITE_STATUS_UNCHANGED: u8 = 0x00;

/// IS_VALID_CRC16 status for a valid image. Any other value is a failure.
pub const CRC_STATUS_VALID: u8 = 0x00;

/// NVM INIT status of a controller that supports OTW updates.
pub const NVM_OTW_SUPPORTED: u8 = 0x01;

/// Length of the NUL-padded version string in a GET_VERSION response.
const VERSION_STRING_LEN: usize = 12;

/// Z-Wave protocol version to SDK release.
const SDK_RELEASES: &[(&str, &str)] = &[
    ("6.01", "SDK 6.81.00 09/2017"),
    ("5.03", "SDK 6.71.03"),
    ("5.02", "SDK 6.71.02 07/2017"),
    ("4.62", "SDK 6.61.01 04/2017"),
    ("4.61", "SDK 6.71.01 03/2017"),
    ("4.60", "SDK 6.71.00 01/2017"),
    ("4.54", "SDK 6.51.10 02/2017"),
    ("4.38", "SDK 6.51.09 07/2016"),
    ("4.34", "SDK 6.51.08 05/2016"),
    ("4.33", "SDK 6.61.00 04/2016"),
    ("4.24", "SDK 6.51.07 02/2016"),
    ("4.05", "SDK 6.51.06 06/2015 or SDK 6.51.05 12/2014"),
    ("4.01", "SDK 6.51.04 05/2014"),
    ("3.99", "SDK 6.51.03 07/2014"),
    ("3.95", "SDK 6.51.02 05/2014"),
    ("3.92", "SDK 6.51.01 04/2014"),
    ("3.83", "SDK 6.51.00 12/2013"),
    ("3.79", "SDK 6.50.01"),
    ("3.71", "SDK 6.50.00"),
    ("3.41", "SDK 6.02.00"),
    ("3.37", "SDK 6.01.03"),
    ("3.35", "SDK 6.10.00"),
];

/// Look up the SDK release that shipped a protocol version such as `"4.54"`.
#[must_use]
pub fn sdk_release(protocol_version: &str) -> Option<&'static str> {
    SDK_RELEASES
        .iter()
        .find(|(version, _)| *version == protocol_version)
        .map(|(_, release)| *release)
}

/// Decode a node bitmap: bit `i` of byte `k` set means node `8k + i + 1`.
///
/// Node ids that would not fit in a byte are ignored.
#[must_use]
pub fn decode_node_bitmap(bitmap: &[u8]) -> BTreeSet<u8> {
    let mut nodes = BTreeSet::new();
    for (k, byte) in bitmap
        .iter()
        .enumerate()
    {
        for i in 0..8 {
            if byte & (1 << i) != 0 {
                if let Ok(node) = u8::try_from(k * 8 + i + 1) {
                    nodes.insert(node);
                }
            }
        }
    }
    nodes
}

fn check_len(function: FunctionId, payload: &[u8], min: usize) -> Result<()> {
    if payload.len() < min {
        return Err(Error::UnexpectedResponse {
            expected: format!("{function} with at least {min} bytes"),
            received: payload.to_vec(),
        });
    }
    Ok(())
}

/// Z-Wave library flavour reported by GET_VERSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LibraryType {
    /// Static controller.
    StaticController,
    /// Portable controller.
    Controller,
    /// Enhanced slave.
    SlaveEnhanced,
    /// Slave.
    Slave,
    /// Installer.
    Installer,
    /// Routing slave.
    SlaveRouting,
    /// Bridge controller.
    BridgeController,
    /// Device under test.
    Dut,
    /// AV remote.
    AvRemote,
    /// AV device.
    AvDevice,
    /// Unlisted library code.
    Unknown(u8),
}

impl From<u8> for LibraryType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::StaticController,
            0x02 => Self::Controller,
            0x03 => Self::SlaveEnhanced,
            0x04 => Self::Slave,
            0x05 => Self::Installer,
            0x06 => Self::SlaveRouting,
            0x07 => Self::BridgeController,
            0x08 => Self::Dut,
            0x0A => Self::AvRemote,
            0x0B => Self::AvDevice,
            other => Self::Unknown(other),
        }
    }
}

impl LibraryType {
    /// Wire value.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::StaticController => 0x01,
            Self::Controller => 0x02,
            Self::SlaveEnhanced => 0x03,
            Self::Slave => 0x04,
            Self::Installer => 0x05,
            Self::SlaveRouting => 0x06,
            Self::BridgeController => 0x07,
            Self::Dut => 0x08,
            Self::AvRemote => 0x0A,
            Self::AvDevice => 0x0B,
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StaticController => "Static Controller",
            Self::Controller => "Controller",
            Self::SlaveEnhanced => "Slave Enhanced",
            Self::Slave => "Slave",
            Self::Installer => "Installer",
            Self::SlaveRouting => "Slave Routing",
            Self::BridgeController => "Bridge Controller",
            Self::Dut => "DUT",
            Self::AvRemote => "AV Remote",
            Self::AvDevice => "AV Device",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// GET_CAPABILITIES response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Capabilities {
    /// SerialAPI application version.
    pub api_version: u8,
    /// SerialAPI application revision.
    pub api_revision: u8,
    /// Manufacturer id.
    pub manufacturer_id: u16,
    /// Manufacturer product type.
    pub product_type: u16,
    /// Manufacturer product id.
    pub product_id: u16,
    /// Supported function ids, one bit per id starting at id 1.
    pub function_bitmask: Vec<u8>,
}

impl Capabilities {
    /// Parse `[0x07, ver, rev, manufacturer u16, type u16, id u16, bitmask...]`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        check_len(FunctionId::GetCapabilities, payload, 9)?;

        let mut rdr = Cursor::new(&payload[1..]);
        let api_version = rdr.read_u8()?;
        let api_revision = rdr.read_u8()?;
        let manufacturer_id = rdr.read_u16::<BigEndian>()?;
        let product_type = rdr.read_u16::<BigEndian>()?;
        let product_id = rdr.read_u16::<BigEndian>()?;

        Ok(Self {
            api_version,
            api_revision,
            manufacturer_id,
            product_type,
            product_id,
            function_bitmask: payload[9..].to_vec(),
        })
    }

    /// Whether the controller reported a supported-function list at all.
    #[must_use]
    pub fn has_function_list(&self) -> bool {
        self.function_bitmask
            .iter()
            .any(|b| *b != 0)
    }

    /// Whether the supported-function bitmask includes `function`.
    #[must_use]
    pub fn supports(&self, function: FunctionId) -> bool {
        let bit = usize::from(function.id()) - 1;
        self.function_bitmask
            .get(bit / 8)
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }
}

/// GET_VERSION response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VersionInfo {
    /// Version string, e.g. `"Z-Wave 4.54"`.
    pub version: String,
    /// Library flavour.
    pub library: LibraryType,
}

impl VersionInfo {
    /// Parse `[0x15, 12-byte NUL-padded string, library]`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        check_len(FunctionId::GetVersion, payload, VERSION_STRING_LEN + 2)?;

        let raw = &payload[1..=VERSION_STRING_LEN];
        let end = raw
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(raw.len());
        let version = String::from_utf8_lossy(&raw[..end])
            .trim()
            .to_string();

        Ok(Self {
            version,
            library: LibraryType::from(payload[VERSION_STRING_LEN + 1]),
        })
    }

    /// Protocol version number without the `"Z-Wave "` prefix, e.g. `"4.54"`.
    #[must_use]
    pub fn protocol_version_str(&self) -> &str {
        self.version
            .rsplit(' ')
            .next()
            .unwrap_or(&self.version)
    }

    /// Protocol `(major, minor)`.
    #[must_use]
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        let (major, minor) = self
            .protocol_version_str()
            .split_once('.')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    /// SDK release that shipped this protocol version, if known.
    #[must_use]
    pub fn sdk_release(&self) -> Option<&'static str> {
        sdk_release(self.protocol_version_str())
    }

    /// Whether the protocol belongs to the 700-series family or later.
    ///
    /// Decided on the protocol major version (7 and up) rather than on the
    /// library type byte: both series report the same library type codes,
    /// so the library type alone cannot tell them apart.
    #[must_use]
    pub fn is_700_series(&self) -> bool {
        self.protocol_version()
            .is_some_and(|(major, _)| major >= 7)
    }
}

/// GET_INIT_DATA response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InitData {
    /// SerialAPI version.
    pub api_version: u8,
    /// Controller capability flags.
    pub capabilities: u8,
    /// Node ids present in the network.
    pub node_ids: BTreeSet<u8>,
    /// Chip type, if reported.
    pub chip_type: Option<u8>,
    /// Chip version, if reported.
    pub chip_version: Option<u8>,
}

impl InitData {
    /// Parse `[0x02, ver, caps, n, bitmap[n], chip type, chip version]`.
    ///
    /// A bitmap shorter than announced is decoded as far as it goes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        check_len(FunctionId::GetInitData, payload, 4)?;

        let announced = usize::from(payload[3]);
        let bitmap_end = (4 + announced).min(payload.len());
        let tail = &payload[bitmap_end..];

        Ok(Self {
            api_version: payload[1],
            capabilities: payload[2],
            node_ids: decode_node_bitmap(&payload[4..bitmap_end]),
            chip_type: tail
                .first()
                .copied(),
            chip_version: tail
                .get(1)
                .copied(),
        })
    }
}

/// Outcome of one NVM WRITE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Block stored.
    Written,
    /// The NVM already held this block.
    Unchanged,
    /// Any other status byte.
    Rejected(u8),
}

impl From<u8> for WriteStatus {
    fn from(status: u8) -> Self {
        match status {
            WRITE_STATUS_WRITTEN => Self::Written,
            WRITE_STATUS_UNCHANGED => Self::Unchanged,
            other => Self::Rejected(other),
        }
    }
}

/// IS_VALID_CRC16 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CrcCheck {
    /// Status byte.
    pub status: u8,
    /// CRC16 computed by the controller.
    pub crc: u16,
}

impl CrcCheck {
    /// Whether the controller accepted the image.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == CRC_STATUS_VALID
    }
}

/// Snapshot of a controller, taken fresh on every probe.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// GET_CAPABILITIES answer.
    pub capabilities: Capabilities,
    /// GET_VERSION answer.
    pub version: VersionInfo,
    /// Node ids, empty if GET_INIT_DATA failed.
    pub node_ids: BTreeSet<u8>,
    /// NVM INIT reported OTW support.
    pub otw_capable: bool,
}

impl DeviceInfo {
    /// Reason the controller cannot take an OTW update, if any.
    #[must_use]
    pub fn not_updatable_reason(&self) -> Option<String> {
        if self
            .version
            .is_700_series()
        {
            return Some(format!(
                "{} belongs to the 700-series family, use its bootloader instead",
                self.version
                    .version
            ));
        }
        if !self.otw_capable {
            return Some("firmware does not support OTW updates".into());
        }
        None
    }
}
