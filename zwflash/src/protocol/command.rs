//! SerialAPI function ids and firmware-update sub-commands.

use std::fmt;

/// SerialAPI function ids used by zwflash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionId {
    /// Node list and controller role (0x02).
    GetInitData = 0x02,
    /// SerialAPI version, manufacturer and supported functions (0x07).
    GetCapabilities = 0x07,
    /// Restart the controller; no response (0x08).
    SoftReset = 0x08,
    /// Turn the radio receiver on or off (0x10).
    SetRfReceiveMode = 0x10,
    /// Transmit a Z-Wave frame to a node (0x13).
    SendData = 0x13,
    /// Protocol version string and library type (0x15).
    GetVersion = 0x15,
    /// External NVM firmware update family (0x78).
    FirmwareUpdateNvm = 0x78,
}

impl FunctionId {
    /// Wire value.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetInitData => "SERIAL_API_GET_INIT_DATA",
            Self::GetCapabilities => "SERIAL_API_GET_CAPABILITIES",
            Self::SoftReset => "SERIAL_API_SOFT_RESET",
            Self::SetRfReceiveMode => "ZW_SET_RF_RECEIVE_MODE",
            Self::SendData => "ZW_SEND_DATA",
            Self::GetVersion => "ZW_GET_VERSION",
            Self::FirmwareUpdateNvm => "FIRMWARE_UPDATE_NVM",
        };
        write!(f, "{name} (0x{:02X})", self.id())
    }
}

/// Sub-commands of [`FunctionId::FirmwareUpdateNvm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NvmCommand {
    /// Query OTW support and prepare the external NVM.
    Init = 0x00,
    /// Mark (or unmark) the written image for installation on next boot.
    SetNewImage = 0x01,
    /// Read the new-image flag.
    GetNewImage = 0x02,
    /// CRC16 over a range of the external NVM.
    UpdateCrc16 = 0x03,
    /// Validate the CRC16 of the whole written image.
    IsValidCrc16 = 0x04,
    /// Write one block to the external NVM.
    Write = 0x05,
}

impl NvmCommand {
    /// Wire value.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for NvmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::SetNewImage => "SET_NEW_IMAGE",
            Self::GetNewImage => "GET_NEW_IMAGE",
            Self::UpdateCrc16 => "UPDATE_CRC16",
            Self::IsValidCrc16 => "IS_VALID_CRC16",
            Self::Write => "WRITE",
        };
        write!(f, "{name} (0x{:02X})", self.id())
    }
}

/// Transmit option: request a routed acknowledgment.
pub const TRANSMIT_OPTION_ACK: u8 = 0x01;

/// Transmit option: let the protocol pick a route.
pub const TRANSMIT_OPTION_AUTO_ROUTE: u8 = 0x04;

/// Association command class.
pub const COMMAND_CLASS_ASSOCIATION: u8 = 0x85;

/// Association Remove command.
pub const ASSOCIATION_REMOVE: u8 = 0x04;

/// Lifeline association group.
pub const LIFELINE_GROUP: u8 = 0x01;
