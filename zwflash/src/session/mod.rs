//! Device session: typed SerialAPI commands over a [`Link`].
//!
//! A session issues one request at a time and waits for its answer before
//! the next one goes out. Responses are matched on the echoed function id
//! (and sub-command for the firmware update family). Unsolicited REQUEST
//! frames that arrive while a response is pending are logged and dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use zwflash::port::{NativePort, SerialConfig};
//! use zwflash::session::{Session, SessionConfig};
//!
//! let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 115_200))?;
//! let mut session = Session::new(port, SessionConfig::default());
//! let info = session.device_info()?;
//! println!("{} ({})", info.version.version, info.version.library);
//! # Ok::<(), zwflash::Error>(())
//! ```

mod types;

pub use types::{
    CRC_STATUS_VALID, Capabilities, CrcCheck, DeviceInfo, InitData, LibraryType,
    NVM_OTW_SUPPORTED, VersionInfo, WriteStatus, decode_node_bitmap, sdk_release,
};

use std::time::{Duration, Instant};

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::{
    ASSOCIATION_REMOVE, COMMAND_CLASS_ASSOCIATION, FunctionId, LIFELINE_GROUP, NvmCommand,
    TRANSMIT_OPTION_ACK, TRANSMIT_OPTION_AUTO_ROUTE,
};
use crate::protocol::frame::FrameType;
use crate::protocol::link::{Link, LinkConfig};

/// Node id of the controller that owns the lifeline.
const CONTROLLER_NODE_ID: u8 = 0x01;

/// Callback id tagged onto SEND_DATA requests.
const SEND_DATA_CALLBACK_ID: u8 = 0x4E;

/// Highest NVM offset a WRITE can address (24-bit field).
const MAX_NVM_OFFSET: u32 = 0x00FF_FFFF;

/// Session timing parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Link layer parameters.
    pub link: LinkConfig,
    /// Response timeout for slow firmware commands (CRC over the whole NVM).
    pub long_timeout: Duration,
    /// Wait for the transmit-complete callback of a SEND_DATA.
    pub callback_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            long_timeout: Duration::from_millis(10_000),
            callback_timeout: Duration::from_millis(10_000),
        }
    }
}

impl SessionConfig {
    /// Set the link parameters.
    #[must_use]
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set the long response timeout.
    #[must_use]
    pub fn with_long_timeout(mut self, timeout: Duration) -> Self {
        self.long_timeout = timeout;
        self
    }

    /// Set the callback timeout.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }
}

/// Synchronous SerialAPI session with one controller.
pub struct Session<P: Port> {
    link: Link<P>,
    config: SessionConfig,
}

impl<P: Port> Session<P> {
    /// Create a session over an opened port.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self {
            link: Link::new(
                port,
                config
                    .link
                    .clone(),
            ),
            config,
        }
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the link.
    pub fn link(&self) -> &Link<P> {
        &self.link
    }

    /// Get a mutable reference to the link.
    pub fn link_mut(&mut self) -> &mut Link<P> {
        &mut self.link
    }

    /// Consume the session and return the port.
    pub fn into_port(self) -> P {
        self.link
            .into_port()
    }

    /// Send a command and, if `expect_response`, wait for its response
    /// within the default response timeout.
    pub fn send_command(
        &mut self,
        function: FunctionId,
        payload: &[u8],
        expect_response: bool,
    ) -> Result<Option<Vec<u8>>> {
        if expect_response {
            let timeout = self
                .config
                .link
                .response_timeout;
            return self
                .request(function, payload, timeout)
                .map(Some);
        }

        debug!("Sending {function} without response");
        self.link
            .send(&command_bytes(function, payload))?;
        Ok(None)
    }

    /// Send a command and return its response payload (function id first).
    pub fn request(
        &mut self,
        function: FunctionId,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        debug!("Sending {function} with {} payload bytes", payload.len());
        self.link
            .send(&command_bytes(function, payload))?;

        let response = self.await_frame(FrameType::Response, timeout)?;
        if response
            .first()
            .copied()
            != Some(function.id())
        {
            return Err(Error::UnexpectedResponse {
                expected: function.to_string(),
                received: response,
            });
        }
        trace!("{function} response: {response:02X?}");
        Ok(response)
    }

    /// Receive frames until one of type `wanted` arrives.
    fn await_frame(&mut self, wanted: FrameType, timeout: Duration) -> Result<Vec<u8>> {
        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::ResponseTimeout(timeout));
            }
            let frame = match self
                .link
                .receive_frame(remaining)
            {
                Ok(frame) => frame,
                Err(Error::ResponseTimeout(_)) => return Err(Error::ResponseTimeout(timeout)),
                Err(e) => return Err(e),
            };

            if frame.frame_type == wanted {
                return Ok(frame.payload);
            }
            debug!(
                "Skipping unsolicited {:?} frame {:02X?}",
                frame.frame_type, frame.payload
            );
        }
    }

    /// Query SerialAPI version, manufacturer and supported functions.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        let response = self.expect_response(FunctionId::GetCapabilities, &[])?;
        Capabilities::parse(&response)
    }

    /// Query the protocol version string and library type.
    pub fn version(&mut self) -> Result<VersionInfo> {
        let response = self.expect_response(FunctionId::GetVersion, &[])?;
        VersionInfo::parse(&response)
    }

    /// Query the node list and controller role.
    pub fn init_data(&mut self) -> Result<InitData> {
        let response = self.expect_response(FunctionId::GetInitData, &[])?;
        InitData::parse(&response)
    }

    /// Take a fresh snapshot of the controller.
    ///
    /// The node list is informational and a failure to read it is only
    /// logged. NVM INIT is skipped when the controller publishes a function
    /// list without the firmware update family.
    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        let capabilities = self.capabilities()?;
        let version = self.version()?;

        let node_ids = match self.init_data() {
            Ok(data) => data.node_ids,
            Err(e) => {
                warn!("Could not read node list: {e}");
                Default::default()
            },
        };

        let otw_capable = if capabilities.has_function_list()
            && !capabilities.supports(FunctionId::FirmwareUpdateNvm)
        {
            debug!("{} not in the function list", FunctionId::FirmwareUpdateNvm);
            false
        } else {
            self.nvm_init()?
        };

        info!(
            "{} {}, SerialAPI {}.{}, OTW {}",
            version.version,
            version.library,
            capabilities.api_version,
            capabilities.api_revision,
            if otw_capable { "supported" } else { "unsupported" }
        );

        Ok(DeviceInfo {
            capabilities,
            version,
            node_ids,
            otw_capable,
        })
    }

    /// Prepare the external NVM; `true` if the firmware supports OTW updates.
    pub fn nvm_init(&mut self) -> Result<bool> {
        let timeout = self.response_timeout();
        let response = self.nvm_request(NvmCommand::Init, &[], timeout)?;
        let status = nvm_status(&response, NvmCommand::Init)?;
        debug!("NVM INIT status {status:#04x}");
        Ok(status == NVM_OTW_SUPPORTED)
    }

    /// Write one block at `offset` of the external NVM.
    pub fn nvm_write(&mut self, offset: u32, block: &[u8]) -> Result<WriteStatus> {
        if offset > MAX_NVM_OFFSET {
            return Err(Error::ProtocolViolation(format!(
                "NVM offset {offset:#x} exceeds 24 bits"
            )));
        }
        let length = u16::try_from(block.len()).map_err(|_| {
            Error::ProtocolViolation(format!("block of {} bytes is too long", block.len()))
        })?;

        let mut args = Vec::with_capacity(5 + block.len());
        args.write_u24::<BigEndian>(offset)?;
        args.write_u16::<BigEndian>(length)?;
        args.extend_from_slice(block);

        let timeout = self.response_timeout();
        let response = self.nvm_request(NvmCommand::Write, &args, timeout)?;
        let status = nvm_status(&response, NvmCommand::Write)?;
        trace!("WRITE {offset:#07x} status {status:#04x}");
        Ok(WriteStatus::from(status))
    }

    /// Ask the controller to validate the CRC16 of the written image.
    pub fn nvm_is_valid_crc16(&mut self) -> Result<CrcCheck> {
        let timeout = self
            .config
            .long_timeout;
        let response = self.nvm_request(NvmCommand::IsValidCrc16, &[], timeout)?;
        let status = nvm_status(&response, NvmCommand::IsValidCrc16)?;
        let crc = read_crc(&response, 3, NvmCommand::IsValidCrc16)?;
        debug!("IS_VALID_CRC16 status {status:#04x}, CRC {crc:#06x}");
        Ok(CrcCheck { status, crc })
    }

    /// Set (or clear) the flag that installs the new image on next boot.
    pub fn nvm_set_new_image(&mut self, install: bool) -> Result<u8> {
        let timeout = self.response_timeout();
        let response =
            self.nvm_request(NvmCommand::SetNewImage, &[u8::from(install)], timeout)?;
        nvm_status(&response, NvmCommand::SetNewImage)
    }

    /// Read the new-image flag.
    pub fn nvm_get_new_image(&mut self) -> Result<bool> {
        let timeout = self.response_timeout();
        let response = self.nvm_request(NvmCommand::GetNewImage, &[], timeout)?;
        Ok(nvm_status(&response, NvmCommand::GetNewImage)? != 0)
    }

    /// CRC16 over `length` bytes of the NVM starting at `offset`.
    pub fn nvm_update_crc16(&mut self, offset: u32, length: u16, seed: u16) -> Result<u16> {
        if offset > MAX_NVM_OFFSET {
            return Err(Error::ProtocolViolation(format!(
                "NVM offset {offset:#x} exceeds 24 bits"
            )));
        }
        let mut args = Vec::with_capacity(7);
        args.write_u24::<BigEndian>(offset)?;
        args.write_u16::<BigEndian>(length)?;
        args.write_u16::<BigEndian>(seed)?;

        let timeout = self
            .config
            .long_timeout;
        let response = self.nvm_request(NvmCommand::UpdateCrc16, &args, timeout)?;
        read_crc(&response, 2, NvmCommand::UpdateCrc16)
    }

    /// Turn the radio receiver on or off; `true` if the controller complied.
    pub fn set_rf_receive_mode(&mut self, enabled: bool) -> Result<bool> {
        let response =
            self.expect_response(FunctionId::SetRfReceiveMode, &[u8::from(enabled)])?;
        Ok(response
            .get(1)
            .is_some_and(|v| *v != 0))
    }

    /// Restart the controller. It does not answer.
    pub fn soft_reset(&mut self) -> Result<()> {
        info!("Soft reset");
        self.send_command(FunctionId::SoftReset, &[], false)?;
        Ok(())
    }

    /// Remove the controller from the lifeline group of `node_id`.
    ///
    /// Waits for the transmit-complete callback, so the node has either
    /// acknowledged the command or the controller gave up routing it.
    pub fn remove_lifeline(&mut self, node_id: u8) -> Result<()> {
        let command = [
            COMMAND_CLASS_ASSOCIATION,
            ASSOCIATION_REMOVE,
            LIFELINE_GROUP,
            CONTROLLER_NODE_ID,
        ];
        let mut payload = vec![node_id];
        #[allow(clippy::cast_possible_truncation)]
        payload.push(command.len() as u8);
        payload.extend_from_slice(&command);
        payload.push(TRANSMIT_OPTION_ACK | TRANSMIT_OPTION_AUTO_ROUTE);
        payload.push(SEND_DATA_CALLBACK_ID);

        let response = self.expect_response(FunctionId::SendData, &payload)?;
        if response
            .get(1)
            .is_none_or(|queued| *queued == 0)
        {
            return Err(Error::TransmitFailed {
                node: node_id,
                reason: "controller refused to queue the frame".into(),
            });
        }

        let timeout = self
            .config
            .callback_timeout;
        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            let callback = self.await_frame(FrameType::Request, remaining)?;
            if callback.first() != Some(&FunctionId::SendData.id())
                || callback.get(1) != Some(&SEND_DATA_CALLBACK_ID)
            {
                debug!("Skipping unrelated callback {callback:02X?}");
                continue;
            }

            return match callback.get(2) {
                Some(0x00) => {
                    info!("Lifeline removed from node {node_id}");
                    Ok(())
                },
                Some(status) => Err(Error::TransmitFailed {
                    node: node_id,
                    reason: transmit_status_name(*status),
                }),
                None => Err(Error::UnexpectedResponse {
                    expected: format!("{} callback with status", FunctionId::SendData),
                    received: callback,
                }),
            };
        }
    }

    fn response_timeout(&self) -> Duration {
        self.config
            .link
            .response_timeout
    }

    fn expect_response(&mut self, function: FunctionId, payload: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.response_timeout();
        self.request(function, payload, timeout)
    }

    fn nvm_request(
        &mut self,
        command: NvmCommand,
        args: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(1 + args.len());
        payload.push(command.id());
        payload.extend_from_slice(args);

        let response = self.request(FunctionId::FirmwareUpdateNvm, &payload, timeout)?;
        if response.get(1) != Some(&command.id()) {
            return Err(Error::UnexpectedResponse {
                expected: format!("{} {command}", FunctionId::FirmwareUpdateNvm),
                received: response,
            });
        }
        Ok(response)
    }
}

fn command_bytes(function: FunctionId, payload: &[u8]) -> Vec<u8> {
    let mut command = Vec::with_capacity(1 + payload.len());
    command.push(function.id());
    command.extend_from_slice(payload);
    command
}

fn nvm_status(response: &[u8], command: NvmCommand) -> Result<u8> {
    response
        .get(2)
        .copied()
        .ok_or_else(|| Error::UnexpectedResponse {
            expected: format!("{command} status byte"),
            received: response.to_vec(),
        })
}

fn read_crc(response: &[u8], at: usize, command: NvmCommand) -> Result<u16> {
    match (response.get(at), response.get(at + 1)) {
        (Some(hi), Some(lo)) => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::UnexpectedResponse {
            expected: format!("{command} CRC16"),
            received: response.to_vec(),
        }),
    }
}

fn transmit_status_name(status: u8) -> String {
    match status {
        0x01 => "no acknowledgment from node".into(),
        0x02 => "transmission failed".into(),
        0x03 => "routing not idle".into(),
        other => format!("transmit status {other:#04x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{self, ACK, SOF};
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    /// Controller stand-in: ACKs every frame and queues canned answers.
    struct MockPort {
        rx: VecDeque<u8>,
        writes: Vec<Vec<u8>>,
        replies: VecDeque<Vec<Vec<u8>>>,
        reply_delay: Duration,
        held: Option<(Instant, Vec<u8>)>,
    }

    impl MockPort {
        fn new() -> Self {
            Self {
                rx: VecDeque::new(),
                writes: Vec::new(),
                replies: VecDeque::new(),
                reply_delay: Duration::ZERO,
                held: None,
            }
        }

        /// Hold every answer back for `delay` after its ACK.
        fn slow(mut self, delay: Duration) -> Self {
            self.reply_delay = delay;
            self
        }

        fn release(&mut self) {
            if self
                .held
                .as_ref()
                .is_some_and(|(at, _)| Instant::now() >= *at)
            {
                if let Some((_, bytes)) = self
                    .held
                    .take()
                {
                    self.rx
                        .extend(bytes);
                }
            }
        }

        /// Frames sent in answer to the next request, after its ACK.
        fn answer(mut self, frames: Vec<Vec<u8>>) -> Self {
            self.replies
                .push_back(frames);
            self
        }

        fn requests(&self) -> Vec<Vec<u8>> {
            self.writes
                .iter()
                .filter(|w| w.first() == Some(&SOF))
                .map(|w| w[3..w.len() - 1].to_vec())
                .collect()
        }
    }

    fn wire(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let len = (payload.len() + 2) as u8;
        let mut out = vec![SOF, len, frame_type as u8];
        out.extend_from_slice(payload);
        out.push(frame::checksum(&out[1..]));
        out
    }

    fn res(payload: &[u8]) -> Vec<u8> {
        wire(FrameType::Response, payload)
    }

    fn req(payload: &[u8]) -> Vec<u8> {
        wire(FrameType::Request, payload)
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.release();
            let mut n = 0;
            while n < buf.len() {
                match self
                    .rx
                    .pop_front()
                {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    },
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes
                .push(buf.to_vec());
            if buf.first() == Some(&SOF) {
                self.rx
                    .push_back(ACK);
                if let Some(frames) = self
                    .replies
                    .pop_front()
                {
                    let bytes: Vec<u8> = frames
                        .into_iter()
                        .flatten()
                        .collect();
                    if self
                        .reply_delay
                        .is_zero()
                    {
                        self.rx
                            .extend(bytes);
                    } else {
                        self.held = Some((Instant::now() + self.reply_delay, bytes));
                    }
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn bytes_to_read(&mut self) -> Result<u32> {
            self.release();
            Ok(u32::try_from(
                self.rx
                    .len(),
            )
            .unwrap_or(u32::MAX))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn fast_config() -> SessionConfig {
        let link = LinkConfig {
            ack_timeout: Duration::from_millis(20),
            response_timeout: Duration::from_millis(50),
            inter_byte_timeout: Duration::from_millis(10),
            resync_acks: 2,
            resync_interval: Duration::from_millis(1),
            retry_delay: Duration::ZERO,
            ..LinkConfig::default()
        };
        SessionConfig::default()
            .with_link(link)
            .with_long_timeout(Duration::from_millis(80))
            .with_callback_timeout(Duration::from_millis(80))
    }

    fn version_payload() -> Vec<u8> {
        let mut payload = vec![0x15];
        payload.extend_from_slice(b"Z-Wave 4.54\0");
        payload.push(0x07);
        payload
    }

    #[test]
    fn test_request_returns_response_payload() {
        let port = MockPort::new().answer(vec![res(&version_payload())]);
        let mut session = Session::new(port, fast_config());

        let info = session
            .version()
            .unwrap();
        assert_eq!(info.version, "Z-Wave 4.54");

        let port = session.into_port();
        assert_eq!(port.requests(), vec![vec![0x15]]);
    }

    #[test]
    fn test_request_skips_unsolicited_request_frames() {
        let port = MockPort::new().answer(vec![
            req(&[0x04, 0x00, 0x02, 0x02, 0x20, 0x01]),
            res(&version_payload()),
        ]);
        let mut session = Session::new(port, fast_config());

        assert!(
            session
                .version()
                .is_ok()
        );
    }

    #[test]
    fn test_request_rejects_wrong_echo() {
        let port = MockPort::new().answer(vec![res(&[0x07, 0x01])]);
        let mut session = Session::new(port, fast_config());

        match session.version() {
            Err(Error::UnexpectedResponse { received, .. }) => {
                assert_eq!(received, vec![0x07, 0x01]);
            },
            other => panic!("expected unexpected response, got {other:?}"),
        }
    }

    #[test]
    fn test_request_times_out_without_response() {
        let port = MockPort::new();
        let mut session = Session::new(port, fast_config());

        assert!(matches!(
            session.capabilities(),
            Err(Error::ResponseTimeout(t)) if t == Duration::from_millis(50)
        ));
    }

    #[test]
    fn test_send_command_without_response() {
        let port = MockPort::new();
        let mut session = Session::new(port, fast_config());

        let reply = session
            .send_command(FunctionId::SoftReset, &[], false)
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(
            session
                .into_port()
                .requests(),
            vec![vec![0x08]]
        );
    }

    #[test]
    fn test_nvm_write_layout() {
        let port = MockPort::new().answer(vec![res(&[0x78, 0x05, 0x01])]);
        let mut session = Session::new(port, fast_config());

        let block = [0xABu8; 32];
        let status = session
            .nvm_write(0x01_2340, &block)
            .unwrap();
        assert_eq!(status, WriteStatus::Written);

        let sent = session
            .into_port()
            .requests();
        assert_eq!(&sent[0][..7], &[0x78, 0x05, 0x01, 0x23, 0x40, 0x00, 0x20]);
        assert_eq!(&sent[0][7..], &block[..]);
    }

    #[test]
    fn test_nvm_write_rejects_wide_offset() {
        let mut session = Session::new(MockPort::new(), fast_config());
        assert!(matches!(
            session.nvm_write(0x0100_0000, &[0u8; 32]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_nvm_sub_command_echo_checked() {
        let port = MockPort::new().answer(vec![res(&[0x78, 0x04, 0x01])]);
        let mut session = Session::new(port, fast_config());

        assert!(matches!(
            session.nvm_write(0, &[0u8; 32]),
            Err(Error::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_nvm_is_valid_crc16() {
        let port = MockPort::new()
            .answer(vec![res(&[0x78, 0x04, 0x00, 0x12, 0x34])])
            .answer(vec![res(&[0x78, 0x04, 0x01, 0x56, 0x78])]);
        let mut session = Session::new(port, fast_config());

        let check = session
            .nvm_is_valid_crc16()
            .unwrap();
        assert!(check.is_valid());
        assert_eq!(check.crc, 0x1234);

        let check = session
            .nvm_is_valid_crc16()
            .unwrap();
        assert!(!check.is_valid());
        assert_eq!(check.status, 0x01);
        assert_eq!(check.crc, 0x5678);
    }

    /// Response timeout 30 ms, long timeout 300 ms.
    fn split_timeouts() -> SessionConfig {
        let link = fast_config()
            .link
            .with_response_timeout(Duration::from_millis(30));
        fast_config()
            .with_link(link)
            .with_long_timeout(Duration::from_millis(300))
    }

    #[test]
    fn test_crc_check_waits_for_long_timeout() {
        let port = MockPort::new()
            .slow(Duration::from_millis(100))
            .answer(vec![res(&[0x78, 0x04, 0x00, 0xAB, 0xCD])]);
        let mut session = Session::new(port, split_timeouts());

        let check = session
            .nvm_is_valid_crc16()
            .unwrap();
        assert!(check.is_valid());
        assert_eq!(check.crc, 0xABCD);
    }

    #[test]
    fn test_short_commands_use_response_timeout() {
        let port = MockPort::new()
            .slow(Duration::from_millis(100))
            .answer(vec![res(&[0x78, 0x02, 0x01])]);
        let mut session = Session::new(port, split_timeouts());

        assert!(matches!(
            session.nvm_get_new_image(),
            Err(Error::ResponseTimeout(_))
        ));
    }

    #[test]
    fn test_nvm_update_crc16() {
        let port = MockPort::new().answer(vec![res(&[0x78, 0x03, 0xBE, 0xEF])]);
        let mut session = Session::new(port, fast_config());

        let crc = session
            .nvm_update_crc16(0x20, 0x1000, 0x1D0F)
            .unwrap();
        assert_eq!(crc, 0xBEEF);
        assert_eq!(
            session
                .into_port()
                .requests()[0],
            vec![0x78, 0x03, 0x00, 0x00, 0x20, 0x10, 0x00, 0x1D, 0x0F]
        );
    }

    #[test]
    fn test_nvm_new_image_flag() {
        let port = MockPort::new()
            .answer(vec![res(&[0x78, 0x01, 0x01])])
            .answer(vec![res(&[0x78, 0x02, 0x01])]);
        let mut session = Session::new(port, fast_config());

        assert_eq!(
            session
                .nvm_set_new_image(true)
                .unwrap(),
            0x01
        );
        assert!(
            session
                .nvm_get_new_image()
                .unwrap()
        );
        assert_eq!(
            session
                .into_port()
                .requests(),
            vec![vec![0x78, 0x01, 0x01], vec![0x78, 0x02]]
        );
    }

    #[test]
    fn test_device_info_skips_nvm_init_when_unsupported() {
        let mut caps = vec![0x07, 0x05, 0x00, 0x00, 0x86, 0x00, 0x01, 0x00, 0x5A];
        let mut bitmask = [0u8; 32];
        bitmask[0] = 0b0100_0010;
        caps.extend_from_slice(&bitmask);

        let port = MockPort::new()
            .answer(vec![res(&caps)])
            .answer(vec![res(&version_payload())])
            .answer(vec![res(&[0x02, 0x05, 0x00, 1, 0x01, 0x05, 0x00])]);
        let mut session = Session::new(port, fast_config());

        let info = session
            .device_info()
            .unwrap();
        assert!(!info.otw_capable);
        assert_eq!(info.node_ids, [1].into());

        let requests = session
            .into_port()
            .requests();
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn test_device_info_tolerates_missing_node_list() {
        let caps = vec![0x07, 0x05, 0x00, 0x00, 0x86, 0x00, 0x01, 0x00, 0x5A];
        let port = MockPort::new()
            .answer(vec![res(&caps)])
            .answer(vec![res(&version_payload())])
            .answer(vec![])
            .answer(vec![res(&[0x78, 0x00, 0x01])]);
        let mut session = Session::new(port, fast_config());

        let info = session
            .device_info()
            .unwrap();
        assert!(info.otw_capable);
        assert!(
            info.node_ids
                .is_empty()
        );
        assert_eq!(info.not_updatable_reason(), None);
    }

    #[test]
    fn test_remove_lifeline() {
        let port = MockPort::new().answer(vec![
            res(&[0x13, 0x01]),
            req(&[0x13, SEND_DATA_CALLBACK_ID, 0x00, 0x00, 0x02]),
        ]);
        let mut session = Session::new(port, fast_config());

        session
            .remove_lifeline(5)
            .unwrap();
        assert_eq!(
            session
                .into_port()
                .requests()[0],
            vec![0x13, 0x05, 0x04, 0x85, 0x04, 0x01, 0x01, 0x05, SEND_DATA_CALLBACK_ID]
        );
    }

    #[test]
    fn test_remove_lifeline_no_ack() {
        let port = MockPort::new().answer(vec![
            res(&[0x13, 0x01]),
            req(&[0x13, SEND_DATA_CALLBACK_ID, 0x01]),
        ]);
        let mut session = Session::new(port, fast_config());

        match session.remove_lifeline(5) {
            Err(Error::TransmitFailed { node, reason }) => {
                assert_eq!(node, 5);
                assert!(reason.contains("no acknowledgment"));
            },
            other => panic!("expected transmit failure, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_lifeline_not_queued() {
        let port = MockPort::new().answer(vec![res(&[0x13, 0x00])]);
        let mut session = Session::new(port, fast_config());

        assert!(matches!(
            session.remove_lifeline(5),
            Err(Error::TransmitFailed { node: 5, .. })
        ));
    }
}
