//! Simulated Z-Wave controller for integration tests.
//!
//! The controller parses host frames as they are written, answers with ACK
//! and a response frame, and keeps an NVM image so WRITE behaves like the
//! real firmware (status 0x00 when the block is already stored).

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use zwflash::image::CAPACITY;
use zwflash::protocol::frame::{self, ACK, NAK, SOF};
use zwflash::{LinkConfig, Port, SessionConfig, UpdateConfig};

const FUNC_GET_INIT_DATA: u8 = 0x02;
const FUNC_GET_CAPABILITIES: u8 = 0x07;
const FUNC_SOFT_RESET: u8 = 0x08;
const FUNC_SERIAL_API_STARTED: u8 = 0x0A;
const FUNC_SET_RF_RECEIVE_MODE: u8 = 0x10;
const FUNC_SEND_DATA: u8 = 0x13;
const FUNC_GET_VERSION: u8 = 0x15;
const FUNC_FIRMWARE_UPDATE_NVM: u8 = 0x78;

/// Controller model and fault injection knobs.
pub struct SimController {
    rx: VecDeque<u8>,
    partial: Vec<u8>,

    pub version: String,
    pub version_after_update: Option<String>,
    pub otw_status: u8,
    pub crc_status: u8,
    pub crc: u16,
    pub nvm: Vec<u8>,
    pub new_image: bool,
    pub announce_after_reset: bool,

    /// Frames to ignore completely (no ACK, no response).
    pub drop_frames: usize,
    /// Offset whose WRITE is answered with the given status.
    pub reject_write: Option<(u32, u8)>,
    /// Offset whose WRITE is ACKed but never answered.
    pub silent_write: Option<u32>,
    /// Transmit status in SEND_DATA callbacks.
    pub transmit_status: u8,

    /// Every command the controller accepted (function id first).
    pub requests: Vec<Vec<u8>>,
    /// Frames dropped by fault injection.
    pub dropped: usize,
    /// Control bytes received from the host.
    pub host_acks: usize,
}

impl SimController {
    /// A 500 series controller with OTW support and old firmware in NVM.
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            partial: Vec::new(),
            version: "Z-Wave 4.54".into(),
            version_after_update: Some("Z-Wave 6.01".into()),
            otw_status: 0x01,
            crc_status: 0x00,
            crc: 0x5A5A,
            nvm: vec![0x00; CAPACITY],
            new_image: false,
            announce_after_reset: true,
            drop_frames: 0,
            reject_write: None,
            silent_write: None,
            transmit_status: 0x00,
            requests: Vec::new(),
            dropped: 0,
            host_acks: 0,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.into();
        self
    }

    pub fn count(&self, function: u8) -> usize {
        self.requests
            .iter()
            .filter(|r| r.first() == Some(&function))
            .count()
    }

    pub fn nvm_count(&self, sub: u8) -> usize {
        self.requests
            .iter()
            .filter(|r| r.first() == Some(&FUNC_FIRMWARE_UPDATE_NVM) && r.get(1) == Some(&sub))
            .count()
    }

    /// Offsets of WRITE requests in arrival order.
    pub fn write_offsets(&self) -> Vec<u32> {
        self.requests
            .iter()
            .filter(|r| r.first() == Some(&FUNC_FIRMWARE_UPDATE_NVM) && r.get(1) == Some(&0x05))
            .map(|r| u32::from_be_bytes([0, r[2], r[3], r[4]]))
            .collect()
    }

    pub fn resets(&self) -> usize {
        self.count(FUNC_SOFT_RESET)
    }

    fn send_frame(&mut self, frame_type: u8, payload: &[u8]) {
        let len = u8::try_from(payload.len() + 2).unwrap();
        let mut out = vec![SOF, len, frame_type];
        out.extend_from_slice(payload);
        out.push(frame::checksum(&out[1..]));
        self.rx
            .extend(out);
    }

    fn respond(&mut self, payload: &[u8]) {
        self.send_frame(0x01, payload);
    }

    fn on_byte(&mut self, byte: u8) {
        if self
            .partial
            .is_empty()
        {
            match byte {
                SOF => self
                    .partial
                    .push(byte),
                _ => self.host_acks += 1,
            }
            return;
        }

        self.partial
            .push(byte);
        if self
            .partial
            .len()
            < 2
        {
            return;
        }
        let len = usize::from(self.partial[1]);
        if self
            .partial
            .len()
            < len + 2
        {
            return;
        }

        let frame_bytes = std::mem::take(&mut self.partial);
        if self.drop_frames > 0 {
            self.drop_frames -= 1;
            self.dropped += 1;
            return;
        }
        if frame::residue(frame_bytes[1], &frame_bytes[2..]) != 0 {
            self.rx
                .push_back(NAK);
            return;
        }

        self.rx
            .push_back(ACK);
        let command = frame_bytes[3..frame_bytes.len() - 1].to_vec();
        self.requests
            .push(command.clone());
        self.handle(&command);
    }

    fn handle(&mut self, command: &[u8]) {
        match command[0] {
            FUNC_GET_CAPABILITIES => {
                let mut payload = vec![FUNC_GET_CAPABILITIES, 0x05, 0x21, 0x00, 0x86, 0x00, 0x01, 0x00, 0x5A];
                let mut bitmask = [0u8; 32];
                for id in [
                    FUNC_GET_INIT_DATA,
                    FUNC_GET_CAPABILITIES,
                    FUNC_SOFT_RESET,
                    FUNC_SET_RF_RECEIVE_MODE,
                    FUNC_SEND_DATA,
                    FUNC_GET_VERSION,
                    FUNC_FIRMWARE_UPDATE_NVM,
                ] {
                    let bit = usize::from(id) - 1;
                    bitmask[bit / 8] |= 1 << (bit % 8);
                }
                payload.extend_from_slice(&bitmask);
                self.respond(&payload);
            },
            FUNC_GET_VERSION => {
                let mut payload = vec![FUNC_GET_VERSION];
                let mut raw = [0u8; 12];
                raw[..self.version.len()].copy_from_slice(self.version.as_bytes());
                payload.extend_from_slice(&raw);
                payload.push(0x07);
                self.respond(&payload);
            },
            FUNC_GET_INIT_DATA => {
                let mut payload = vec![FUNC_GET_INIT_DATA, 0x05, 0x08, 29];
                let mut bitmap = [0u8; 29];
                // Nodes 1 and 5
                bitmap[0] = 0b0001_0001;
                payload.extend_from_slice(&bitmap);
                payload.extend_from_slice(&[0x05, 0x00]);
                self.respond(&payload);
            },
            FUNC_SET_RF_RECEIVE_MODE => self.respond(&[FUNC_SET_RF_RECEIVE_MODE, 0x01]),
            FUNC_SEND_DATA => {
                self.respond(&[FUNC_SEND_DATA, 0x01]);
                let callback_id = command[command.len() - 1];
                self.send_frame(0x00, &[FUNC_SEND_DATA, callback_id, self.transmit_status]);
            },
            FUNC_SOFT_RESET => {
                if self.new_image {
                    if let Some(version) = self
                        .version_after_update
                        .take()
                    {
                        self.version = version;
                    }
                    self.new_image = false;
                }
                if self.announce_after_reset {
                    self.send_frame(0x00, &[FUNC_SERIAL_API_STARTED, 0x00, 0x00, 0x01, 0x02]);
                }
            },
            FUNC_FIRMWARE_UPDATE_NVM => self.handle_nvm(command),
            _ => {},
        }
    }

    fn handle_nvm(&mut self, command: &[u8]) {
        let sub = command[1];
        match sub {
            0x00 => self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, self.otw_status]),
            0x01 => {
                let status = u8::from(!self.new_image);
                self.new_image = command[2] != 0;
                self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, status]);
            },
            0x02 => self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, u8::from(self.new_image)]),
            0x04 => {
                let [hi, lo] = self
                    .crc
                    .to_be_bytes();
                self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, self.crc_status, hi, lo]);
            },
            0x05 => {
                let offset = u32::from_be_bytes([0, command[2], command[3], command[4]]);
                let len = usize::from(u16::from_be_bytes([command[5], command[6]]));
                let data = &command[7..7 + len];

                if self.silent_write == Some(offset) {
                    return;
                }
                if let Some((at, status)) = self.reject_write {
                    if at == offset {
                        self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, status]);
                        return;
                    }
                }

                let start = offset as usize;
                let status = if self.nvm[start..start + len] == *data {
                    0x00
                } else {
                    self.nvm[start..start + len].copy_from_slice(data);
                    0x01
                };
                self.respond(&[FUNC_FIRMWARE_UPDATE_NVM, sub, status]);
            },
            _ => {},
        }
    }
}

impl Read for SimController {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
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

impl Write for SimController {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for byte in buf {
            self.on_byte(*byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for SimController {
    fn bytes_to_read(&mut self) -> zwflash::Result<u32> {
        Ok(u32::try_from(
            self.rx
                .len(),
        )
        .unwrap_or(u32::MAX))
    }

    fn name(&self) -> &str {
        "sim"
    }
}

/// Session timing scaled down for tests.
pub fn fast_session() -> SessionConfig {
    let link = LinkConfig {
        ack_timeout: Duration::from_millis(20),
        response_timeout: Duration::from_millis(100),
        inter_byte_timeout: Duration::from_millis(10),
        resync_acks: 2,
        resync_interval: Duration::from_millis(1),
        retry_delay: Duration::ZERO,
        ..LinkConfig::default()
    };
    SessionConfig::default()
        .with_link(link)
        .with_long_timeout(Duration::from_millis(100))
        .with_callback_timeout(Duration::from_millis(100))
}

/// Update pacing scaled down for tests.
pub fn fast_update() -> UpdateConfig {
    UpdateConfig::default()
        .with_block_delay(Duration::ZERO)
        .with_reboot_wait(Duration::from_millis(200))
}

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}
