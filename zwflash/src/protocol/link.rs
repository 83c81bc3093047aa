//! SerialAPI link layer: ACK/NAK/CAN handshake and bounded retransmission.
//!
//! Every request frame must be answered by a single control byte before the
//! controller sends anything else:
//!
//! ```text
//! host                         controller
//!  |---- SOF LEN REQ ... CS ---->|
//!  |<----------- ACK ------------|   accepted
//!  |<----------- CAN ------------|   dropped, controller was busy sending
//!  |<----------- NAK ------------|   corrupted
//!  |<---- SOF LEN RES ... CS ----|   response (if any)
//!  |------------ ACK ----------->|
//! ```
//!
//! The link never asks the controller to retransmit a response. A corrupted
//! response is still ACKed and reported to the caller as
//! [`Error::ChecksumMismatch`].

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{self, ACK, Frame, SOF};
use log::{debug, trace, warn};
use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

/// Most bytes a single purge discards.
pub const MAX_PURGE_BYTES: usize = 1024;

/// Link timing and retry parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Wait for the ACK/NAK/CAN answering a request frame.
    pub ack_timeout: Duration,
    /// Default wait for a response frame.
    pub response_timeout: Duration,
    /// Wait for each byte once a frame has started.
    pub inter_byte_timeout: Duration,
    /// Transmissions per request before giving up.
    pub max_attempts: u32,
    /// ACK bytes sent to resynchronize after a missing ACK.
    pub resync_acks: u32,
    /// Wait for an answer after each resync ACK.
    pub resync_interval: Duration,
    /// Pause before retransmitting a frame.
    pub retry_delay: Duration,
    /// Sleep between polls of the receive buffer.
    pub poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(5000),
            inter_byte_timeout: Duration::from_millis(100),
            max_attempts: 3,
            resync_acks: 32,
            resync_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl LinkConfig {
    /// Set the ACK timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the default response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the number of transmissions per request.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Handshake state of the request currently being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// No request in flight.
    Idle,
    /// Writing the request frame.
    Sending,
    /// Waiting for the controller's control byte.
    AwaitingAck,
    /// The controller accepted the request.
    Acked,
    /// About to retransmit.
    Retrying,
    /// Attempts exhausted.
    GaveUp,
}

/// Control byte outcome of one transmission.
enum AckOutcome {
    Acked,
    Silent,
    Rejected(u8),
}

/// SerialAPI link over an exclusively owned port.
pub struct Link<P: Port> {
    port: P,
    config: LinkConfig,
    state: SendState,
    pushback: Option<u8>,
}

impl<P: Port> Link<P> {
    /// Create a link over an opened port.
    pub fn new(port: P, config: LinkConfig) -> Self {
        Self {
            port,
            config,
            state: SendState::Idle,
            pushback: None,
        }
    }

    /// Link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// State of the last request handshake.
    pub fn state(&self) -> SendState {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the link and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn transition(&mut self, next: SendState) {
        trace!("Link {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Send a command frame and wait for the controller to accept it.
    ///
    /// Retransmits up to `max_attempts` times. Fails with
    /// [`Error::LinkTimeout`] when every attempt goes unacknowledged.
    pub fn send(&mut self, command: &[u8]) -> Result<()> {
        let wire = frame::encode(command)?;
        let attempts = self
            .config
            .max_attempts
            .max(1);

        for attempt in 1..=attempts {
            self.purge()?;

            self.transition(SendState::Sending);
            trace!("-> {wire:02X?}");
            self.port
                .write_all_bytes(&wire)?;

            self.transition(SendState::AwaitingAck);
            let accepted = match self.await_ack()? {
                AckOutcome::Acked => true,
                AckOutcome::Silent => {
                    debug!(
                        "No ACK within {:?}, resynchronizing",
                        self.config
                            .ack_timeout
                    );
                    self.resync()?
                },
                AckOutcome::Rejected(byte) => {
                    warn!("Frame not acknowledged: got 0x{byte:02X}");
                    self.send_ack()?;
                    self.purge()?;
                    false
                },
            };

            if accepted {
                self.transition(SendState::Acked);
                return Ok(());
            }

            if attempt < attempts {
                self.transition(SendState::Retrying);
                debug!("Retransmitting (attempt {}/{attempts})", attempt + 1);
                thread::sleep(
                    self.config
                        .retry_delay,
                );
            }
        }

        self.transition(SendState::GaveUp);
        warn!(
            "{}: no ACK after {attempts} attempts",
            self.port
                .name()
        );
        Err(Error::LinkTimeout { attempts })
    }

    fn await_ack(&mut self) -> Result<AckOutcome> {
        match self.read_byte(
            self.config
                .ack_timeout,
        )? {
            None => Ok(AckOutcome::Silent),
            Some(ACK) => Ok(AckOutcome::Acked),
            Some(byte) => Ok(AckOutcome::Rejected(byte)),
        }
    }

    /// ACK burst after a missing ACK.
    ///
    /// A controller that received the frame but whose ACK was lost picks up
    /// on any ACK. Returns `true` once the controller shows it has the frame.
    fn resync(&mut self) -> Result<bool> {
        for _ in 0..self
            .config
            .resync_acks
        {
            self.send_ack()?;
            match self.read_byte(
                self.config
                    .resync_interval,
            )? {
                Some(ACK) => {
                    debug!("Controller resynchronized");
                    return Ok(true);
                },
                Some(SOF) => {
                    // Response already on its way
                    self.pushback = Some(SOF);
                    return Ok(true);
                },
                Some(byte) => trace!("Ignoring 0x{byte:02X} during resync"),
                None => {},
            }
        }
        Ok(false)
    }

    /// Drain stale input, ACKing it so the controller stops retrying.
    ///
    /// Stops after [`MAX_PURGE_BYTES`] so a babbling line cannot stall it.
    pub fn purge(&mut self) -> Result<()> {
        let mut dumped = Vec::new();
        if let Some(byte) = self
            .pushback
            .take()
        {
            dumped.push(byte);
        }

        while dumped.len() < MAX_PURGE_BYTES {
            let pending = (self
                .port
                .bytes_to_read()? as usize)
                .min(MAX_PURGE_BYTES - dumped.len());
            if pending == 0 {
                break;
            }
            let mut buf = vec![0u8; pending];
            match self
                .port
                .read(&mut buf)
            {
                Ok(0) => break,
                Ok(n) => dumped.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if dumped.len() >= MAX_PURGE_BYTES {
            warn!("Input still pending after discarding {MAX_PURGE_BYTES} bytes");
        }
        if !dumped.is_empty() {
            trace!("Dumping {dumped:02X?}");
            self.send_ack()?;
        }
        Ok(())
    }

    /// Send a lone ACK byte.
    pub fn send_ack(&mut self) -> Result<()> {
        self.port
            .write_all_bytes(&[ACK])
    }

    /// Receive one frame, waiting up to `timeout` for its start.
    ///
    /// Bytes before SOF are skipped. Every complete frame is ACKed, even one
    /// that fails the checksum.
    pub fn receive_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            match self.read_byte(remaining)? {
                Some(SOF) => break,
                Some(byte) => {
                    trace!("SerialAPI not in sync, skipping 0x{byte:02X}");
                    if start.elapsed() >= timeout {
                        debug!("No SOF within {timeout:?}");
                        return Err(Error::ResponseTimeout(timeout));
                    }
                },
                None => {
                    debug!("No frame within {timeout:?}");
                    return Err(Error::ResponseTimeout(timeout));
                },
            }
        }

        let inter_byte = self
            .config
            .inter_byte_timeout;
        let Some(len) = self.read_byte(inter_byte)? else {
            warn!("Frame truncated before length byte");
            return Err(Error::ResponseTimeout(timeout));
        };

        let mut body = Vec::with_capacity(usize::from(len));
        for _ in 0..len {
            match self.read_byte(inter_byte)? {
                Some(byte) => body.push(byte),
                None => {
                    warn!(
                        "Frame truncated after {} of {len} bytes",
                        body.len()
                    );
                    return Err(Error::ResponseTimeout(timeout));
                },
            }
        }
        trace!("<- {SOF:02X} {len:02X} {body:02X?}");

        self.send_ack()?;

        frame::decode(len, &body).inspect_err(|e| warn!("Discarding received frame: {e}"))
    }

    /// Wait up to `timeout` for any byte from the controller.
    ///
    /// The byte is kept for the next purge or receive.
    pub fn wait_for_activity(&mut self, timeout: Duration) -> Result<bool> {
        match self.read_byte(timeout)? {
            Some(byte) => {
                debug!("Controller activity: 0x{byte:02X}");
                self.pushback = Some(byte);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Read one byte, or `None` after `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if let Some(byte) = self
            .pushback
            .take()
        {
            return Ok(Some(byte));
        }

        let start = Instant::now();
        loop {
            if self
                .port
                .bytes_to_read()?
                > 0
            {
                let mut buf = [0u8; 1];
                match self
                    .port
                    .read(&mut buf)
                {
                    Ok(1) => return Ok(Some(buf[0])),
                    Ok(_) => {},
                    Err(e) if e.kind() == ErrorKind::TimedOut => {},
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(
                self.config
                    .poll_interval,
            );
        }
    }
}
