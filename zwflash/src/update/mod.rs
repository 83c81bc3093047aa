//! Over-the-wire firmware update.
//!
//! ## Update Flow
//!
//! ```text
//! Probe ──► Quiesce ──► Transfer ──► Validate ──► Commit ──► Reboot ──► Reverify
//!   │                      │             │
//!   │ not updatable        │ rejected    │ CRC invalid
//!   ▼                      ▼             ▼
//! NotUpdatable        WriteRejected   SOFT_RESET, CrcValidationFailed
//! ```
//!
//! Every step waits for the previous one to be answered. Any error that
//! survives the link retries aborts the run; there is no resume, a new run
//! starts again at offset 0.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::{BLOCK_SIZE, CAPACITY, ImageSource};
use crate::port::Port;
use crate::session::{DeviceInfo, Session, WriteStatus};

/// Pause after the first sign of life before talking to a rebooted controller.
const REBOOT_SETTLE: Duration = Duration::from_millis(200);

/// Update pacing and behaviour.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Pause between block writes.
    pub block_delay: Duration,
    /// Wait for the controller to come back after the final reset.
    pub reboot_wait: Duration,
    /// Turn the radio receiver off during the transfer.
    pub quiesce_radio: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            block_delay: Duration::from_millis(50),
            reboot_wait: Duration::from_secs(30),
            quiesce_radio: true,
        }
    }
}

impl UpdateConfig {
    /// Set the pause between block writes.
    #[must_use]
    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = delay;
        self
    }

    /// Set the post-reset wait.
    #[must_use]
    pub fn with_reboot_wait(mut self, wait: Duration) -> Self {
        self.reboot_wait = wait;
        self
    }

    /// Enable or disable radio quiescing.
    #[must_use]
    pub fn with_quiesce_radio(mut self, quiesce: bool) -> Self {
        self.quiesce_radio = quiesce;
        self
    }
}

/// Update phase, reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading controller identity and OTW support.
    Probe,
    /// Turning the radio receiver off.
    Quiesce,
    /// Writing blocks.
    Transfer,
    /// Device-side CRC check.
    Validate,
    /// Marking the image for installation.
    Commit,
    /// Resetting and waiting for the controller.
    Reboot,
    /// Probing the rebooted controller.
    Reverify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probe => "Probing controller",
            Self::Quiesce => "Disabling radio",
            Self::Transfer => "Writing firmware",
            Self::Validate => "Validating CRC",
            Self::Commit => "Committing image",
            Self::Reboot => "Rebooting controller",
            Self::Reverify => "Verifying new firmware",
        };
        f.write_str(name)
    }
}

/// Result of a completed update.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdateReport {
    /// Controller before the update.
    pub before: DeviceInfo,
    /// Controller after the reboot.
    pub after: DeviceInfo,
    /// Blocks the controller stored.
    pub blocks_written: usize,
    /// Blocks the controller already held.
    pub blocks_unchanged: usize,
    /// CRC16 reported by the validation step.
    pub crc: u16,
    /// The controller produced output within the reboot wait.
    pub device_signalled_ready: bool,
}

/// What a run did.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// No image given; only the probe ran.
    Probed(DeviceInfo),
    /// The image was written, validated and installed.
    Updated(UpdateReport),
}

/// Drives a firmware update over a [`Session`].
pub struct Updater<P: Port> {
    session: Session<P>,
    config: UpdateConfig,
}

impl<P: Port> Updater<P> {
    /// Create an updater over an existing session.
    pub fn new(session: Session<P>, config: UpdateConfig) -> Self {
        Self { session, config }
    }

    /// Get the update configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Get a reference to the session.
    pub fn session(&self) -> &Session<P> {
        &self.session
    }

    /// Get a mutable reference to the session.
    pub fn session_mut(&mut self) -> &mut Session<P> {
        &mut self.session
    }

    /// Consume the updater and return the port.
    pub fn into_port(self) -> P {
        self.session
            .into_port()
    }

    /// Probe the controller without changing anything.
    pub fn probe(&mut self) -> Result<DeviceInfo> {
        self.session
            .device_info()
    }

    /// Run the update.
    ///
    /// With `image == None` only the probe runs, and the snapshot is returned
    /// even if the controller could not be updated. `progress` receives the
    /// phase with a done/total pair; the transfer counts blocks.
    pub fn run<I, F>(&mut self, image: Option<&I>, mut progress: F) -> Result<UpdateOutcome>
    where
        I: ImageSource + ?Sized,
        F: FnMut(Phase, usize, usize),
    {
        progress(Phase::Probe, 0, 1);
        let before = self.probe()?;
        progress(Phase::Probe, 1, 1);

        let Some(image) = image else {
            return Ok(UpdateOutcome::Probed(before));
        };

        if let Some(reason) = before.not_updatable_reason() {
            return Err(Error::NotUpdatable(reason));
        }
        if image.len() > CAPACITY {
            return Err(Error::InvalidImage(format!(
                "image of {} bytes exceeds the {CAPACITY}-byte flash",
                image.len()
            )));
        }

        if self
            .config
            .quiesce_radio
        {
            progress(Phase::Quiesce, 0, 1);
            self.quiesce();
            progress(Phase::Quiesce, 1, 1);
        }

        let (blocks_written, blocks_unchanged) = self.transfer(image, &mut progress)?;

        progress(Phase::Validate, 0, 1);
        let crc = self.validate()?;
        progress(Phase::Validate, 1, 1);

        progress(Phase::Commit, 0, 1);
        self.commit()?;
        progress(Phase::Commit, 1, 1);

        progress(Phase::Reboot, 0, 1);
        let device_signalled_ready = self.reboot()?;
        progress(Phase::Reboot, 1, 1);

        progress(Phase::Reverify, 0, 1);
        let after = self.probe()?;
        progress(Phase::Reverify, 1, 1);

        info!(
            "Update complete: {} -> {}",
            before
                .version
                .version,
            after
                .version
                .version
        );

        Ok(UpdateOutcome::Updated(UpdateReport {
            before,
            after,
            blocks_written,
            blocks_unchanged,
            crc,
            device_signalled_ready,
        }))
    }

    /// Best effort; a controller that keeps receiving only slows the transfer.
    fn quiesce(&mut self) {
        match self
            .session
            .set_rf_receive_mode(false)
        {
            Ok(true) => debug!("Radio receiver disabled"),
            Ok(false) => warn!("Controller refused to disable the radio receiver"),
            Err(e) => warn!("Could not disable the radio receiver: {e}"),
        }
    }

    fn transfer<I, F>(&mut self, image: &I, progress: &mut F) -> Result<(usize, usize)>
    where
        I: ImageSource + ?Sized,
        F: FnMut(Phase, usize, usize),
    {
        let total = CAPACITY / BLOCK_SIZE;
        let mut written = 0;
        let mut unchanged = 0;
        let mut block = [0u8; BLOCK_SIZE];

        info!(
            "Writing {total} blocks over {}",
            self.session
                .link()
                .port()
                .name()
        );
        progress(Phase::Transfer, 0, total);

        for index in 0..total {
            if index > 0
                && !self
                    .config
                    .block_delay
                    .is_zero()
            {
                thread::sleep(
                    self.config
                        .block_delay,
                );
            }

            let offset = index * BLOCK_SIZE;
            image.read_block(offset, &mut block);

            // CAPACITY fits in 24 bits
            #[allow(clippy::cast_possible_truncation)]
            let wire_offset = offset as u32;

            match self
                .session
                .nvm_write(wire_offset, &block)?
            {
                WriteStatus::Written => written += 1,
                WriteStatus::Unchanged => {
                    debug!("Block at {offset:#07x} unchanged");
                    unchanged += 1;
                },
                WriteStatus::Rejected(status) => {
                    return Err(Error::WriteRejected {
                        offset: wire_offset,
                        status,
                    });
                },
            }

            progress(Phase::Transfer, index + 1, total);
        }

        info!("Transfer done: {written} written, {unchanged} unchanged");
        Ok((written, unchanged))
    }

    fn validate(&mut self) -> Result<u16> {
        let check = self
            .session
            .nvm_is_valid_crc16()?;
        if check.is_valid() {
            info!("Image CRC {:#06x} valid", check.crc);
            return Ok(check.crc);
        }

        warn!(
            "Image CRC {:#06x} invalid (status {:#04x}), resetting controller",
            check.crc, check.status
        );
        if let Err(e) = self
            .session
            .soft_reset()
        {
            warn!("Soft reset after CRC failure failed: {e}");
        }
        Err(Error::CrcValidationFailed {
            status: check.status,
            crc: check.crc,
        })
    }

    fn commit(&mut self) -> Result<()> {
        let status = self
            .session
            .nvm_set_new_image(true)?;
        if status == 0 {
            info!("New image flag was already set");
        } else {
            debug!("New image flag set (status {status:#04x})");
        }
        Ok(())
    }

    /// Reset and wait for the first byte from the controller.
    fn reboot(&mut self) -> Result<bool> {
        self.session
            .soft_reset()?;

        let wait = self
            .config
            .reboot_wait;
        info!("Waiting up to {}s for the controller", wait.as_secs());
        let ready = self
            .session
            .link_mut()
            .wait_for_activity(wait)?;

        if ready {
            thread::sleep(REBOOT_SETTLE);
            self.session
                .link_mut()
                .purge()?;
        } else {
            warn!("No sign of life from the controller after {wait:?}");
        }
        Ok(ready)
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Result, Session, UpdateConfig, Updater, debug};
    use crate::port::{NativePort, SerialConfig};
    use crate::session::SessionConfig;

    impl Updater<NativePort> {
        /// Open a serial port and create an updater on it.
        pub fn open(
            serial: &SerialConfig,
            session: SessionConfig,
            update: UpdateConfig,
        ) -> Result<Self> {
            let port = NativePort::open(serial)?;
            debug!("Updater ready on {}", serial.port_name);
            Ok(Self::new(Session::new(port, session), update))
        }
    }
}
