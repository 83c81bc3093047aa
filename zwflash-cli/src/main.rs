//! zwflash CLI - Over-the-wire firmware updates for Z-Wave controllers.
//!
//! ## Features
//!
//! - Probe a controller (version, SDK, library, node list, OTW support)
//! - Program an Intel HEX image into a 500 series controller
//! - Remove a node's lifeline association to quiet the network
//! - List serial ports
//! - Configuration file and environment variable support

use anyhow::Result;
use clap::Parser;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use zwflash::UpdateConfig;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::{Config, DEFAULT_PORT};

/// Exit code for runtime failures.
const EXIT_FAILURE: u8 = 1;
/// Exit code for argument misuse.
const EXIT_USAGE: u8 = 2;
/// Exit code when the serial port cannot be opened.
const EXIT_CHANNEL_UNAVAILABLE: u8 = 4;
/// Exit code when the controller cannot take an OTW update.
const EXIT_NOT_UPDATABLE: u8 = 5;

/// zwflash - Over-the-wire firmware updates for Z-Wave 500 series controllers.
///
/// With only a serial port, the controller is probed and described. With an
/// Intel HEX file, the file is programmed into the controller. File and port
/// may be given in either order.
///
/// Environment variables:
///   ZWFLASH_PORT   - Default serial port
///   ZWFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "zwflash")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:\n  zwflash /dev/ttyACM0\n  zwflash controller.hex /dev/ttyACM0\n  zwflash COM4 controller.hex")]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Intel HEX firmware file and/or serial port, in either order.
    #[arg(value_name = "FILE|PORT", num_args = 0..=2)]
    targets: Vec<String>,

    /// Serial port to use.
    #[arg(short, long, env = "ZWFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the SerialAPI.
    #[arg(short, long, env = "ZWFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Print probe results and port lists as JSON to stdout.
    #[arg(long)]
    json: bool,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Remove the lifeline association of NODE and exit.
    #[arg(long, value_name = "NODE", value_parser = clap::value_parser!(u8).range(1..=232))]
    remove_lifeline: Option<u8>,

    /// Leave the radio receiver on during the transfer.
    #[arg(long)]
    no_quiesce: bool,

    /// Seconds to wait for the controller after the final reset.
    #[arg(long, value_name = "SECS")]
    reboot_wait: Option<u64>,

    /// Pause between block writes in milliseconds.
    #[arg(long, value_name = "MS")]
    block_delay: Option<u64>,
}

/// CLI-level errors with their own exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Arguments that parse but do not make sense together.
    #[error("{0}")]
    Usage(String),
}

/// Positional arguments sorted into image and port.
#[derive(Debug, Default, PartialEq, Eq)]
struct Targets {
    image: Option<PathBuf>,
    port: Option<String>,
}

/// Whether a positional argument names a serial port rather than a file.
fn looks_like_port(arg: &str) -> bool {
    arg.contains("COM") || arg.contains("tty") || arg.starts_with("/dev/")
}

fn classify_targets(args: &[String]) -> Result<Targets, CliError> {
    if args.len() > 2 {
        return Err(CliError::Usage(format!(
            "expected at most a firmware file and a serial port, got {} arguments",
            args.len()
        )));
    }

    let mut targets = Targets::default();
    for arg in args {
        if looks_like_port(arg) {
            if targets
                .port
                .is_some()
            {
                return Err(CliError::Usage(format!(
                    "two serial ports given ('{arg}' is the second)"
                )));
            }
            targets.port = Some(arg.clone());
        } else {
            if targets
                .image
                .is_some()
            {
                return Err(CliError::Usage(format!(
                    "two firmware files given ('{arg}' is the second); file names must not contain 'COM' or 'tty'"
                )));
            }
            targets.image = Some(PathBuf::from(arg));
        }
    }
    Ok(targets)
}

/// Effective connection and update settings.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) port: String,
    pub(crate) baud: u32,
    pub(crate) update: UpdateConfig,
}

impl Settings {
    /// Combine positional arguments, flags, environment and config file.
    fn resolve(cli: &Cli, config: &Config, positional_port: Option<String>) -> Self {
        let port = positional_port
            .or_else(|| {
                cli.port
                    .clone()
            })
            .or_else(|| {
                config
                    .port
                    .serial
                    .clone()
            })
            .unwrap_or_else(|| DEFAULT_PORT.to_string());

        let baud = cli
            .baud
            .or(config
                .port
                .baud)
            .unwrap_or(zwflash::port::DEFAULT_BAUD);

        let mut update = config.update_config();
        if let Some(ms) = cli.block_delay {
            update = update.with_block_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = cli.reboot_wait {
            update = update.with_reboot_wait(Duration::from_secs(secs));
        }
        if cli.no_quiesce {
            update = update.with_quiesce_radio(false);
        }

        Self { port, baud, update }
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "zwflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.list_ports {
        return commands::ports::cmd_list_ports(cli.json);
    }

    let targets = classify_targets(&cli.targets)?;

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(cli, &config, targets.port);
    debug!("Settings: {settings:?}");

    if let Some(node) = cli.remove_lifeline {
        if targets
            .image
            .is_some()
        {
            return Err(CliError::Usage(
                "--remove-lifeline cannot be combined with a firmware file".into(),
            )
            .into());
        }
        return commands::lifeline::cmd_remove_lifeline(cli, &settings, node);
    }

    commands::update::cmd_update(
        cli,
        &settings,
        targets
            .image
            .as_deref(),
    )
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(CliError::Usage(_)) = err.downcast_ref::<CliError>() {
        return EXIT_USAGE;
    }
    match err.downcast_ref::<zwflash::Error>() {
        Some(zwflash::Error::ChannelUnavailable { .. }) => EXIT_CHANNEL_UNAVAILABLE,
        Some(zwflash::Error::NotUpdatable(_)) => EXIT_NOT_UPDATABLE,
        _ => EXIT_FAILURE,
    }
}
