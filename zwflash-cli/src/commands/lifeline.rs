//! Lifeline association removal.

use anyhow::{Context, Result};
use console::style;
use zwflash::{NativePort, SerialConfig, Session, SessionConfig};

use crate::{Cli, Settings};

/// Remove-lifeline command implementation.
///
/// Keeps a chatty node from reporting to the controller while the radio is
/// being tested or updated.
pub(crate) fn cmd_remove_lifeline(cli: &Cli, settings: &Settings, node: u8) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            settings.port,
            settings.baud
        );
    }

    let port = NativePort::open(&SerialConfig::new(&settings.port, settings.baud))?;
    let mut session = Session::new(port, SessionConfig::default());

    session
        .remove_lifeline(node)
        .with_context(|| format!("Failed to remove the lifeline of node {node}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Lifeline removed from node {node}",
            style("✓").green()
        );
    }
    Ok(())
}
