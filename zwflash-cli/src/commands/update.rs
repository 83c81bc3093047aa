//! Probe and firmware update command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use zwflash::{
    DeviceInfo, FirmwareImage, Phase, SerialConfig, SessionConfig, UpdateOutcome, UpdateReport,
    Updater,
};

use crate::{Cli, Settings, use_fancy_output};

/// Probe the controller, and program `image` into it if given.
pub(crate) fn cmd_update(cli: &Cli, settings: &Settings, image: Option<&Path>) -> Result<()> {
    let firmware = match image {
        Some(path) => {
            if !cli.quiet {
                eprintln!(
                    "{} Loading firmware {}",
                    style("📦").cyan(),
                    path.display()
                );
            }
            let firmware = FirmwareImage::from_hex_file(path)
                .with_context(|| format!("Failed to load firmware image {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {} bytes programmed, {} blocks to write",
                    style("ℹ").blue(),
                    firmware.programmed_bytes(),
                    firmware
                        .blocks()
                        .count()
                );
            }
            Some(firmware)
        },
        None => None,
    };

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            settings.port,
            settings.baud
        );
    }

    let serial = SerialConfig::new(&settings.port, settings.baud);
    let mut updater = Updater::open(&serial, SessionConfig::default(), settings.update.clone())?;

    // Create progress bar
    let pb = if cli.quiet || cli.json || firmware.is_none() || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let mut current_phase = None;
    let outcome = updater.run(firmware.as_ref(), |phase: Phase, done: usize, total: usize| {
        if current_phase != Some(phase) {
            current_phase = Some(phase);
            pb.set_message(phase.to_string());
        }
        if phase == Phase::Transfer && total > 0 {
            pb.set_position((done * 100 / total) as u64);
        }
    });

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            pb.abandon();
            return Err(e.into());
        },
    };

    let mut stdout = std::io::stdout().lock();
    match outcome {
        UpdateOutcome::Probed(info) => {
            if cli.json {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                write_device_info(&mut stdout, &info)?;
            }
            if let Some(reason) = info.not_updatable_reason() {
                if !cli.quiet {
                    eprintln!("{} {reason}", style("⚠").yellow());
                }
            }
        },
        UpdateOutcome::Updated(report) => {
            pb.finish_with_message("Complete");
            print_summary(cli, &report);
            write_updated(&mut stdout, &report, cli.json)?;
        },
    }

    Ok(())
}

/// Human-readable controller description.
fn write_device_info(out: &mut impl Write, info: &DeviceInfo) -> std::io::Result<()> {
    let caps = &info.capabilities;
    let version = &info.version;

    writeln!(
        out,
        "SerialAPI Ver={}.{}",
        caps.api_version, caps.api_revision
    )?;
    writeln!(out, "Mfg={:04X}", caps.manufacturer_id)?;
    writeln!(
        out,
        "ProdType/ProdID={:04X}:{:04X}",
        caps.product_type, caps.product_id
    )?;
    writeln!(
        out,
        "{} {}",
        version.version,
        version
            .sdk_release()
            .unwrap_or("(unknown SDK)")
    )?;
    writeln!(out, "Library={}", version.library)?;

    let nodes: Vec<String> = info
        .node_ids
        .iter()
        .map(ToString::to_string)
        .collect();
    writeln!(out, "NodeIDs={}", nodes.join(","))?;
    writeln!(
        out,
        "OTW={}",
        if info.otw_capable {
            "supported"
        } else {
            "unsupported"
        }
    )
}

/// Controller as it runs after the update, so the new image can be checked.
fn write_updated(out: &mut impl Write, report: &UpdateReport, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
    } else {
        write_device_info(out, &report.after)?;
    }
    Ok(())
}

fn print_summary(cli: &Cli, report: &UpdateReport) {
    if cli.quiet {
        return;
    }

    eprintln!(
        "{} {} blocks written, {} unchanged",
        style("✓").green(),
        report.blocks_written,
        report.blocks_unchanged
    );
    eprintln!("{} CRC {:#06X} valid", style("✓").green(), report.crc);
    if !report.device_signalled_ready {
        eprintln!(
            "{} Controller did not announce itself after the reset",
            style("⚠").yellow()
        );
    }
    eprintln!(
        "\n{} Updated {} -> {}",
        style("🎉").green().bold(),
        report
            .before
            .version
            .version,
        report
            .after
            .version
            .version
    );
}
