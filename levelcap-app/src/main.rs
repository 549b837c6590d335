//! levelcap command-line entry point.
//!
//! ## Runtime note
//!
//! The capture session runs on its own OS thread inside `levelcap-core`.
//! The Tokio runtime here only forwards broadcast events to stdout, waits
//! for Ctrl-C, and joins the session via `spawn_blocking`.

mod cli;
mod settings;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use levelcap_core::{
    audio::device::{format_device_line, list_devices, list_input_devices},
    LevelEngine, LevelReport, SessionStatus, SessionSummary,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use cli::{CaptureArgs, Cli, Command};
use settings::{default_settings_path, load_settings, save_settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("levelcap=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);

    match cli.command {
        Command::Devices { all } => devices_command(all),
        Command::Config { save } => config_command(&settings_path, save),
        Command::Capture(args) => capture_command(&settings_path, &args).await,
    }
}

fn devices_command(all: bool) -> anyhow::Result<()> {
    let devices = if all {
        list_devices()
    } else {
        list_input_devices()
    };
    if devices.is_empty() {
        println!("no input devices found");
        return Ok(());
    }
    for (index, device) in devices.iter().enumerate() {
        println!("{}", format_device_line(index, device));
    }
    Ok(())
}

fn config_command(path: &Path, save: bool) -> anyhow::Result<()> {
    let settings = load_settings(path);
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if save {
        save_settings(path, &settings)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
    }
    Ok(())
}

async fn capture_command(settings_path: &Path, args: &CaptureArgs) -> anyhow::Result<()> {
    let mut settings = load_settings(settings_path);
    args.apply(&mut settings);
    // Flags get the same clamping as file values.
    settings.normalize();
    let json = settings.json_output;
    let source = args.source_spec(&settings);

    let engine = Arc::new(LevelEngine::new(settings.session.clone()));
    let mut reports = engine.subscribe_reports();
    let mut statuses = engine.subscribe_status();

    let sample_rate = engine
        .start(source)
        .context("failed to start capture session")?;
    info!(
        sample_rate,
        block_len = settings.session.block_len,
        duration_ms = settings.session.session_duration_ms,
        "capturing, press Ctrl-C to stop"
    );

    let interrupt = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            let _ = interrupt.stop();
        }
    });

    // Print reports until the session leaves the capturing state.
    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Ok(report) => print_report(&report, json),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "report output lagged"),
                Err(RecvError::Closed) => break,
            },
            status = statuses.recv() => match status {
                Ok(event)
                    if matches!(event.status, SessionStatus::Stopped | SessionStatus::Error) =>
                {
                    break
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    while let Ok(report) = reports.try_recv() {
        print_report(&report, json);
    }

    let waiter = Arc::clone(&engine);
    let summary = tokio::task::spawn_blocking(move || waiter.wait())
        .await
        .context("session join task failed")?
        .context("capture session failed")?;
    print_summary(&summary, json)?;
    Ok(())
}

fn print_report(report: &LevelReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to encode report: {e}"),
        }
    } else {
        println!("{report}");
    }
}

fn print_summary(summary: &SessionSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}
