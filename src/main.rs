use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use setup_engine::api::installer_api::InstallerService;
use setup_engine::api::simple::{engine_version, init_tracing};
use setup_engine::config::{InstallerConfig, CONFIG_ENV};
use setup_engine::engine::events::{AttemptOutcome, InstallEvent};

const EXIT_CANCELLED: u8 = 130;

fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Ok(PathBuf::from(path)),
        None => bail!("usage: setup-engine <config.json> (or set {})", CONFIG_ENV),
    }
}

fn print_event(event: &InstallEvent) {
    match event {
        InstallEvent::Status(message) => println!("{}", message),
        InstallEvent::Progress { received, total } => match event.progress_fraction() {
            Some(fraction) => println!(
                "  {:>5.1}%  {} / {} bytes",
                fraction * 100.0,
                received,
                total.unwrap_or_default()
            ),
            None => println!("  {} bytes", received),
        },
        _ => {}
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let path = config_path()?;
    let config = InstallerConfig::from_file(&path)?;
    config.validate()?;
    info!("setup-engine {} using {}", engine_version(), path.display());

    let service = InstallerService::new(&config).context("failed to build installer service")?;
    if let Some(mut events) = service.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&event);
            }
        });
    }

    let mut attempt = service.start();
    let outcome = loop {
        tokio::select! {
            joined = &mut attempt => break joined.context("installer task panicked")??,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                if !service.cancel() {
                    warn!("installer already started; waiting for it to finish");
                }
            }
        }
    };

    Ok(match outcome {
        AttemptOutcome::Succeeded { version } => {
            info!("installed {}", version);
            ExitCode::SUCCESS
        }
        AttemptOutcome::Failed { message, .. } => {
            error!("installation failed: {}", message);
            ExitCode::FAILURE
        }
        AttemptOutcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
