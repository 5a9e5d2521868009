//! ambicast: capture the screen, blend UI over video, stream RGB to a sink.
//!
//! ```text
//! ambicast --config /var/lib/ambicast/config.json --address 192.168.1.20 --start
//! ```
//!
//! After start-up the process reads control requests from stdin, one JSON
//! object per line (see [`ambicast_service::control`]), and writes one reply
//! per line to stdout. Ctrl-C shuts down cleanly.

use ambicast_core::Settings;
use ambicast_service::{cli::Args, handle_line, Service};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level())),
        )
        .with_target(true)
        .init();

    info!("ambicast v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings after command-line overrides")?;

    let autostart = settings.autostart || args.start;
    let mut service = Service::new(settings, Some(args.config.clone())).await;
    if autostart {
        if let Err(e) = service.start().await {
            error!("Autostart failed: {e}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = handle_line(&mut service, &line).await;
                    stdout.write_all(format!("{reply}\n").as_bytes()).await?;
                    stdout.flush().await?;
                }
                Ok(None) => {
                    info!("Control input closed; running until interrupted");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Control input failed: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
