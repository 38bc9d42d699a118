use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linkprobe::cli::Args;
use linkprobe::config::Config;
use linkprobe::export::{export_json, generate_report, record_lines};
use linkprobe::prefs::Prefs;
use linkprobe::state::{Location, ProbeContext, SessionSummary, SharedContext, asu_level};
use linkprobe::trace::SessionController;
use linkprobe::upload::{TcpUploader, Uploader};

/// How often the status line is logged while probing
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(args.verbose);

    let mut prefs = Prefs::load();
    let config = Config::from_args(&args, &prefs)?;
    let context = Arc::new(SharedContext::fixed(context_from_args(&args)));

    // Setup Ctrl+C handler
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let mut controller = SessionController::new(config.clone(), context);
    controller.start().context("Failed to start session")?;

    run_until_stopped(&controller, config.duration, &cancel).await;

    info!(drain = ?config.drain, "Stopping, waiting for late replies");
    let summary = controller.shutdown(config.drain).await?;

    if args.json {
        export_json(&summary, std::io::stdout())?;
        println!();
    }
    if args.report {
        generate_report(&summary, std::io::stdout())?;
    }

    if let Some(addr) = config.upload_addr {
        upload_summary(&summary, addr, config.connect_timeout).await;
    }

    // Save servers for next time (best effort, don't fail on save error)
    if prefs.remember(args.server.as_deref(), args.upload_server.as_deref())
        && let Err(e) = prefs.save()
    {
        warn!(error = %e, "Failed to save preferences");
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Context recorded with every probe, taken from the command line
fn context_from_args(args: &Args) -> ProbeContext {
    let location = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => {
            let mut location = Location::new(lat, lon);
            location.accuracy = args.accuracy;
            location.speed = args.speed;
            location.bearing = args.bearing;
            Some(location)
        }
        _ => None,
    };

    ProbeContext {
        location,
        network_type: args.network_type.clone(),
        downstream_kbps: args.down_kbps,
        upstream_kbps: args.up_kbps,
        gsm_asu: args.gsm_asu.and_then(asu_level),
        lte_asu: args.lte_asu.and_then(asu_level),
    }
}

/// Log status until the session limit elapses or Ctrl+C
async fn run_until_stopped(
    controller: &SessionController,
    limit: Option<Duration>,
    cancel: &CancellationToken,
) {
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    // First tick completes immediately
    status.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
            _ = status.tick() => {
                info!("{}", controller.status().status_text().replace('\n', " | "));
            }
        }
    }
}

/// Upload every record once; the outcome is reported and nothing is retried
async fn upload_summary(summary: &SessionSummary, addr: SocketAddr, connect_timeout: Duration) {
    if summary.records.is_empty() {
        info!("No records to upload");
        return;
    }

    let lines = record_lines(&summary.records);
    let uploader = TcpUploader::new(addr, connect_timeout);
    let task = tokio::spawn(async move { uploader.upload(&lines).await });

    match task.await {
        Ok(Ok(report)) => info!(
            records = report.records,
            bytes = report.bytes,
            "Measurements uploaded to {}",
            addr
        ),
        Ok(Err(e)) => warn!(error = %e, "Upload failed, measurements discarded"),
        Err(e) => warn!(error = %e, "Upload task failed"),
    }
}
