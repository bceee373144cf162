//! Binary entry point: loads configuration, wires the DICOM SCP, completion
//! tracker and dashboard together behind one shutdown signal, and runs them
//! until Ctrl-C or SIGTERM (`spec.md` §5 "Cancellation & shutdown").
//!
//! CLI shape grounded in `examples/cplatt-iso-rust-dicom/src/receiver/main.rs`
//! (`clap::Parser`, `tracing_subscriber::fmt`), adapted to this repo's `snafu`
//! error style and YAML-file configuration rather than flag-only config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use snafu::{Report, ResultExt, Snafu};
use tracing::info;

use pixieveil::completion::CompletionTracker;
use pixieveil::config::Settings;
use pixieveil::dashboard::Dashboard;
use pixieveil::scp::ScpServer;
use pixieveil::storage::StorageManager;
use pixieveil::uploader::Uploader;

#[derive(Parser)]
#[command(name = "pixieveil")]
#[command(about = "Always-on DICOM ingestion, anonymisation and archival service")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("could not load configuration: {source}"))]
    Config { source: pixieveil::config::Error },
    #[snafu(display("DICOM SCP failed: {source}"))]
    Scp { source: std::io::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{}", Report::from_error(error));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context(ConfigSnafu)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("starting pixieveil");

    let storage = Arc::new(StorageManager::new(&settings));
    let uploader = Uploader::new(&settings.storage().remote_storage);
    let tracker = CompletionTracker::new(
        storage.clone(),
        uploader,
        Duration::from_secs(settings.study.completion_timeout),
        Duration::from_secs(settings.study.completion_check_interval),
    );
    let scp = ScpServer::new(storage.clone(), &settings.dicom_server);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let tracker_shutdown = shutdown_rx.clone();
    let tracker_handle = tokio::spawn(async move { tracker.run(tracker_shutdown).await });

    let dashboard_handle = settings.http_server.as_ref().map(|http| {
        let dashboard = Dashboard::new(storage.clone(), http.ip.clone(), http.port);
        let dashboard_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { dashboard.run(dashboard_shutdown).await })
    });

    let scp_shutdown = shutdown_rx.clone();
    let scp_handle = tokio::spawn(async move { scp.run(scp_shutdown).await });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = tracker_handle.await;
    if let Some(handle) = dashboard_handle {
        let _ = handle.await;
    }
    scp_handle.await.expect("SCP task panicked").context(ScpSnafu)?;

    info!("pixieveil stopped");
    Ok(())
}

/// Waits for Ctrl-C or, on Unix, SIGTERM — whichever comes first.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
