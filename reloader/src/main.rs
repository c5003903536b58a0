mod cli;
mod config;
mod controller;
mod event;
mod git;
mod notifier;
mod paths;
mod probe;
mod snapshot;
mod supervisor;
mod ticker;
mod watch;

use std::time::Instant;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::controller::Controller;
use crate::event::ReloaderEvent;

#[tokio::main]
async fn main() {
    init_logging();
    let cli = cli::Cli::parse();

    // ── Repository ────────────────────────────────────────────────────────────
    let cwd = std::env::current_dir().unwrap_or_else(|e| fatal(e.into()));
    let source = git::GitStatus::discover(&cwd)
        .await
        .unwrap_or_else(|e| fatal(e));
    let root = source.root().to_path_buf();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match &cli.config {
        Some(path) if !path.exists() => fatal(anyhow::anyhow!(
            "Config file not found: {}",
            path.display()
        )),
        Some(path) => path.clone(),
        None => paths::config_file_path(&root),
    };
    let settings = config::load_or_default(&config_path)
        .and_then(|file| config::Settings::resolve(&cli, file))
        .unwrap_or_else(|e| fatal(e));

    // ── Components ────────────────────────────────────────────────────────────
    let notifier = notifier::Notifier::new(settings.webhook.clone(), settings.on_ready.clone())
        .unwrap_or_else(|e| fatal(e));
    let process =
        supervisor::ProcessSupervisor::new(settings.command.clone(), settings.ready_pattern.clone());
    let mut controller = Controller::new(
        settings.controller(),
        source,
        process,
        probe::PortProbe,
        notifier,
        Instant::now(),
    );

    let (event_tx, mut event_rx) = mpsc::channel::<ReloaderEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(ticker::run(
        controller::tick_interval(settings.poll_interval),
        event_tx.clone(),
    ));
    if settings.fs_events {
        tokio::spawn(watch::watch_tree(root.clone(), event_tx.clone()));
    }
    tokio::spawn(wait_for_shutdown(event_tx.clone()));

    info!(
        root = %root.display(),
        command = %settings.command,
        "command-reloader v{} started",
        env!("CARGO_PKG_VERSION")
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            ReloaderEvent::Tick => controller.tick(Instant::now()).await,
            ReloaderEvent::FilesTouched => controller.request_snapshot(),
            ReloaderEvent::Shutdown => {
                info!("Exiting...");
                controller.shutdown().await;
                break;
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Startup failures are the only fatal errors: print the chain and exit 1.
fn fatal(err: anyhow::Error) -> ! {
    eprintln!("Error: {err:#}");
    std::process::exit(1);
}

/// Sends `Shutdown` on Ctrl+C, or on SIGTERM where that exists.
async fn wait_for_shutdown(tx: mpsc::Sender<ReloaderEvent>) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for Ctrl+C: {e}");
                return;
            }
        }
        _ = terminate => {}
    }
    let _ = tx.send(ReloaderEvent::Shutdown).await;
}
