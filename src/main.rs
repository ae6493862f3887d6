//! pose-overlay: live camera pose-landmark overlay
//!
//! Runs as a long-lived process that:
//! - Toggles camera capture on request, entering fullscreen alongside it
//! - Runs a pose landmarker on each displayed frame and draws the first
//!   detected pose over the video
//! - Serves an IPC socket for toggling, status queries and snapshots
//!
//! Invoked with a command argument it acts as a client of that socket
//! instead.

mod config;
mod controller;
mod engine;
mod events;
mod ipc;
mod lifecycle;
mod platform;
mod render;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::controller::{Controller, FrameClock};
use crate::engine::{AssetCache, DefaultEngineLoader};
use crate::events::OverlayEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::platform::{HeadlessPresentation, Presentation};
use crate::render::SoftwarePainter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for client replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let request = ipc::parse_command(&args)?;
        return ipc::send(&config.socket_path, request).await;
    }

    run_overlay(config).await
}

async fn run_overlay(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "pose-overlay starting");

    config.ensure_dirs()?;
    info!(?config.socket_path, model = %config.engine.model, "configuration loaded");

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Control surface and presentation -> controller
    let (control_tx, mut control_rx) = mpsc::channel(32);
    // Controller -> subscribed IPC clients
    let (event_tx, _) = broadcast::channel::<OverlayEvent>(64);

    let presentation: Arc<dyn Presentation> =
        Arc::new(HeadlessPresentation::new(control_tx.clone()));
    let media = platform::default_media_devices(&config.capture);

    let mut controller = Controller::new(
        media,
        Arc::clone(&presentation),
        Box::new(SoftwarePainter),
        config.capture.constraints,
        config.render.style.clone(),
        event_tx.clone(),
    );

    // Engine loads in the background; capture works before it is ready
    let loader = DefaultEngineLoader::new(AssetCache::new(config.model_cache_dir.clone()));
    controller.start_engine(Arc::new(loader), config.landmarker_options());

    let server = Server::new(&config.socket_path, control_tx, presentation, event_tx)?;
    let clock = FrameClock::new(config.render.refresh_hz);

    info!("overlay initialized, entering main loop");

    tokio::select! {
        _ = controller.run(&mut control_rx, clock) => {
            info!("controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    controller.unmount().await;
    server.shutdown().await;

    info!("pose-overlay stopped");

    Ok(())
}
