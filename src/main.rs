//! PolyOverlay - live candle chart with prediction-market annotations

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polyoverlay::config::{AppConfig, LoggingConfig};
use polyoverlay::engine::{EngineDeps, OverlayEngine};
use polyoverlay::exchange::BinanceClient;
use polyoverlay::persistence::{CycleRecorder, SettingsStore};
use polyoverlay::polymarket::{OrderPlacer, PolymarketClient};
use polyoverlay::render::BroadcastSurface;

const RENDER_CHANNEL_CAPACITY: usize = 1024;

/// Initialize logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    info!("📈 PolyOverlay starting");
    info!("{}", config.digest());

    let candles = Arc::new(BinanceClient::new(&config.exchange)?);
    let polymarket = PolymarketClient::new(&config.polymarket)?;
    let orders = Arc::new(OrderPlacer::new(polymarket.clone(), &config.polymarket));

    let settings = match SettingsStore::open(&config.persistence.data_dir) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!(error = %e, "Settings unavailable, preferences will not persist");
            None
        }
    };
    let recorder = if config.persistence.csv_enabled {
        Some(CycleRecorder::new(&config.persistence.data_dir)?)
    } else {
        None
    };

    let surface = BroadcastSurface::new(RENDER_CHANNEL_CAPACITY, 1280, 720);
    #[cfg(feature = "dashboard")]
    let injector = surface.injector();

    let (engine, handle) = OverlayEngine::new(
        &config,
        EngineDeps {
            candles,
            market: Arc::new(polymarket),
            orders,
            surface,
            settings,
            recorder,
        },
    )?;

    #[cfg(feature = "dashboard")]
    {
        let state = polyoverlay::dashboard::DashboardState {
            engine: handle.clone(),
            surface: injector,
        };
        let bind_addr = config.dashboard.bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = polyoverlay::dashboard::start_server(state, &bind_addr).await {
                tracing::error!(error = %e, "Dashboard server failed");
            }
        });
    }

    let mut engine_task = tokio::spawn(engine.run());
    if !wait_for_exit(&mut engine_task, tokio::signal::ctrl_c()).await? {
        warn!("Overlay engine stopped");
        return Ok(());
    }
    info!("Ctrl-C received, shutting down");

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Engine already stopped");
    }
    engine_task.await.context("Engine task panicked")??;

    Ok(())
}

/// Wait for the shutdown signal or the engine ending first
///
/// `Ok(true)` means the signal fired and the engine is still running.
/// An engine that stops on its own yields `Ok(false)`, or its error.
async fn wait_for_exit<S>(engine_task: &mut JoinHandle<Result<()>>, signal: S) -> Result<bool>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        finished = engine_task => {
            finished.context("Engine task panicked")??;
            Ok(false)
        }
        received = signal => {
            received.context("Failed to listen for Ctrl-C")?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::future::pending;

    #[tokio::test]
    async fn test_engine_error_ends_wait_without_signal() {
        let mut task = tokio::spawn(async { Err::<(), _>(anyhow!("surface container missing")) });
        let err = wait_for_exit(&mut task, pending()).await.unwrap_err();
        assert!(err.to_string().contains("container missing"));
    }

    #[tokio::test]
    async fn test_clean_engine_exit_ends_wait() {
        let mut task = tokio::spawn(async { Ok::<(), anyhow::Error>(()) });
        assert!(!wait_for_exit(&mut task, pending()).await.unwrap());
    }

    #[tokio::test]
    async fn test_signal_leaves_engine_running() {
        let mut task = tokio::spawn(pending::<Result<()>>());
        assert!(wait_for_exit(&mut task, async { Ok(()) }).await.unwrap());
        assert!(!task.is_finished());
        task.abort();
    }
}
