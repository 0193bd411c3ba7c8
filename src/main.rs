//! Vessel fusion service binary entrypoint.
//! Loads config, starts the camera poller, the position feed and the delivery
//! worker, and serves the operator API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vessel_fusion::{
    api::{self, AppState},
    config::AppConfig,
    detect::NullDetector,
    feeds::{spawn_poller, FeedPoller, FrameStore, HttpFetcher},
    metrics::Metrics,
    position_feed::{spawn_position_poller, HttpPositionFeed},
};

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vessel_fusion=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load().context("loading configuration")?;
    let metrics = Metrics::init()?;

    let state = AppState::build(cfg.clone(), Arc::new(NullDetector));
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut poller = FeedPoller::new(
        Arc::clone(&state.registry),
        Arc::new(HttpFetcher::new()),
        &cfg.poller,
    )
    .with_handler(state.pipeline.clone());
    if let Some(dir) = cfg.poller.storage_path.as_deref().filter(|p| !p.is_empty()) {
        poller = poller.with_store(Arc::new(FrameStore::new(dir)));
    }
    let poller_task = spawn_poller(
        Arc::new(poller),
        Duration::from_millis(cfg.poller.tick_ms),
        stop_rx.clone(),
    );

    let position_task = match HttpPositionFeed::from_config(&cfg.positions) {
        Some(feed) => Some(spawn_position_poller(
            Arc::new(feed),
            Arc::clone(&state.pipeline),
            Duration::from_secs(cfg.positions.interval_secs),
            stop_rx.clone(),
        )),
        None => {
            tracing::info!("no position feed configured, camera stream only");
            None
        }
    };

    state.pipeline.announce(&state.generator.check_in(Utc::now()));

    let app = api::router(state.clone()).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    tracing::info!(
        bind = %cfg.server.bind,
        sources = state.registry.len(),
        callsign = state.generator.callsign(),
        "vessel fusion service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = ?e, "ctrl-c handler failed");
            }
        })
        .await
        .context("http server")?;

    tracing::info!("shutting down");
    let _ = stop_tx.send(true);
    let _ = poller_task.await;
    if let Some(t) = position_task {
        let _ = t.await;
    }

    state.pipeline.announce(&state.generator.check_out(Utc::now()));
    state
        .queue
        .shutdown(Duration::from_secs(cfg.delivery.shutdown_timeout_secs))
        .await;
    Ok(())
}
