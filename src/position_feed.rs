// src/position_feed.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PositionFeedConfig;
use crate::pipeline::FusionPipeline;
use crate::positions::VesselPosition;

/// Authoritative vessel positions.
#[async_trait::async_trait]
pub trait PositionFeed: Send + Sync {
    async fn get_positions(&self) -> Result<Vec<VesselPosition>>;
    fn name(&self) -> &'static str;
}

/// GETs a JSON array of [`VesselPosition`].
#[derive(Clone)]
pub struct HttpPositionFeed {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpPositionFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(cfg: &PositionFeedConfig) -> Option<Self> {
        let url = cfg.url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self::new(url).with_timeout(cfg.timeout_secs))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }
}

#[async_trait::async_trait]
impl PositionFeed for HttpPositionFeed {
    async fn get_positions(&self) -> Result<Vec<VesselPosition>> {
        let rsp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?;
        if !rsp.status().is_success() {
            return Err(anyhow!("position feed HTTP {}", rsp.status()));
        }
        rsp.json::<Vec<VesselPosition>>()
            .await
            .context("decoding vessel positions")
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Poll `feed` every `interval` and push each batch through the pipeline.
/// Errors are logged and the loop keeps going.
pub fn spawn_position_poller(
    feed: Arc<dyn PositionFeed>,
    pipeline: Arc<FusionPipeline>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(target: "pipeline", feed = feed.name(), "position feed started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match feed.get_positions().await {
                        Ok(vessels) => {
                            let emitted = pipeline.handle_positions(&vessels);
                            tracing::debug!(
                                target: "pipeline",
                                vessels = vessels.len(),
                                emitted = emitted.len(),
                                "position batch"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(target: "pipeline", error = ?e, "position feed fetch failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(target: "pipeline", "position feed stopped");
    })
}
