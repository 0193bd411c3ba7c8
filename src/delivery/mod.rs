// src/delivery/mod.rs
//! Outbound report queue. Producers never block: `submit` applies the per-zone
//! rate limit and enqueues; a single worker drains to every sink in order.

pub mod chat;
pub mod log;
pub mod ratelimit;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use chat::ChatSink;
pub use log::{AppendLog, ConsoleSink};
pub use ratelimit::ZoneRateLimiter;

use crate::config::DeliveryConfig;

/// One queued outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub zone: String,
    pub text: String,
    pub attachment: Option<String>,
    pub queued_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, d: &Delivery) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Submission {
    Queued,
    RateLimited,
    /// Queue already shut down.
    Closed,
}

pub struct DeliveryQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    limiter: ZoneRateLimiter,
    pending: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(sinks: Vec<Arc<dyn ReportSink>>, min_zone_interval_secs: i64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(rx, sinks, Arc::clone(&pending)));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            limiter: ZoneRateLimiter::new(min_zone_interval_secs),
            pending,
        }
    }

    /// Log sink always, then chat and console per config.
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        let mut sinks: Vec<Arc<dyn ReportSink>> = vec![Arc::new(AppendLog::new(&cfg.log_path))];
        if cfg.chat.is_configured() {
            sinks.push(Arc::new(ChatSink::from_config(&cfg.chat)));
        } else {
            tracing::info!(target: "delivery", "chat not configured, reports go to log only");
        }
        if cfg.console {
            sinks.push(Arc::new(ConsoleSink));
        }
        Self::start(sinks, cfg.min_zone_interval_secs)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn submit(&self, zone: &str, text: &str, attachment: Option<String>, force: bool) -> Submission {
        self.submit_at(zone, text, attachment, force, Utc::now())
    }

    pub fn submit_at(
        &self,
        zone: &str,
        text: &str,
        attachment: Option<String>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Submission {
        match self.reserve_at(zone, force, now) {
            Submission::Queued => self.enqueue(zone, text, attachment, now),
            refused => refused,
        }
    }

    /// Claim the zone's send slot without queueing anything yet. `Queued`
    /// means the caller may build its report and `enqueue` it.
    pub fn reserve_at(&self, zone: &str, force: bool, now: DateTime<Utc>) -> Submission {
        if self.tx.lock().expect("delivery sender mutex poisoned").is_none() {
            return Submission::Closed;
        }
        if !self.limiter.try_acquire(zone, now, force) {
            counter!("delivery_rate_limited_total").increment(1);
            tracing::debug!(target: "delivery", zone, "rate limited");
            return Submission::RateLimited;
        }
        Submission::Queued
    }

    /// Queue a message whose zone slot was already reserved.
    pub fn enqueue(&self, zone: &str, text: &str, attachment: Option<String>, now: DateTime<Utc>) -> Submission {
        let tx = self.tx.lock().expect("delivery sender mutex poisoned");
        let Some(tx) = tx.as_ref() else {
            return Submission::Closed;
        };
        let d = Delivery {
            zone: zone.to_string(),
            text: text.to_string(),
            attachment,
            queued_at: now,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(d).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Submission::Closed;
        }
        Submission::Queued
    }

    /// Stop accepting work and wait up to `timeout` for the backlog to drain.
    /// Returns false if the worker had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        drop(self.tx.lock().expect("delivery sender mutex poisoned").take());
        let worker = self.worker.lock().expect("delivery worker mutex poisoned").take();
        let Some(mut worker) = worker else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(_) => {
                tracing::info!(target: "delivery", "delivery queue drained");
                true
            }
            Err(_) => {
                worker.abort();
                tracing::warn!(
                    target: "delivery",
                    dropped = self.pending(),
                    "delivery drain timed out"
                );
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    sinks: Vec<Arc<dyn ReportSink>>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(d) = rx.recv().await {
        for sink in &sinks {
            match sink.deliver(&d).await {
                Ok(()) => {
                    counter!("delivery_sent_total", "sink" => sink.name()).increment(1);
                }
                Err(e) => {
                    counter!("delivery_failed_total", "sink" => sink.name()).increment(1);
                    tracing::warn!(
                        target: "delivery",
                        sink = sink.name(),
                        zone = %d.zone,
                        error = %e,
                        "delivery failed"
                    );
                }
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}
