// src/feeds/poller.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::registry::{BackoffPolicy, FeedRegistry};
use super::storage::FrameStore;
use super::types::{FrameFetcher, FrameHandler, SourceSnapshot};
use crate::config::PollerConfig;

/// Outcome counts for a single tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub eligible: usize,
    pub fetched: usize,
    pub failed: usize,
    pub deferred: usize,
}

/// Fetches every eligible source once per tick with bounded parallelism.
/// Sources that cannot get a permit are deferred to the next tick.
pub struct FeedPoller {
    registry: Arc<FeedRegistry>,
    fetcher: Arc<dyn FrameFetcher>,
    handler: Option<Arc<dyn FrameHandler>>,
    store: Option<Arc<FrameStore>>,
    permits: Arc<Semaphore>,
    policy: BackoffPolicy,
    timeout: StdDuration,
}

impl FeedPoller {
    pub fn new(registry: Arc<FeedRegistry>, fetcher: Arc<dyn FrameFetcher>, cfg: &PollerConfig) -> Self {
        Self {
            registry,
            fetcher,
            handler: None,
            store: None,
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_fetches.max(1))),
            policy: BackoffPolicy::from_config(cfg),
            timeout: StdDuration::from_secs(cfg.request_timeout_secs.max(1)),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn FrameHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_store(mut self, store: Arc<FrameStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<FeedRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub async fn poll_once(&self) -> PollSummary {
        self.poll_once_at(Utc::now()).await
    }

    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> PollSummary {
        let eligible = self.registry.eligible_at(now, &self.policy);
        let mut summary = PollSummary {
            eligible: eligible.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for source in eligible {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    summary.deferred += 1;
                    counter!("feed_deferred_total").increment(1);
                    continue;
                }
            };
            self.registry.begin_poll(&source.id, now);

            let ctx = FetchCtx {
                registry: Arc::clone(&self.registry),
                fetcher: Arc::clone(&self.fetcher),
                handler: self.handler.clone(),
                store: self.store.clone(),
                timeout: self.timeout,
                threshold: self.policy.failure_threshold,
            };
            tasks.spawn(async move {
                let _permit = permit;
                ctx.run(source, now).await
            });
        }

        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => summary.fetched += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    tracing::error!(target: "feeds", error = %e, "fetch task aborted");
                    summary.failed += 1;
                }
            }
        }

        gauge!("feeds_online").set(self.registry.online_count() as f64);
        if summary.eligible > 0 {
            tracing::debug!(
                target: "feeds",
                eligible = summary.eligible,
                fetched = summary.fetched,
                failed = summary.failed,
                deferred = summary.deferred,
                "poll tick"
            );
        }
        summary
    }
}

struct FetchCtx {
    registry: Arc<FeedRegistry>,
    fetcher: Arc<dyn FrameFetcher>,
    handler: Option<Arc<dyn FrameHandler>>,
    store: Option<Arc<FrameStore>>,
    timeout: StdDuration,
    threshold: u32,
}

impl FetchCtx {
    /// One fetch; returns whether it succeeded.
    async fn run(self, source: SourceSnapshot, now: DateTime<Utc>) -> bool {
        counter!("feed_fetch_total", "source" => source.id.clone()).increment(1);

        let result = match tokio::time::timeout(self.timeout, self.fetcher.fetch(&source)).await {
            Ok(Ok(bytes)) if bytes.is_empty() => Err(anyhow::anyhow!("empty payload")),
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", self.timeout)),
        };

        match result {
            Ok(payload) => {
                self.on_success(&source, payload, now).await;
                true
            }
            Err(e) => {
                self.on_failure(&source, &e, now);
                false
            }
        }
    }

    async fn on_success(&self, source: &SourceSnapshot, payload: Bytes, now: DateTime<Utc>) {
        if source.consecutive_failures > self.threshold {
            tracing::info!(target: "feeds", source = %source.id, "source back online");
        }
        let Some(updated) = self.registry.mark_success(&source.id, payload.clone(), now) else {
            return;
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&source.id, &payload, now).await {
                tracing::warn!(target: "feeds", source = %source.id, error = %e, "frame save failed");
            }
        }

        // The handler may run a CPU-bound classifier; keep it off the runtime
        // workers so sibling fetches and their timeouts keep ticking.
        if let Some(handler) = self.handler.clone() {
            let id = source.id.clone();
            let res = tokio::task::spawn_blocking(move || handler.on_frame(&id, &payload, &updated)).await;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(target: "feeds", source = %source.id, error = %e, "frame handler failed");
                }
                Err(e) => {
                    tracing::error!(target: "feeds", source = %source.id, error = %e, "frame handler panicked");
                }
            }
        }
    }

    fn on_failure(&self, source: &SourceSnapshot, err: &anyhow::Error, now: DateTime<Utc>) {
        counter!("feed_fetch_errors_total", "source" => source.id.clone()).increment(1);
        let n = self.registry.mark_failure(&source.id, now, self.threshold);
        if n == 1 {
            tracing::warn!(target: "feeds", source = %source.id, error = %err, "fetch failed");
        } else if n == self.threshold + 1 {
            tracing::warn!(
                target: "feeds",
                source = %source.id,
                failures = n,
                error = %err,
                "source offline, backing off"
            );
        } else {
            tracing::debug!(target: "feeds", source = %source.id, failures = n, error = %err, "fetch failed");
        }
    }
}

/// Drive `poll_once` on a fixed tick until `shutdown` flips to true.
pub fn spawn_poller(
    poller: Arc<FeedPoller>,
    tick: StdDuration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            target: "feeds",
            sources = poller.registry().len(),
            tick_ms = tick.as_millis() as u64,
            "feed poller started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    poller.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(target: "feeds", "feed poller stopped");
    })
}
