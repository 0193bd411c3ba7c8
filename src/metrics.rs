use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_all();
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty page.
    /// Lets routers be built in tests without fighting over the global slot.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Register help text for every series once.
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Source fetch attempts");
        describe_counter!("feed_fetch_errors_total", "Source fetch failures (error, timeout, non-200)");
        describe_counter!("feed_deferred_total", "Eligible sources deferred for lack of a fetch permit");
        describe_gauge!("feeds_online", "Enabled sources currently considered online");
        describe_counter!("fusion_emitted_total", "Reports queued for delivery");
        describe_counter!("fusion_suppressed_total", "Observations suppressed as duplicates");
        describe_counter!("fusion_correlated_total", "Records upgraded by a second source kind");
        describe_counter!("delivery_sent_total", "Successful sink deliveries");
        describe_counter!("delivery_failed_total", "Failed sink deliveries");
        describe_counter!("delivery_rate_limited_total", "Reports refused by the per-zone rate limit");
    });
}
