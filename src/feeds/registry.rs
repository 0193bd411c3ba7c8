// src/feeds/registry.rs
//! Named sources with their runtime health. The poller is the only writer of
//! health fields; zone binding goes through `set_zone`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use super::types::{SourceSnapshot, SourceStatus};
use crate::config::{PollerConfig, SourceConfig};
use crate::geo::Coord;

#[derive(Debug, Clone)]
struct Source {
    id: String,
    name: String,
    url: String,
    coord: Coord,
    refresh: Duration,
    zone: Option<String>,
    enabled: bool,

    last_poll: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    online: bool,
    last_payload: Option<Bytes>,
    last_payload_at: Option<DateTime<Utc>>,
}

impl Source {
    fn from_config(c: &SourceConfig) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            url: c.url.clone(),
            coord: c.coord(),
            refresh: Duration::seconds(c.refresh_secs.max(0)),
            zone: c.zone.clone(),
            enabled: c.enabled,
            last_poll: None,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            online: true,
            last_payload: None,
            last_payload_at: None,
        }
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            coord: self.coord,
            refresh_secs: self.refresh.num_seconds(),
            zone: self.zone.clone(),
            enabled: self.enabled,
            online: self.online,
            consecutive_failures: self.consecutive_failures,
            last_poll: self.last_poll,
            last_success: self.last_success,
            last_failure: self.last_failure,
            last_payload_at: self.last_payload_at,
        }
    }
}

/// Failure backoff: plain refresh cadence up to `failure_threshold`
/// consecutive failures, then `base * 2^(n - threshold)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub failure_threshold: u32,
    pub base: Duration,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &PollerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            base: Duration::seconds(cfg.base_backoff_secs),
        }
    }

    /// Extra wait after `failures` consecutive errors; `None` below the threshold.
    pub fn backoff(&self, failures: u32) -> Option<Duration> {
        if failures <= self.failure_threshold {
            return None;
        }
        let exp = (failures - self.failure_threshold).min(20);
        let secs = self.base.num_seconds().saturating_mul(1i64 << exp);
        Some(Duration::seconds(secs))
    }

    fn is_eligible(&self, s: &Source, now: DateTime<Utc>) -> bool {
        if !s.enabled {
            return false;
        }
        if let Some(last) = s.last_poll {
            if now.signed_duration_since(last) < s.refresh {
                return false;
            }
        }
        if let (Some(wait), Some(failed_at)) = (self.backoff(s.consecutive_failures), s.last_failure) {
            if now.signed_duration_since(failed_at) < wait {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct FeedRegistry {
    sources: RwLock<BTreeMap<String, Source>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[SourceConfig]) -> Self {
        let reg = Self::new();
        for c in configs {
            reg.upsert(c);
        }
        reg
    }

    /// Add a source, or replace its descriptor while keeping runtime health.
    pub fn upsert(&self, c: &SourceConfig) {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        let fresh = Source::from_config(c);
        match map.get_mut(&c.id) {
            Some(existing) => {
                existing.name = fresh.name;
                existing.url = fresh.url;
                existing.coord = fresh.coord;
                existing.refresh = fresh.refresh;
                existing.enabled = fresh.enabled;
                if fresh.zone.is_some() {
                    existing.zone = fresh.zone;
                }
            }
            None => {
                map.insert(c.id.clone(), fresh);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sources.read().expect("registry rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<SourceSnapshot> {
        let map = self.sources.read().expect("registry rwlock poisoned");
        map.get(id).map(Source::snapshot)
    }

    pub fn snapshot(&self) -> Vec<SourceSnapshot> {
        let map = self.sources.read().expect("registry rwlock poisoned");
        map.values().map(Source::snapshot).collect()
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        self.snapshot().iter().map(SourceStatus::from).collect()
    }

    pub fn online_count(&self) -> usize {
        let map = self.sources.read().expect("registry rwlock poisoned");
        map.values().filter(|s| s.enabled && s.online).count()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        match map.get_mut(id) {
            Some(s) => {
                s.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Set or clear the explicit zone binding. Returns false for unknown ids.
    pub fn set_zone(&self, id: &str, zone: Option<String>) -> bool {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        match map.get_mut(id) {
            Some(s) => {
                s.zone = zone;
                true
            }
            None => false,
        }
    }

    /// Clear the binding only if it still names `code`.
    pub fn clear_zone_if(&self, id: &str, code: &str) {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        if let Some(s) = map.get_mut(id) {
            if s.zone.as_deref() == Some(code) {
                s.zone = None;
            }
        }
    }

    pub fn sources_in_zone(&self, code: &str) -> Vec<SourceSnapshot> {
        let map = self.sources.read().expect("registry rwlock poisoned");
        map.values()
            .filter(|s| s.zone.as_deref() == Some(code))
            .map(Source::snapshot)
            .collect()
    }

    pub fn latest_payload(&self, id: &str) -> Option<(Bytes, DateTime<Utc>)> {
        let map = self.sources.read().expect("registry rwlock poisoned");
        let s = map.get(id)?;
        Some((s.last_payload.clone()?, s.last_payload_at?))
    }

    /// Sources due for a fetch at `now`, in id order.
    pub fn eligible_at(&self, now: DateTime<Utc>, policy: &BackoffPolicy) -> Vec<SourceSnapshot> {
        let map = self.sources.read().expect("registry rwlock poisoned");
        map.values()
            .filter(|s| policy.is_eligible(s, now))
            .map(Source::snapshot)
            .collect()
    }

    pub(crate) fn begin_poll(&self, id: &str, now: DateTime<Utc>) {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        if let Some(s) = map.get_mut(id) {
            s.last_poll = Some(now);
        }
    }

    pub(crate) fn mark_success(&self, id: &str, payload: Bytes, now: DateTime<Utc>) -> Option<SourceSnapshot> {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        let s = map.get_mut(id)?;
        s.consecutive_failures = 0;
        s.online = true;
        s.last_success = Some(now);
        s.last_payload = Some(payload);
        s.last_payload_at = Some(now);
        Some(s.snapshot())
    }

    /// Count a failure; returns the new consecutive count.
    pub(crate) fn mark_failure(&self, id: &str, now: DateTime<Utc>, threshold: u32) -> u32 {
        let mut map = self.sources.write().expect("registry rwlock poisoned");
        let Some(s) = map.get_mut(id) else {
            return 0;
        };
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        s.last_failure = Some(now);
        if s.consecutive_failures > threshold {
            s.online = false;
        }
        s.consecutive_failures
    }
}
