//! # Deconfliction Engine
//! Decides whether an observation becomes a new report, a suppressed repeat,
//! or a cross-source confirmation of something already reported.
//!
//! State is one record per `(zone, vessel key)`. A camera detection that lands
//! near a freshly-tracked vessel is re-keyed to that vessel's name first, so
//! both streams meet on the same key. Expiry is lazy: a record simply stops
//! suppressing once its timestamp falls outside the window.
//!
//! Every public operation has an `_at` variant taking the clock explicitly.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::geo::Coord;
use crate::positions::{PositionCache, VesselPosition};
use crate::report::Confidence;

/// Which stream produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Position feed: identity is known.
    Authoritative,
    /// Camera + classifier: identity is provisional.
    Inferred,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Authoritative => "authoritative",
            SourceKind::Inferred => "inferred",
        }
    }
}

/// State kept per `(zone, vessel key)` after a report went out.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub zone: String,
    pub vessel_key: String,
    pub source_kind: SourceKind,
    pub platform: String,
    pub confidence: Confidence,
    pub timestamp: DateTime<Utc>,
    pub serial: String,
    pub vessel_name: Option<String>,
    pub source_id: Option<String>,
    pub coord: Option<Coord>,
    pub correlated: bool,
}

/// Arguments to [`DeconflictionEngine::record`].
#[derive(Debug, Clone)]
pub struct RecordInput {
    pub zone: String,
    pub vessel_key: String,
    pub source_kind: SourceKind,
    pub platform: String,
    pub confidence: Confidence,
    pub serial: String,
    pub vessel_name: Option<String>,
    pub source_id: Option<String>,
    pub coord: Option<Coord>,
}

/// Outcome of [`DeconflictionEngine::should_report`].
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub emit: bool,
    /// Key the caller must use for `record` (correlated name if fused).
    pub resolved_key: String,
    /// Authoritative name matched by proximity, if any.
    pub correlated_name: Option<String>,
    /// `Some(Confirmed)` when this call upgraded an existing record.
    pub upgraded: Option<Confidence>,
}

/// Read-only view for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRecord {
    pub zone: String,
    pub vessel_key: String,
    pub source_kind: SourceKind,
    pub platform: String,
    pub confidence: Confidence,
    pub age_secs: i64,
    pub correlated: bool,
    pub vessel_name: Option<String>,
    pub serial: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub suppress_window_secs: i64,
    pub correlation_radius_nm: f64,
    pub active_reports: Vec<ActiveRecord>,
    pub positions_cached: usize,
    pub total_records: usize,
}

type RecordKey = (String, String);

#[derive(Debug)]
pub struct DeconflictionEngine {
    cfg: EngineConfig,
    records: Mutex<HashMap<RecordKey, ReportRecord>>,
    positions: PositionCache,
}

impl DeconflictionEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            positions: PositionCache::new(cfg.position_staleness_secs),
            records: Mutex::new(HashMap::new()),
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn positions(&self) -> &PositionCache {
        &self.positions
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.cfg.suppress_window_secs)
    }

    pub fn update_positions(&self, vessels: &[VesselPosition]) {
        self.update_positions_at(vessels, Utc::now());
    }

    pub fn update_positions_at(&self, vessels: &[VesselPosition], now: DateTime<Utc>) {
        self.positions.update_at(vessels, now);
        debug!(target: "deconfliction", count = vessels.len(), "position cache refreshed");
    }

    /// Name of the closest fresh tracked vessel within the correlation radius.
    pub fn correlate(&self, coord: Coord) -> Option<String> {
        self.correlate_at(coord, Utc::now())
    }

    pub fn correlate_at(&self, coord: Coord, now: DateTime<Utc>) -> Option<String> {
        self.positions
            .nearest_within(coord, self.cfg.correlation_radius_nm, now)
            .map(|(name, _)| name)
    }

    pub fn should_report(
        &self,
        zone: &str,
        vessel_key: &str,
        source_kind: SourceKind,
        coord: Option<Coord>,
    ) -> Verdict {
        self.should_report_at(zone, vessel_key, source_kind, coord, Utc::now())
    }

    pub fn should_report_at(
        &self,
        zone: &str,
        vessel_key: &str,
        source_kind: SourceKind,
        coord: Option<Coord>,
        now: DateTime<Utc>,
    ) -> Verdict {
        let correlated_name = match (source_kind, coord) {
            (SourceKind::Inferred, Some(c)) => self.correlate_at(c, now),
            _ => None,
        };
        let resolved_key = correlated_name
            .clone()
            .unwrap_or_else(|| vessel_key.to_string());

        // Lookup and upgrade under one guard so the two streams can't race.
        let mut records = self.records.lock().expect("deconfliction mutex poisoned");
        let key = (zone.to_string(), resolved_key.clone());

        if let Some(existing) = records.get_mut(&key) {
            let elapsed = now.signed_duration_since(existing.timestamp);
            if elapsed < self.window() {
                if existing.source_kind != source_kind && !existing.correlated {
                    existing.correlated = true;
                    existing.confidence = Confidence::Confirmed;
                    counter!("fusion_correlated_total").increment(1);
                    info!(
                        target: "deconfliction",
                        zone,
                        vessel = %resolved_key,
                        first = existing.source_kind.as_str(),
                        second = source_kind.as_str(),
                        "correlated -> CONFIRMED"
                    );
                    return Verdict {
                        emit: false,
                        resolved_key,
                        correlated_name,
                        upgraded: Some(Confidence::Confirmed),
                    };
                }

                counter!("fusion_suppressed_total").increment(1);
                debug!(
                    target: "deconfliction",
                    zone,
                    vessel = %resolved_key,
                    elapsed_secs = elapsed.num_seconds(),
                    window_secs = self.cfg.suppress_window_secs,
                    "suppressed duplicate"
                );
                return Verdict {
                    emit: false,
                    resolved_key,
                    correlated_name,
                    upgraded: None,
                };
            }
        }

        Verdict {
            emit: true,
            resolved_key,
            correlated_name,
            upgraded: None,
        }
    }

    /// Store (or overwrite) the record for a report that was just sent.
    pub fn record(&self, input: RecordInput) {
        self.record_at(input, Utc::now());
    }

    pub fn record_at(&self, input: RecordInput, now: DateTime<Utc>) {
        let mut records = self.records.lock().expect("deconfliction mutex poisoned");
        let key = (input.zone.clone(), input.vessel_key.clone());
        records.insert(
            key,
            ReportRecord {
                zone: input.zone,
                vessel_key: input.vessel_key,
                source_kind: input.source_kind,
                platform: input.platform,
                confidence: input.confidence,
                timestamp: now,
                serial: input.serial,
                vessel_name: input.vessel_name,
                source_id: input.source_id,
                coord: input.coord,
                correlated: false,
            },
        );
        self.prune(&mut records, now);
    }

    fn prune(&self, records: &mut HashMap<RecordKey, ReportRecord>, now: DateTime<Utc>) {
        let max_age = self.window() * 3;
        records.retain(|_, r| now.signed_duration_since(r.timestamp) <= max_age);

        let cap = self.cfg.max_records;
        if records.len() > cap {
            let mut by_age: Vec<(DateTime<Utc>, RecordKey)> = records
                .iter()
                .map(|(k, r)| (r.timestamp, k.clone()))
                .collect();
            by_age.sort_by(|a, b| a.0.cmp(&b.0));
            let excess = records.len() - cap;
            for (_, k) in by_age.into_iter().take(excess) {
                records.remove(&k);
            }
        }
    }

    /// Records still inside the suppress window.
    pub fn active_records(&self) -> Vec<ActiveRecord> {
        self.active_records_at(Utc::now())
    }

    pub fn active_records_at(&self, now: DateTime<Utc>) -> Vec<ActiveRecord> {
        let records = self.records.lock().expect("deconfliction mutex poisoned");
        let mut out: Vec<ActiveRecord> = records
            .values()
            .filter(|r| now.signed_duration_since(r.timestamp) < self.window())
            .map(|r| ActiveRecord {
                zone: r.zone.clone(),
                vessel_key: r.vessel_key.clone(),
                source_kind: r.source_kind,
                platform: r.platform.clone(),
                confidence: r.confidence,
                age_secs: now.signed_duration_since(r.timestamp).num_seconds(),
                correlated: r.correlated,
                vessel_name: r.vessel_name.clone(),
                serial: r.serial.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.age_secs.cmp(&b.age_secs));
        out
    }

    pub fn total_records(&self) -> usize {
        self.records.lock().expect("deconfliction mutex poisoned").len()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            suppress_window_secs: self.cfg.suppress_window_secs,
            correlation_radius_nm: self.cfg.correlation_radius_nm,
            active_reports: self.active_records(),
            positions_cached: self.positions.len(),
            total_records: self.total_records(),
        }
    }
}
