//! # Fusion pipeline
//! Glue between the two observation streams and the delivery queue:
//! - position batches: cache refresh, then one report per underway vessel;
//! - camera frames: classifier, zone lookup, then one report per detection.
//!
//! Both paths ask the engine first, then claim the zone's send slot, and only
//! then number the report. A rate-limited observation consumes no serial and
//! leaves no suppression state behind.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::deconfliction::{DeconflictionEngine, RecordInput, SourceKind};
use crate::delivery::{DeliveryQueue, Submission};
use crate::detect::{Detection, Detector};
use crate::feeds::storage::frame_relpath;
use crate::feeds::{FeedRegistry, FrameHandler, SourceSnapshot};
use crate::history::ReportHistory;
use crate::positions::VesselPosition;
use crate::report::{
    platform_for_class, platform_for_vessel, Confidence, Report, ReportDraft, ReportGenerator,
};
use crate::zones::{ZoneIndex, ZoneQuery};

/// Zone key for station messages (check-in/out); never rate limited.
pub const STATION_ZONE: &str = "_STATION";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub detections: usize,
    pub reports: Vec<String>,
}

pub struct FusionPipeline {
    engine: Arc<DeconflictionEngine>,
    zones: Arc<ZoneIndex>,
    registry: Arc<FeedRegistry>,
    generator: Arc<ReportGenerator>,
    queue: Arc<DeliveryQueue>,
    history: Arc<ReportHistory>,
    detector: Arc<dyn Detector>,
    image_base_url: Option<String>,
}

impl FusionPipeline {
    pub fn new(
        engine: Arc<DeconflictionEngine>,
        zones: Arc<ZoneIndex>,
        registry: Arc<FeedRegistry>,
        generator: Arc<ReportGenerator>,
        queue: Arc<DeliveryQueue>,
        history: Arc<ReportHistory>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        Self {
            engine,
            zones,
            registry,
            generator,
            queue,
            history,
            detector,
            image_base_url: None,
        }
    }

    /// Attach `<base>/<frame path>` links to camera reports.
    pub fn with_image_base_url(mut self, base: Option<String>) -> Self {
        self.image_base_url = base.map(|b| b.trim_end_matches('/').to_string());
        self
    }

    pub fn handle_positions(&self, vessels: &[VesselPosition]) -> Vec<Report> {
        self.handle_positions_at(vessels, Utc::now())
    }

    pub fn handle_positions_at(&self, vessels: &[VesselPosition], now: DateTime<Utc>) -> Vec<Report> {
        self.engine.update_positions_at(vessels, now);

        let mut emitted = Vec::new();
        for v in vessels {
            let coord = v.coord();
            if !v.in_service || v.at_dock || coord.is_unset() {
                continue;
            }
            let Some(zone) = self.zones.assign_zone(&ZoneQuery::for_vessel(v)) else {
                continue;
            };
            let verdict =
                self.engine
                    .should_report_at(&zone, &v.name, SourceKind::Authoritative, Some(coord), now);
            if !verdict.emit || !self.reserve(&zone, now) {
                continue;
            }

            let platform = platform_for_vessel(&v.name)
                .map(str::to_string)
                .unwrap_or_else(|| platform_for_class(v.vessel_class.as_deref().unwrap_or("")));
            let report = self.generator.create(ReportDraft {
                num_targets: 1,
                confidence: Confidence::Confirmed,
                platform,
                zone: zone.clone(),
                remarks: vessel_remarks(v),
                vessel_name: Some(v.name.clone()),
                timestamp: Some(now),
            });

            if self.dispatch(&report, None, now) != Submission::Queued {
                continue;
            }
            self.engine.record_at(
                RecordInput {
                    zone,
                    vessel_key: verdict.resolved_key,
                    source_kind: SourceKind::Authoritative,
                    platform: report.platform.clone(),
                    confidence: report.confidence,
                    serial: report.serial(),
                    vessel_name: Some(v.name.clone()),
                    source_id: None,
                    coord: Some(coord),
                },
                now,
            );
            self.history.push(&report, Some(SourceKind::Authoritative), None);
            counter!("fusion_emitted_total", "source_kind" => "authoritative").increment(1);
            emitted.push(report);
        }
        emitted
    }

    /// Run the deconfliction gate for each detection in turn. All detections
    /// from one source share the `VISUAL_<id>` key, so at most one reports per window.
    pub fn handle_detections_at(
        &self,
        source: &SourceSnapshot,
        detections: &[Detection],
        attachment: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Report> {
        if detections.is_empty() {
            return Vec::new();
        }
        let Some(zone) = self.zones.assign_zone(&ZoneQuery::for_source(source)) else {
            tracing::debug!(target: "pipeline", source = %source.id, "no zone for source, skipping");
            return Vec::new();
        };
        let coord = (!source.coord.is_unset()).then_some(source.coord);
        let key = format!("VISUAL_{}", source.id);

        let mut emitted = Vec::new();
        for det in detections {
            let verdict = self
                .engine
                .should_report_at(&zone, &key, SourceKind::Inferred, coord, now);
            if !verdict.emit || !self.reserve(&zone, now) {
                continue;
            }

            let mut det = det.clone();
            if let Some(name) = &verdict.correlated_name {
                det.vessel_name = Some(name.clone());
            }
            let report = self.generator.from_detection(&det, &zone, now);

            if self.dispatch(&report, attachment.clone(), now) != Submission::Queued {
                continue;
            }
            self.engine.record_at(
                RecordInput {
                    zone: zone.clone(),
                    vessel_key: verdict.resolved_key,
                    source_kind: SourceKind::Inferred,
                    platform: report.platform.clone(),
                    confidence: report.confidence,
                    serial: report.serial(),
                    vessel_name: verdict.correlated_name,
                    source_id: Some(source.id.clone()),
                    coord,
                },
                now,
            );
            self.history.push(&report, Some(SourceKind::Inferred), Some(&source.id));
            counter!("fusion_emitted_total", "source_kind" => "inferred").increment(1);
            emitted.push(report);
        }
        emitted
    }

    /// Classify every enabled source's latest payload now.
    pub fn scan_all(&self) -> ScanSummary {
        self.scan_all_at(Utc::now())
    }

    pub fn scan_all_at(&self, now: DateTime<Utc>) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for source in self.registry.snapshot().into_iter().filter(|s| s.enabled) {
            let Some((payload, at)) = self.registry.latest_payload(&source.id) else {
                continue;
            };
            summary.scanned += 1;
            let detections = match self.detector.detect(&payload) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(target: "pipeline", source = %source.id, error = %e, "detector failed");
                    continue;
                }
            };
            summary.detections += detections.len();
            let attachment = self.attachment_for(&source.id, at);
            for r in self.handle_detections_at(&source, &detections, attachment, now) {
                summary.reports.push(r.to_line());
            }
        }
        summary
    }

    /// Operator report: bypasses deconfliction and the zone rate limit.
    pub fn submit_manual(&self, draft: ReportDraft) -> (Report, Submission) {
        let report = self.generator.create(draft);
        let line = report.to_line();
        let sub = self.queue.submit_at(&report.zone, &line, None, true, report.timestamp);
        self.log_submission(&report.zone, &line, sub);
        if sub == Submission::Queued {
            self.history.push(&report, None, None);
        }
        (report, sub)
    }

    pub fn announce(&self, text: &str) -> Submission {
        self.queue.submit(STATION_ZONE, text, None, true)
    }

    fn attachment_for(&self, source_id: &str, at: DateTime<Utc>) -> Option<String> {
        self.image_base_url
            .as_ref()
            .map(|base| format!("{base}/{}", frame_relpath(source_id, at)))
    }

    /// Claim the zone slot before a report is built, so refused reports
    /// never consume a serial number.
    fn reserve(&self, zone: &str, now: DateTime<Utc>) -> bool {
        match self.queue.reserve_at(zone, false, now) {
            Submission::Queued => true,
            sub => {
                self.log_submission(zone, "", sub);
                false
            }
        }
    }

    fn dispatch(&self, report: &Report, attachment: Option<String>, now: DateTime<Utc>) -> Submission {
        let line = report.to_line();
        let sub = self.queue.enqueue(&report.zone, &line, attachment, now);
        self.log_submission(&report.zone, &line, sub);
        sub
    }

    fn log_submission(&self, zone: &str, line: &str, sub: Submission) {
        match sub {
            Submission::Queued => {
                tracing::info!(target: "pipeline", zone, report = %line, "report queued")
            }
            Submission::RateLimited => {
                tracing::debug!(target: "pipeline", zone, "report rate limited")
            }
            Submission::Closed => {
                tracing::warn!(target: "pipeline", zone, "delivery queue closed, report dropped")
            }
        }
    }
}

impl FrameHandler for FusionPipeline {
    fn on_frame(&self, source_id: &str, payload: &Bytes, source: &SourceSnapshot) -> Result<()> {
        let detections = self.detector.detect(payload)?;
        if detections.is_empty() {
            return Ok(());
        }
        let now = source.last_payload_at.unwrap_or_else(Utc::now);
        let attachment = self.attachment_for(source_id, now);
        self.handle_detections_at(source, &detections, attachment, now);
        Ok(())
    }
}

/// `VES <NAME> <DEP> TO <ARR> <speed>KTS`, skipping the leg when unknown
/// and the speed when zero.
fn vessel_remarks(v: &VesselPosition) -> String {
    let mut parts = vec![format!("VES {}", v.name.to_uppercase())];
    if let (Some(dep), Some(arr)) = (v.departing_terminal.as_deref(), v.arriving_terminal.as_deref()) {
        parts.push(format!("{} TO {}", dep.to_uppercase(), arr.to_uppercase()));
    }
    if v.speed != 0.0 {
        parts.push(format!("{:.1}KTS", v.speed));
    }
    parts.join(" ")
}
