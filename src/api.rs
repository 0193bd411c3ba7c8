use std::sync::{Arc, RwLock};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::{AppConfig, ConfigOverride};
use crate::deconfliction::{DeconflictionEngine, EngineStatus};
use crate::delivery::{DeliveryQueue, Submission};
use crate::detect::Detector;
use crate::feeds::{FeedRegistry, SourceStatus};
use crate::geo::Coord;
use crate::history::{HistoryEntry, ReportHistory};
use crate::pipeline::{FusionPipeline, ScanSummary};
use crate::report::{Confidence, ReportDraft, ReportGenerator};
use crate::zones::{Zone, ZoneIndex};

/// Shared handles, built once and cloned into every handler and task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub registry: Arc<FeedRegistry>,
    pub zones: Arc<ZoneIndex>,
    pub engine: Arc<DeconflictionEngine>,
    pub generator: Arc<ReportGenerator>,
    pub queue: Arc<DeliveryQueue>,
    pub history: Arc<ReportHistory>,
    pub pipeline: Arc<FusionPipeline>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every component from config. Spawns the delivery worker, so it
    /// must run inside a tokio runtime.
    pub fn build(cfg: AppConfig, detector: Arc<dyn Detector>) -> Self {
        let queue = Arc::new(DeliveryQueue::from_config(&cfg.delivery));
        Self::with_queue(cfg, detector, queue)
    }

    pub fn with_queue(cfg: AppConfig, detector: Arc<dyn Detector>, queue: Arc<DeliveryQueue>) -> Self {
        let registry = Arc::new(FeedRegistry::from_configs(&cfg.sources));
        let zones = Arc::new(ZoneIndex::new(Arc::clone(&registry), &cfg.zones));
        let engine = Arc::new(DeconflictionEngine::new(cfg.engine));
        let generator = Arc::new(ReportGenerator::new(cfg.delivery.callsign.clone()));
        let history = Arc::new(ReportHistory::with_capacity(cfg.delivery.recent_capacity));
        let pipeline = Arc::new(
            FusionPipeline::new(
                Arc::clone(&engine),
                Arc::clone(&zones),
                Arc::clone(&registry),
                Arc::clone(&generator),
                Arc::clone(&queue),
                Arc::clone(&history),
                detector,
            )
            .with_image_base_url(cfg.delivery.image_base_url.clone()),
        );

        Self {
            config: Arc::new(RwLock::new(cfg)),
            registry,
            zones,
            engine,
            generator,
            queue,
            history,
            pipeline,
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/status", get(status))
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/{id}/enabled", post(set_feed_enabled))
        .route("/api/zones", get(list_zones).post(bind_zone))
        .route("/api/zones/{code}", delete(unbind_zone))
        .route("/api/deconfliction/status", get(deconfliction_status))
        .route("/api/reports/recent", get(recent_reports))
        .route("/api/reports/manual", post(manual_report))
        .route("/api/reports/checkin", post(check_in))
        .route("/api/reports/checkout", post(check_out))
        .route("/api/detection/scan-all", post(scan_all))
        .route("/api/config", get(get_config).patch(patch_config))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Serialize)]
struct StatusResp {
    uptime_secs: i64,
    callsign: String,
    last_serial: u32,
    feeds_total: usize,
    feeds_online: usize,
    zones: usize,
    active_reports: usize,
    positions_cached: usize,
    queue_pending: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    Json(StatusResp {
        uptime_secs: Utc::now().signed_duration_since(state.started_at).num_seconds(),
        callsign: state.generator.callsign().to_string(),
        last_serial: state.generator.current_serial(),
        feeds_total: state.registry.len(),
        feeds_online: state.registry.online_count(),
        zones: state.zones.zones().len(),
        active_reports: state.engine.active_records().len(),
        positions_cached: state.engine.positions().len(),
        queue_pending: state.queue.pending(),
    })
}

async fn list_feeds(State(state): State<AppState>) -> Json<Vec<SourceStatus>> {
    Json(state.registry.status())
}

#[derive(Deserialize)]
struct EnabledReq {
    enabled: bool,
}

async fn set_feed_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<EnabledReq>,
) -> Result<Json<SourceStatus>, ApiError> {
    if !state.registry.set_enabled(&id, body.enabled) {
        return Err(ApiError::not_found(format!("unknown feed '{id}'")));
    }
    tracing::info!(target: "api", feed = %id, enabled = body.enabled, "feed toggled");
    let snap = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown feed '{id}'")))?;
    Ok(Json(SourceStatus::from(&snap)))
}

async fn list_zones(State(state): State<AppState>) -> Json<Vec<Zone>> {
    Json(state.zones.zones())
}

#[derive(Deserialize)]
struct BindZoneReq {
    code: String,
    #[serde(default)]
    polygon: Vec<Coord>,
    #[serde(default)]
    members: Vec<String>,
}

async fn bind_zone(
    State(state): State<AppState>,
    Json(body): Json<BindZoneReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let members = state
        .zones
        .bind_zone(&body.code, body.polygon, body.members)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "code": body.code.trim().to_ascii_uppercase(), "members": members })),
    ))
}

async fn unbind_zone(State(state): State<AppState>, Path(code): Path<String>) -> Result<StatusCode, ApiError> {
    if state.zones.unbind_zone(&code) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("unknown zone '{code}'")))
    }
}

async fn deconfliction_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_reports(State(state): State<AppState>, Query(q): Query<RecentQuery>) -> Json<Vec<HistoryEntry>> {
    Json(state.history.snapshot_last_n(q.limit.unwrap_or(50)))
}

#[derive(Deserialize)]
struct ManualReq {
    zone: String,
    #[serde(default = "one")]
    num_targets: u32,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    remarks: String,
}

fn one() -> u32 {
    1
}

#[derive(Serialize)]
struct ReportResp {
    report: String,
    serial: String,
    submission: Submission,
}

async fn manual_report(
    State(state): State<AppState>,
    Json(body): Json<ManualReq>,
) -> Result<Json<ReportResp>, ApiError> {
    let zone = body.zone.trim().to_ascii_uppercase();
    if zone.is_empty() {
        return Err(ApiError::bad_request("zone is required"));
    }
    let confidence = match body.confidence.as_deref() {
        None => Confidence::Possible,
        Some(s) => Confidence::parse(s).ok_or_else(|| ApiError::bad_request(format!("bad confidence '{s}'")))?,
    };
    let platform = body
        .platform
        .map(|p| p.trim().to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let (report, submission) = state.pipeline.submit_manual(ReportDraft {
        num_targets: body.num_targets,
        confidence,
        platform,
        zone,
        remarks: body.remarks.trim().to_uppercase(),
        vessel_name: None,
        timestamp: None,
    });
    Ok(Json(ReportResp {
        report: report.to_line(),
        serial: report.serial(),
        submission,
    }))
}

#[derive(Serialize)]
struct AnnounceResp {
    message: String,
    submission: Submission,
}

async fn check_in(State(state): State<AppState>) -> Json<AnnounceResp> {
    let message = state.generator.check_in(Utc::now());
    let submission = state.pipeline.announce(&message);
    Json(AnnounceResp { message, submission })
}

async fn check_out(State(state): State<AppState>) -> Json<AnnounceResp> {
    let message = state.generator.check_out(Utc::now());
    let submission = state.pipeline.announce(&message);
    Json(AnnounceResp { message, submission })
}

async fn scan_all(State(state): State<AppState>) -> Json<ScanSummary> {
    let pipeline = Arc::clone(&state.pipeline);
    let summary = tokio::task::spawn_blocking(move || pipeline.scan_all())
        .await
        .unwrap_or_else(|e| {
            tracing::error!(target: "api", error = %e, "scan task failed");
            ScanSummary::default()
        });
    Json(summary)
}

fn redacted(cfg: &AppConfig) -> AppConfig {
    let mut out = cfg.clone();
    if !out.delivery.chat.session.is_empty() {
        out.delivery.chat.session = "***".to_string();
    }
    out
}

async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    let cfg = state.config.read().expect("config rwlock poisoned");
    Json(redacted(&cfg))
}

/// Merge into the stored config. Running components keep the values they
/// were built with; the merged config applies from the next start.
async fn patch_config(
    State(state): State<AppState>,
    Json(ov): Json<ConfigOverride>,
) -> Json<serde_json::Value> {
    let mut cfg = state.config.write().expect("config rwlock poisoned");
    cfg.merge(ov);
    tracing::info!(target: "api", "config override applied");
    Json(json!({ "config": redacted(&cfg), "restart_required": true }))
}
