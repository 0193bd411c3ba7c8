// tests/fusion_scenarios.rs
//
// End-to-end behaviour of the fusion path without sockets: a mock sink
// stands in for chat, positions and detections are injected directly.
//
// Covered:
// - Tokitae/CLINTON: position report, then a correlated camera hit is
//   suppressed and upgrades the record; exactly one delivery.
// - Correlation radius (1.9 nm in, 2.1 nm out) and position staleness.
// - Suppression expiry re-emits.
// - Capacity eviction is oldest-first.
// - Rate-limited reports leave no suppression record and burn no serial.
// - The position poller loop feeds the pipeline until stopped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::watch;

use vessel_fusion::api::AppState;
use vessel_fusion::config::{AppConfig, EngineConfig, SourceConfig};
use vessel_fusion::deconfliction::{DeconflictionEngine, RecordInput, SourceKind};
use vessel_fusion::delivery::{Delivery, DeliveryQueue, ReportSink};
use vessel_fusion::detect::{Detection, NullDetector};
use vessel_fusion::geo::{haversine_nm, Coord};
use vessel_fusion::position_feed::{spawn_position_poller, PositionFeed};
use vessel_fusion::positions::VesselPosition;
use vessel_fusion::report::{parse_report, Confidence};

const DEG_PER_NM: f64 = 180.0 / (std::f64::consts::PI * 3440.065);

#[derive(Default)]
struct CollectSink {
    seen: Mutex<Vec<Delivery>>,
}

#[async_trait]
impl ReportSink for CollectSink {
    async fn deliver(&self, d: &Delivery) -> Result<()> {
        self.seen.lock().unwrap().push(d.clone());
        Ok(())
    }
    fn name(&self) -> &'static str {
        "collect"
    }
}

struct FixedFeed(Vec<VesselPosition>);

#[async_trait]
impl PositionFeed for FixedFeed {
    async fn get_positions(&self) -> Result<Vec<VesselPosition>> {
        Ok(self.0.clone())
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn clinton_cam() -> SourceConfig {
    SourceConfig {
        id: "clinton_dock".into(),
        name: "Clinton Terminal".into(),
        url: "http://cams.test/clinton.jpg".into(),
        lat: 47.9750,
        lon: -122.3493,
        refresh_secs: 30,
        zone: None,
        enabled: true,
    }
}

fn tokitae(lat: f64, lon: f64) -> VesselPosition {
    VesselPosition {
        vessel_id: 36,
        name: "Tokitae".into(),
        lat,
        lon,
        speed: 10.7,
        heading: 320.0,
        in_service: true,
        at_dock: false,
        departing_terminal: Some("Mukilteo".into()),
        arriving_terminal: Some("Clinton".into()),
        vessel_class: Some("Olympic".into()),
    }
}

fn boat(confidence: f32) -> Detection {
    Detection {
        bbox: [10.0, 20.0, 200.0, 120.0],
        class_label: "Olympic".into(),
        confidence,
        vessel_name: None,
        direction: Some("inbound".into()),
    }
}

fn clinton_box() -> Vec<Coord> {
    vec![
        Coord::new(47.95, -122.38),
        Coord::new(47.95, -122.32),
        Coord::new(48.00, -122.32),
        Coord::new(48.00, -122.38),
    ]
}

fn setup() -> (AppState, Arc<CollectSink>) {
    let sink = Arc::new(CollectSink::default());
    let queue = Arc::new(DeliveryQueue::start(vec![sink.clone() as Arc<dyn ReportSink>], 30));
    let cfg = AppConfig {
        sources: vec![clinton_cam()],
        ..Default::default()
    };
    let state = AppState::with_queue(cfg, Arc::new(NullDetector), queue);
    state
        .zones
        .bind_zone("CLINTON", clinton_box(), vec!["clinton_dock".into()])
        .unwrap();
    (state, sink)
}

#[tokio::test]
async fn tokitae_in_clinton_is_reported_once_and_confirmed() {
    let (state, sink) = setup();

    let vessel = tokitae(47.9745, -122.3500);
    let cam = state.registry.get("clinton_dock").unwrap();
    assert!(haversine_nm(vessel.coord(), cam.coord) < 0.06);

    let emitted = state.pipeline.handle_positions_at(&[vessel], t0());
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].zone, "CLINTON");
    assert_eq!(emitted[0].platform, "ORCA");
    assert_eq!(emitted[0].confidence, Confidence::Confirmed);
    assert!(emitted[0].remarks.starts_with("VES TOKITAE MUKILTEO TO CLINTON"));

    let t20 = t0() + ChronoDuration::seconds(20);
    let again = state
        .pipeline
        .handle_detections_at(&cam, &[boat(0.82)], None, t20);
    assert!(again.is_empty(), "camera hit must not produce a second report");

    let active = state.engine.active_records_at(t20);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].vessel_key, "Tokitae");
    assert!(active[0].correlated);
    assert_eq!(active[0].confidence, Confidence::Confirmed);

    assert!(state.queue.shutdown(Duration::from_secs(2)).await);
    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].text.contains("//CLINTON//"));
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn uncorrelated_camera_hit_reports_under_visual_key() {
    let (state, sink) = setup();
    let cam = state.registry.get("clinton_dock").unwrap();

    let out = state
        .pipeline
        .handle_detections_at(&cam, &[boat(0.91), boat(0.95)], Some("http://img/x.jpg".into()), t0());
    assert_eq!(out.len(), 1, "one report per source per window");
    assert_eq!(out[0].confidence, Confidence::Confirmed);
    assert_eq!(out[0].platform, "ORCA");

    let active = state.engine.active_records_at(t0());
    assert_eq!(active[0].vessel_key, "VISUAL_clinton_dock");
    assert_eq!(active[0].source_kind, SourceKind::Inferred);

    state.queue.shutdown(Duration::from_secs(2)).await;
    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen[0].attachment.as_deref(), Some("http://img/x.jpg"));
}

#[tokio::test]
async fn docked_and_out_of_service_vessels_are_ignored() {
    let (state, _sink) = setup();
    let mut docked = tokitae(47.9745, -122.3500);
    docked.at_dock = true;
    let mut idle = tokitae(47.9745, -122.3500);
    idle.name = "Samish".into();
    idle.in_service = false;
    let mut unset = tokitae(0.0, 0.0);
    unset.name = "Chimacum".into();

    assert!(state
        .pipeline
        .handle_positions_at(&[docked, idle, unset], t0())
        .is_empty());
    // the cache still learns every vessel
    assert_eq!(state.engine.positions().len(), 3);
}

#[tokio::test]
async fn rate_limited_report_leaves_no_record() {
    let (state, _sink) = setup();
    let first = tokitae(47.9745, -122.3500);
    let mut second = tokitae(47.9900, -122.3600);
    second.name = "Suquamish".into();

    let out = state.pipeline.handle_positions_at(&[first, second], t0());
    assert_eq!(out.len(), 1, "same zone inside 30s is rate limited");

    let keys: Vec<_> = state
        .engine
        .active_records_at(t0())
        .into_iter()
        .map(|r| r.vessel_key)
        .collect();
    assert_eq!(keys, vec!["Tokitae".to_string()]);

    // once the zone interval passes, the limited vessel gets its report
    let mut later = tokitae(47.9900, -122.3600);
    later.name = "Suquamish".into();
    let out = state
        .pipeline
        .handle_positions_at(&[later], t0() + ChronoDuration::seconds(31));
    assert_eq!(out.len(), 1);
}

#[tokio::test]
async fn delivered_serials_stay_contiguous_across_rate_limit() {
    let (state, sink) = setup();
    let first = tokitae(47.9745, -122.3500);
    let mut second = tokitae(47.9900, -122.3600);
    second.name = "Suquamish".into();

    state.pipeline.handle_positions_at(&[first, second.clone()], t0());
    assert_eq!(state.generator.current_serial(), 1);
    state
        .pipeline
        .handle_positions_at(&[second], t0() + ChronoDuration::seconds(31));
    assert_eq!(state.generator.current_serial(), 2);

    assert!(state.queue.shutdown(Duration::from_secs(2)).await);
    let delivered: Vec<(String, String)> = sink
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|d| {
            let p = parse_report(&d.text).expect("report line");
            (p.serial, p.remarks)
        })
        .collect();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].0, "I001");
    assert!(delivered[0].1.starts_with("VES TOKITAE"));
    assert_eq!(delivered[1].0, "I002");
    assert!(delivered[1].1.starts_with("VES SUQUAMISH"));
}

#[tokio::test]
async fn position_poller_feeds_pipeline_until_stopped() {
    let (state, sink) = setup();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = spawn_position_poller(
        Arc::new(FixedFeed(vec![tokitae(47.9745, -122.3500)])),
        Arc::clone(&state.pipeline),
        Duration::from_secs(3600),
        stop_rx,
    );

    // first interval tick fires immediately
    for _ in 0..100 {
        if !state.history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop_tx.send(true).unwrap();
    task.await.unwrap();

    assert_eq!(state.history.len(), 1);
    assert!(state.engine.positions().get("Tokitae").is_some());
    assert!(state.queue.shutdown(Duration::from_secs(2)).await);
    assert_eq!(sink.seen.lock().unwrap().len(), 1);
}

fn engine() -> DeconflictionEngine {
    DeconflictionEngine::new(EngineConfig::default())
}

fn record(eng: &DeconflictionEngine, key: &str, kind: SourceKind, at: DateTime<Utc>) {
    eng.record_at(
        RecordInput {
            zone: "CLINTON".into(),
            vessel_key: key.into(),
            source_kind: kind,
            platform: "ORCA".into(),
            confidence: Confidence::Probable,
            serial: "I001".into(),
            vessel_name: None,
            source_id: None,
            coord: None,
        },
        at,
    );
}

#[test]
fn correlation_radius_is_two_nautical_miles() {
    let eng = engine();
    let cam = Coord::new(47.97, -122.35);
    eng.update_positions_at(&[tokitae(47.97 + 1.9 * DEG_PER_NM, -122.35)], t0());
    assert_eq!(eng.correlate_at(cam, t0()).as_deref(), Some("Tokitae"));

    let eng = engine();
    eng.update_positions_at(&[tokitae(47.97 + 2.1 * DEG_PER_NM, -122.35)], t0());
    assert_eq!(eng.correlate_at(cam, t0()), None);
}

#[test]
fn stale_positions_do_not_correlate() {
    let eng = engine();
    let cam = Coord::new(47.97, -122.35);
    eng.update_positions_at(&[tokitae(47.9701, -122.35)], t0());

    assert!(eng.correlate_at(cam, t0() + ChronoDuration::seconds(60)).is_some());
    assert!(eng.correlate_at(cam, t0() + ChronoDuration::seconds(61)).is_none());

    // the camera hit then stays under its own key
    let v = eng.should_report_at(
        "CLINTON",
        "VISUAL_clinton_dock",
        SourceKind::Inferred,
        Some(cam),
        t0() + ChronoDuration::seconds(90),
    );
    assert!(v.emit);
    assert_eq!(v.resolved_key, "VISUAL_clinton_dock");
    assert_eq!(v.correlated_name, None);
}

#[test]
fn expired_record_reemits() {
    let eng = engine();
    record(&eng, "Tokitae", SourceKind::Authoritative, t0());
    let v = eng.should_report_at(
        "CLINTON",
        "Tokitae",
        SourceKind::Authoritative,
        None,
        t0() + ChronoDuration::seconds(121),
    );
    assert!(v.emit);
}

#[test]
fn capacity_evicts_oldest_first() {
    let eng = DeconflictionEngine::new(EngineConfig {
        max_records: 3,
        ..EngineConfig::default()
    });
    for i in 0..5 {
        record(&eng, &format!("v{i}"), SourceKind::Authoritative, t0() + ChronoDuration::seconds(i));
    }
    assert_eq!(eng.total_records(), 3);
    let now = t0() + ChronoDuration::seconds(5);
    let mut keys: Vec<_> = eng.active_records_at(now).into_iter().map(|r| r.vessel_key).collect();
    keys.sort();
    assert_eq!(keys, vec!["v2", "v3", "v4"]);
}
