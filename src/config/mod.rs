// src/config/mod.rs
//! Typed service configuration.
//!
//! Loaded from TOML (JSON accepted as a fallback), every field defaulted so a
//! missing file still boots. `validate()` resets out-of-range values and
//! `merge()` applies an enumerated partial update (the `PATCH /api/config`
//! body and env overrides both go through it).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geo::Coord;

pub const DEFAULT_CONFIG_PATH: &str = "config/fusion.toml";
pub const ENV_CONFIG_PATH: &str = "FUSION_CONFIG_PATH";
pub const ENV_BIND: &str = "FUSION_BIND";
pub const ENV_CHAT_SESSION: &str = "CHAT_SESSION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub poller: PollerConfig,
    pub positions: PositionFeedConfig,
    pub delivery: DeliveryConfig,
    pub zones: ZonesConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Deconfliction engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub suppress_window_secs: i64,
    pub correlation_radius_nm: f64,
    pub max_records: usize,
    pub position_staleness_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            suppress_window_secs: 120,
            correlation_radius_nm: 2.0,
            max_records: 500,
            position_staleness_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub tick_ms: u64,
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub base_backoff_secs: i64,
    pub storage_path: Option<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            max_concurrent_fetches: 10,
            request_timeout_secs: 15,
            failure_threshold: 5,
            base_backoff_secs: 60,
            storage_path: Some("./captures".to_string()),
        }
    }
}

/// Authoritative position feed. No `url` means the feed loop is not started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionFeedConfig {
    pub url: Option<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PositionFeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            interval_secs: 5,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub callsign: String,
    pub min_zone_interval_secs: i64,
    pub log_path: String,
    pub console: bool,
    pub shutdown_timeout_secs: u64,
    pub image_base_url: Option<String>,
    pub recent_capacity: usize,
    pub chat: ChatConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            callsign: "PR01".to_string(),
            min_zone_interval_secs: 30,
            log_path: "reports/tacreps.log".to_string(),
            console: true,
            shutdown_timeout_secs: 5,
            image_base_url: None,
            recent_capacity: 200,
            chat: ChatConfig::default(),
        }
    }
}

/// Upper bound on chat post attempts per report.
pub const MAX_CHAT_RETRIES: u8 = 8;

/// Chat room transport. Empty `session` or `room` disables the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server_url: String,
    /// Literal cookie value, or "ENV" to read `CHAT_SESSION`.
    pub session: String,
    pub room: String,
    pub nickname: String,
    pub domain: String,
    pub classification: String,
    pub timeout_secs: u64,
    pub max_retries: u8,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            session: String::new(),
            room: String::new(),
            nickname: "OSINT_Bot".to_string(),
            domain: "chatsurferxmppunclass".to_string(),
            classification: "UNCLASSIFIED//FOUO".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl ChatConfig {
    pub fn is_configured(&self) -> bool {
        !self.server_url.is_empty() && !self.session.is_empty() && !self.room.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonesConfig {
    /// Last-resort zone. `None` leaves unmatched observations unassigned.
    pub default_zone: Option<String>,
    /// Name fragments (terminal names, camera names) mapped to zone codes,
    /// tried in order.
    pub names: Vec<NameRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameRule {
    #[serde(rename = "match")]
    pub pattern: String,
    pub zone: String,
}

impl NameRule {
    fn new(pattern: &str, zone: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            zone: zone.to_string(),
        }
    }
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            default_zone: Some("PUGETSOUND".to_string()),
            names: default_terminal_names(),
        }
    }
}

/// Built-in ferry terminal → zone seed.
pub fn default_terminal_names() -> Vec<NameRule> {
    [
        ("Seattle", "SEATTLE"),
        ("Bainbridge Island", "BAINBRIDGE"),
        ("Bremerton", "BREMERTON"),
        ("Edmonds", "EDMONDS"),
        ("Kingston", "KINGSTON"),
        ("Mukilteo", "MUKILTEO"),
        ("Clinton", "CLINTON"),
        ("Fauntleroy", "FAUNTLEROY"),
        ("Vashon Island", "VASHON"),
        ("Southworth", "SOUTHWORTH"),
        ("Point Defiance", "PTDEFIANCE"),
        ("Tahlequah", "TAHLEQUAH"),
        ("Anacortes", "ANACORTES"),
        ("Friday Harbor", "FRIDAYHARBOR"),
        ("Orcas Island", "ORCAS"),
        ("Lopez Island", "LOPEZ"),
        ("Shaw Island", "SHAW"),
        ("Port Townsend", "PTTOWNSEND"),
        ("Coupeville", "COUPEVILLE"),
    ]
    .into_iter()
    .map(|(p, z)| NameRule::new(p, z))
    .collect()
}

/// One camera-like polled endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: i64,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_refresh_secs() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn coord(&self) -> Coord {
        Coord::new(self.lat, self.lon)
    }
}

/// Enumerated partial update. `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverride {
    pub bind: Option<String>,
    pub suppress_window_secs: Option<i64>,
    pub correlation_radius_nm: Option<f64>,
    pub max_records: Option<usize>,
    pub max_concurrent_fetches: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub callsign: Option<String>,
    pub min_zone_interval_secs: Option<i64>,
    pub console: Option<bool>,
    pub default_zone: Option<String>,
    pub chat_room: Option<String>,
    pub chat_session: Option<String>,
}

impl AppConfig {
    /// Resolve the config path (`$FUSION_CONFIG_PATH`, else `config/fusion.toml`)
    /// and load it. A missing default file yields defaults; a missing explicit
    /// path is an error.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Self::load_from(&pb)?
                } else {
                    tracing::info!(path = %pb.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        if let Ok(bind) = std::env::var(ENV_BIND) {
            cfg.merge(ConfigOverride {
                bind: Some(bind),
                ..Default::default()
            });
        }
        cfg.resolve_secrets()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = Self::parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate();
        Ok(cfg)
    }

    fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        if hint_ext == "json" {
            return Ok(serde_json::from_str(s)?);
        }
        match toml::from_str::<Self>(s) {
            Ok(cfg) => Ok(cfg),
            Err(toml_err) => serde_json::from_str(s)
                .map_err(|_| anyhow!("unsupported config format: {toml_err}")),
        }
    }

    /// Reset nonsensical values to their defaults instead of failing startup.
    pub fn validate(&mut self) {
        let eng = EngineConfig::default();
        if self.engine.suppress_window_secs <= 0 {
            self.engine.suppress_window_secs = eng.suppress_window_secs;
        }
        if !self.engine.correlation_radius_nm.is_finite() || self.engine.correlation_radius_nm < 0.0 {
            self.engine.correlation_radius_nm = eng.correlation_radius_nm;
        }
        if self.engine.max_records == 0 {
            self.engine.max_records = eng.max_records;
        }
        if self.engine.position_staleness_secs <= 0 {
            self.engine.position_staleness_secs = eng.position_staleness_secs;
        }

        let pol = PollerConfig::default();
        if self.poller.tick_ms == 0 {
            self.poller.tick_ms = pol.tick_ms;
        }
        if self.poller.max_concurrent_fetches == 0 {
            self.poller.max_concurrent_fetches = pol.max_concurrent_fetches;
        }
        if self.poller.request_timeout_secs == 0 {
            self.poller.request_timeout_secs = pol.request_timeout_secs;
        }
        if self.poller.base_backoff_secs < 0 {
            self.poller.base_backoff_secs = pol.base_backoff_secs;
        }

        if self.positions.interval_secs == 0 {
            self.positions.interval_secs = PositionFeedConfig::default().interval_secs;
        }
        self.delivery.min_zone_interval_secs = self.delivery.min_zone_interval_secs.max(0);
        if self.delivery.callsign.trim().is_empty() {
            self.delivery.callsign = DeliveryConfig::default().callsign;
        }
        if !(1..=MAX_CHAT_RETRIES).contains(&self.delivery.chat.max_retries) {
            self.delivery.chat.max_retries = ChatConfig::default().max_retries;
        }

        for src in &mut self.sources {
            if src.refresh_secs < 0 {
                src.refresh_secs = default_refresh_secs();
            }
        }
        let before = self.sources.len();
        self.sources.retain(|s| !s.id.trim().is_empty());
        if self.sources.len() != before {
            tracing::warn!(dropped = before - self.sources.len(), "sources without id ignored");
        }
    }

    /// Apply an enumerated override, then re-validate.
    pub fn merge(&mut self, ov: ConfigOverride) {
        if let Some(v) = ov.bind {
            self.server.bind = v;
        }
        if let Some(v) = ov.suppress_window_secs {
            self.engine.suppress_window_secs = v;
        }
        if let Some(v) = ov.correlation_radius_nm {
            self.engine.correlation_radius_nm = v;
        }
        if let Some(v) = ov.max_records {
            self.engine.max_records = v;
        }
        if let Some(v) = ov.max_concurrent_fetches {
            self.poller.max_concurrent_fetches = v;
        }
        if let Some(v) = ov.request_timeout_secs {
            self.poller.request_timeout_secs = v;
        }
        if let Some(v) = ov.callsign {
            self.delivery.callsign = v.trim().to_ascii_uppercase();
        }
        if let Some(v) = ov.min_zone_interval_secs {
            self.delivery.min_zone_interval_secs = v;
        }
        if let Some(v) = ov.console {
            self.delivery.console = v;
        }
        if let Some(v) = ov.default_zone {
            self.zones.default_zone = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Some(v) = ov.chat_room {
            self.delivery.chat.room = v;
        }
        if let Some(v) = ov.chat_session {
            self.delivery.chat.session = v;
        }
        self.validate();
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        if self.delivery.chat.session.trim().eq_ignore_ascii_case("env") {
            self.delivery.chat.session = std::env::var(ENV_CHAT_SESSION)
                .map_err(|_| anyhow!("Missing {ENV_CHAT_SESSION} env var"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = AppConfig::parse("", "toml").unwrap();
        assert_eq!(cfg.engine, EngineConfig::default());
        assert_eq!(cfg.poller.failure_threshold, 5);
        assert_eq!(cfg.delivery.min_zone_interval_secs, 30);
        assert_eq!(cfg.zones.default_zone.as_deref(), Some("PUGETSOUND"));
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn sources_and_name_rules_parse() {
        let toml = r#"
            [zones]
            default_zone = "SOUND"
            names = [{ match = "Clinton", zone = "CLINTON" }]

            [[sources]]
            id = "clinton_dock"
            name = "Clinton Terminal"
            url = "http://cams.test/clinton.jpg"
            lat = 47.9748
            lon = -122.3519
        "#;
        let cfg = AppConfig::parse(toml, "toml").unwrap();
        assert_eq!(cfg.zones.names, vec![NameRule::new("Clinton", "CLINTON")]);
        assert_eq!(cfg.sources.len(), 1);
        let s = &cfg.sources[0];
        assert_eq!(s.refresh_secs, 30);
        assert!(s.enabled);
        assert!(s.zone.is_none());
    }

    #[test]
    fn json_fallback_is_accepted() {
        let json = r#"{ "engine": { "suppress_window_secs": 90 } }"#;
        let cfg = AppConfig::parse(json, "").unwrap();
        assert_eq!(cfg.engine.suppress_window_secs, 90);
        assert_eq!(cfg.engine.max_records, 500);
    }

    #[test]
    fn validate_resets_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.engine.suppress_window_secs = -5;
        cfg.engine.correlation_radius_nm = f64::NAN;
        cfg.poller.max_concurrent_fetches = 0;
        cfg.delivery.min_zone_interval_secs = -1;
        cfg.delivery.chat.max_retries = 200;
        cfg.validate();
        assert_eq!(cfg.engine.suppress_window_secs, 120);
        assert_eq!(cfg.engine.correlation_radius_nm, 2.0);
        assert_eq!(cfg.poller.max_concurrent_fetches, 10);
        assert_eq!(cfg.delivery.min_zone_interval_secs, 0);
        assert_eq!(cfg.delivery.chat.max_retries, 3);

        cfg.delivery.chat.max_retries = 0;
        cfg.validate();
        assert_eq!(cfg.delivery.chat.max_retries, 3);
    }

    #[test]
    fn merge_touches_only_named_fields() {
        let mut cfg = AppConfig::default();
        cfg.merge(ConfigOverride {
            callsign: Some(" pr07 ".into()),
            default_zone: Some(String::new()),
            max_records: Some(0),
            ..Default::default()
        });
        assert_eq!(cfg.delivery.callsign, "PR07");
        assert!(cfg.zones.default_zone.is_none());
        // invalid value is re-validated back to default
        assert_eq!(cfg.engine.max_records, 500);
        assert_eq!(cfg.engine.suppress_window_secs, 120);
    }

    #[serial_test::serial]
    #[test]
    fn load_prefers_env_path_and_resolves_session() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("fusion.toml");
        fs::write(
            &p,
            r#"
            [delivery.chat]
            server_url = "https://chat.test"
            session = "ENV"
            room = "ops"
            "#,
        )
        .unwrap();

        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_CHAT_SESSION, "cookie-123");
        env::set_var(ENV_BIND, "127.0.0.1:9999");

        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.delivery.chat.session, "cookie-123");
        assert!(cfg.delivery.chat.is_configured());
        assert_eq!(cfg.server.bind, "127.0.0.1:9999");

        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var(ENV_CHAT_SESSION);
        env::remove_var(ENV_BIND);
    }

    #[serial_test::serial]
    #[test]
    fn missing_explicit_path_is_an_error() {
        env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
        assert!(AppConfig::load().is_err());
        env::remove_var(ENV_CONFIG_PATH);
    }
}
