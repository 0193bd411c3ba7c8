// src/feeds/types.rs
use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geo::Coord;

/// Point-in-time copy of a source, safe to hand across tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub id: String,
    pub name: String,
    pub url: String,
    pub coord: Coord,
    pub refresh_secs: i64,
    pub zone: Option<String>,
    pub enabled: bool,
    pub online: bool,
    pub consecutive_failures: u32,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_payload_at: Option<DateTime<Utc>>,
}

/// Operator-facing health row.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub online: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub errors: u32,
    pub zone: Option<String>,
}

impl From<&SourceSnapshot> for SourceStatus {
    fn from(s: &SourceSnapshot) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            enabled: s.enabled,
            online: s.online,
            last_update: s.last_payload_at,
            errors: s.consecutive_failures,
            zone: s.zone.clone(),
        }
    }
}

/// Transport that pulls one payload (a camera still) from a source.
#[async_trait::async_trait]
pub trait FrameFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceSnapshot) -> Result<Bytes>;
    fn name(&self) -> &'static str;
}

/// Invoked on a blocking thread after every successful fetch; the fetch task
/// waits for it before releasing its permit.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, source_id: &str, payload: &Bytes, source: &SourceSnapshot) -> Result<()>;
}
