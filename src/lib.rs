// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod deconfliction;
pub mod delivery;
pub mod detect;
pub mod feeds;
pub mod geo;
pub mod history;
pub mod metrics;
pub mod pipeline;
pub mod position_feed;
pub mod positions;
pub mod report;
pub mod zones;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::deconfliction::{DeconflictionEngine, SourceKind, Verdict};
pub use crate::delivery::{DeliveryQueue, Submission};
pub use crate::pipeline::FusionPipeline;
pub use crate::zones::ZoneIndex;
