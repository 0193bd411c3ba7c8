// src/feeds/mod.rs
//! Camera source registry and the concurrent poller that keeps it fresh.

pub mod http;
pub mod poller;
pub mod registry;
pub mod storage;
pub mod types;

pub use http::HttpFetcher;
pub use poller::{spawn_poller, FeedPoller, PollSummary};
pub use registry::{BackoffPolicy, FeedRegistry};
pub use storage::FrameStore;
pub use types::{FrameFetcher, FrameHandler, SourceSnapshot, SourceStatus};
