// src/detect.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One object the classifier found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f32; 4],
    pub class_label: String,
    pub confidence: f32,
    #[serde(default)]
    pub vessel_name: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Frame classifier. Called from blocking threads (`spawn_blocking`), never
/// directly on a runtime worker.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &[u8]) -> Result<Vec<Detection>>;
    fn name(&self) -> &'static str;
}

/// Finds nothing. Used when no classifier is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&self, _frame: &[u8]) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
