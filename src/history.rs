//! history.rs in-memory log of emitted reports for the operator API.

use std::sync::Mutex;

use serde::Serialize;

use crate::deconfliction::SourceKind;
use crate::report::Report;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub line: String,
    pub report: Report,
    /// `None` for manual and check-in/out messages.
    pub source_kind: Option<SourceKind>,
    pub source_id: Option<String>,
}

#[derive(Debug)]
pub struct ReportHistory {
    inner: Mutex<Vec<HistoryEntry>>,
    cap: usize,
}

impl ReportHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, report: &Report, source_kind: Option<SourceKind>, source_id: Option<&str>) {
        let entry = HistoryEntry {
            line: report.to_line(),
            report: report.clone(),
            source_kind,
            source_id: source_id.map(str::to_string),
        };

        let mut v = self.inner.lock().expect("history mutex poisoned");
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<HistoryEntry> {
        let v = self.inner.lock().expect("history mutex poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Confidence, ReportDraft, ReportGenerator};

    fn report(gen: &ReportGenerator) -> Report {
        gen.create(ReportDraft {
            num_targets: 1,
            confidence: Confidence::Confirmed,
            platform: "ORCA".into(),
            zone: "CLINTON".into(),
            remarks: String::new(),
            vessel_name: Some("Tokitae".into()),
            timestamp: None,
        })
    }

    #[test]
    fn capped_and_ordered() {
        let gen = ReportGenerator::new("PR01");
        let h = ReportHistory::with_capacity(3);
        for _ in 0..5 {
            h.push(&report(&gen), Some(SourceKind::Authoritative), None);
        }
        assert_eq!(h.len(), 3);
        let last = h.snapshot_last_n(2);
        assert_eq!(last[0].report.serial_number, 4);
        assert_eq!(last[1].report.serial_number, 5);
        assert_eq!(h.snapshot_last_n(100).len(), 3);
    }
}
