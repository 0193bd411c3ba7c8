// src/delivery/log.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use super::{Delivery, ReportSink};

/// Append-only text log, one line per delivered report.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: PathBuf,
}

impl AppendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `[YYYY-MM-DD HH:MM:SSZ] text` with ` | IMG: url` when an attachment exists.
    pub fn format_line(d: &Delivery) -> String {
        let mut line = format!("[{}] {}", d.queued_at.format("%Y-%m-%d %H:%M:%SZ"), d.text);
        if let Some(img) = &d.attachment {
            line.push_str(" | IMG: ");
            line.push_str(img);
        }
        line.push('\n');
        line
    }
}

#[async_trait::async_trait]
impl ReportSink for AppendLog {
    async fn deliver(&self, d: &Delivery) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        f.write_all(Self::format_line(d).as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Mirrors each report to stdout for the operator's terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

#[async_trait::async_trait]
impl ReportSink for ConsoleSink {
    async fn deliver(&self, d: &Delivery) -> Result<()> {
        println!("[{}] {}", d.zone, d.text);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn delivery(attachment: Option<&str>) -> Delivery {
        Delivery {
            zone: "CLINTON".into(),
            text: "PR01//I001//1//CONFIRMED//ORCA//CLINTON//1200//REM:".into(),
            attachment: attachment.map(str::to_string),
            queued_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 5).unwrap(),
        }
    }

    #[test]
    fn line_format() {
        assert_eq!(
            AppendLog::format_line(&delivery(Some("http://img/1.jpg"))),
            "[2025-06-01 12:00:05Z] PR01//I001//1//CONFIRMED//ORCA//CLINTON//1200//REM: | IMG: http://img/1.jpg\n"
        );
        assert!(!AppendLog::format_line(&delivery(None)).contains("IMG"));
    }

    #[tokio::test]
    async fn appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::new(dir.path().join("reports/tacreps.log"));
        log.deliver(&delivery(None)).await.unwrap();
        log.deliver(&delivery(None)).await.unwrap();
        let body = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(body.lines().count(), 2);
    }
}
