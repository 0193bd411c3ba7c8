// src/feeds/storage.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// `<YYYY-MM-DD>/<id>/<id>_<HHMMSS>.jpg`, also used to build image links.
pub fn frame_relpath(source_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/{source_id}/{source_id}_{}.jpg",
        at.format("%Y-%m-%d"),
        at.format("%H%M%S")
    )
}

/// Archives fetched frames as `<root>/<YYYY-MM-DD>/<id>/<id>_<HHMMSS>.jpg`.
#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, source_id: &str, at: DateTime<Utc>) -> PathBuf {
        self.root.join(frame_relpath(source_id, at))
    }

    pub async fn save(&self, source_id: &str, payload: &[u8], at: DateTime<Utc>) -> Result<PathBuf> {
        let path = self.path_for(source_id, at);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn path_layout() {
        let store = FrameStore::new("/captures");
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 2, 11, 40).unwrap();
        assert_eq!(
            store.path_for("clinton", at),
            PathBuf::from("/captures/2025-06-01/clinton/clinton_021140.jpg")
        );
    }

    #[tokio::test]
    async fn save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 2, 11, 40).unwrap();
        let path = store.save("mukilteo", b"\xff\xd8jpeg", at).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"\xff\xd8jpeg");
    }
}
