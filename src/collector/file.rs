use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use super::{SnapshotCollector, TacticsRequest};
use crate::domain::{Snapshot, TacticsCapture};
use crate::error::{Result, SyncError};

/// Replays a snapshot saved as JSON
pub struct FileCollector {
    path: PathBuf,
}

impl FileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotCollector for FileCollector {
    async fn collect(&self, _user_id: Uuid) -> Result<Snapshot> {
        // A missing recording is not worth retrying
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SyncError::NotFound(format!("{}: {e}", self.path.display())))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn capture_tactics(
        &self,
        _user_id: Uuid,
        _request: &TacticsRequest,
    ) -> Result<TacticsCapture> {
        Err(SyncError::Collector(format!(
            "{} is a recorded snapshot; live tactics cannot be captured",
            self.path.display()
        )))
    }
}
