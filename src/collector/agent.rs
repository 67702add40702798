//! Collection agent driven as a subprocess
//!
//! The agent prints one JSON document on stdout and exits. A dedicated exit
//! code signals that the stored credentials were rejected by the site.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{SnapshotCollector, TacticsRequest};
use crate::config::AgentConfig;
use crate::domain::text::truncate_chars;
use crate::domain::{Snapshot, TacticsCapture};
use crate::error::{Result, SyncError};

const STDERR_EXCERPT_CHARS: usize = 500;

pub struct ExternalAgent {
    config: AgentConfig,
}

impl ExternalAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    async fn run<T: DeserializeOwned>(&self, user_id: Uuid, args: &[String]) -> Result<T> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.config.program, ?args, "Spawning collection agent");
        let child = cmd.spawn().map_err(|e| {
            SyncError::Collector(format!("failed to spawn {}: {e}", self.config.program))
        })?;

        let output = timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| SyncError::CollectorTimeout(self.config.timeout_secs))??;

        if output.status.code() == Some(self.config.auth_failure_exit_code) {
            warn!(%user_id, "Collection agent reported rejected credentials");
            return Err(SyncError::InvalidCredentials(user_id));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Collector(format!(
                "agent exited with {}: {}",
                output.status,
                truncate_chars(stderr.trim(), STDERR_EXCERPT_CHARS)
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| SyncError::Collector(format!("agent produced invalid JSON: {e}")))
    }
}

#[async_trait]
impl SnapshotCollector for ExternalAgent {
    async fn collect(&self, user_id: Uuid) -> Result<Snapshot> {
        let args = vec!["collect".to_string(), "--user".to_string(), user_id.to_string()];
        self.run(user_id, &args).await
    }

    async fn capture_tactics(
        &self,
        user_id: Uuid,
        request: &TacticsRequest,
    ) -> Result<TacticsCapture> {
        let args = vec![
            "tactics".to_string(),
            "--user".to_string(),
            user_id.to_string(),
            "--slot".to_string(),
            request.slot_index.to_string(),
            "--team".to_string(),
            request.team_name.clone(),
        ];
        self.run(user_id, &args).await
    }
}
