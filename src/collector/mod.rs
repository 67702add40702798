//! Snapshot collection
//!
//! The browser-driving agent lives outside this crate. These adapters hand
//! its output to the engine as typed `Snapshot` values.

mod agent;
mod file;

pub use agent::ExternalAgent;
pub use file::FileCollector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Snapshot, TacticsCapture};
use crate::error::Result;

/// What the tactics worker asks the agent to read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticsRequest {
    pub slot_index: u8,
    pub team_name: String,
}

#[async_trait]
pub trait SnapshotCollector: Send + Sync {
    /// Collect a full snapshot of every slot the user manages.
    ///
    /// Returns `SyncError::InvalidCredentials` when the site rejects the login.
    async fn collect(&self, user_id: Uuid) -> Result<Snapshot>;

    /// Read the live tactics view of one slot
    async fn capture_tactics(&self, user_id: Uuid, request: &TacticsRequest)
        -> Result<TacticsCapture>;
}
