use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task type for deferred live-tactics captures
pub const TACTICS_CAPTURE: &str = "tactics_capture";

/// Scheduled task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for `scheduled_at`
    Pending,
    /// Claimed by a worker
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key: (user_id, task_type, scheduled_at)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub user_id: Uuid,
    pub task_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at <= now
    }
}

/// Task before it has an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub user_id: Uuid,
    pub task_type: String,
    pub scheduled_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Metadata attached to a `tactics_capture` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticsTaskMetadata {
    pub league_instance_id: i64,
    pub team_name: String,
    pub round: i32,
    pub slot_index: u8,
    #[serde(default)]
    pub league_name: Option<String>,
}

/// Kickoff countdown plus a margin for the live view to settle
pub fn tactics_target_time(now: DateTime<Utc>, countdown_secs: u64, margin_secs: u64) -> DateTime<Utc> {
    let offset = countdown_secs.saturating_add(margin_secs);
    now + Duration::seconds(i64::try_from(offset).unwrap_or(i64::MAX / 1000))
}
