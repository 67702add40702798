//! Deferred tactics captures
//!
//! The live tactics view only exists around kickoff, so runs record when to
//! look and a separate worker picks the tasks up once they are due. A failed
//! capture is terminal: the live window has usually closed by the time a
//! retry would run.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{CredentialStore, LeagueStore};
use crate::collector::{SnapshotCollector, TacticsRequest};
use crate::config::SchedulerConfig;
use crate::domain::text::truncate_chars;
use crate::domain::{
    tactics_target_time, NewTask, ScheduledTask, SlotSnapshot, TacticsTaskMetadata, TACTICS_CAPTURE,
};
use crate::error::{Result, SyncError};
use crate::sync::FactSynchronizer;

/// Longest error summary stored on a failed task
const ERROR_SUMMARY_CHARS: usize = 500;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Persists and hands out `tactics_capture` tasks
pub struct TaskScheduler {
    store: Arc<dyn LeagueStore>,
    safety_margin_secs: u64,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn LeagueStore>, safety_margin_secs: u64) -> Self {
        Self {
            store,
            safety_margin_secs,
        }
    }

    /// Schedule a capture for the slot's next league match.
    ///
    /// Returns the new task id, or `None` when there is nothing to schedule
    /// or an equivalent task is already pending.
    #[instrument(skip(self, slot), fields(slot = slot.slot_index))]
    pub async fn schedule_tactics(
        &self,
        user_id: Uuid,
        instance_id: i64,
        league_name: &str,
        slot: &SlotSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let Some(next) = slot.next_match.as_ref() else {
            return Ok(None);
        };
        let countdown = next.seconds_until_kickoff();
        if countdown == 0 || next.is_cup_match {
            debug!(
                countdown,
                cup = next.is_cup_match,
                "No league kickoff to schedule"
            );
            return Ok(None);
        }

        if self
            .store
            .has_pending_task(user_id, TACTICS_CAPTURE, instance_id, next.round)
            .await?
        {
            debug!(round = next.round, "Capture already pending");
            return Ok(None);
        }

        let metadata = TacticsTaskMetadata {
            league_instance_id: instance_id,
            team_name: slot.managed_club_name.clone(),
            round: next.round,
            slot_index: slot.slot_index,
            league_name: Some(league_name.to_string()),
        };
        let task = NewTask {
            user_id,
            task_type: TACTICS_CAPTURE.to_string(),
            scheduled_at: tactics_target_time(now, countdown, self.safety_margin_secs),
            metadata: serde_json::to_value(&metadata)?,
        };

        let id = self.store.insert_task(&task).await?;
        if let Some(id) = id {
            info!(task_id = id, scheduled_at = %task.scheduled_at, round = next.round, "Tactics capture scheduled");
        }
        Ok(id)
    }

    /// Claim due tasks for execution
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledTask>> {
        self.store.claim_due_tasks(TACTICS_CAPTURE, now, limit).await
    }

    pub async fn complete(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.store.complete_task(id, now).await
    }

    pub async fn fail(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
        self.store
            .fail_task(id, &truncate_chars(error, ERROR_SUMMARY_CHARS), now)
            .await
    }

    /// Fail claims that never finished
    pub async fn expire_stale_claims(&self, now: DateTime<Utc>, timeout_secs: u64) -> Result<u64> {
        let cutoff = i64::try_from(timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.store.fail_stale_claims(cutoff, now).await
    }
}

/// Outcome of one worker poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub expired: u64,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Periodic consumer of due tactics captures
pub struct TacticsCaptureWorker {
    scheduler: TaskScheduler,
    facts: FactSynchronizer,
    collector: Arc<dyn SnapshotCollector>,
    credentials: Arc<dyn CredentialStore>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
}

impl TacticsCaptureWorker {
    pub fn new(
        store: Arc<dyn LeagueStore>,
        collector: Arc<dyn SnapshotCollector>,
        credentials: Arc<dyn CredentialStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            scheduler: TaskScheduler::new(store.clone(), config.safety_margin_secs),
            facts: FactSynchronizer::new(store),
            collector,
            credentials,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to stop `run`
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// One poll: expire abandoned claims, then execute every due task
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<WorkerReport> {
        let mut report = WorkerReport {
            expired: self
                .scheduler
                .expire_stale_claims(now, self.config.claim_timeout_secs)
                .await?,
            ..Default::default()
        };
        if report.expired > 0 {
            warn!(count = report.expired, "Expired abandoned task claims");
        }

        let tasks = self.scheduler.claim_due(now, self.config.batch_size).await?;
        report.claimed = tasks.len();

        let mut by_user: BTreeMap<Uuid, Vec<ScheduledTask>> = BTreeMap::new();
        for task in tasks {
            by_user.entry(task.user_id).or_default().push(task);
        }

        for (user_id, tasks) in by_user {
            self.run_user_tasks(user_id, tasks, now, &mut report).await?;
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                failed = report.failed,
                "Tactics poll complete"
            );
        }
        Ok(report)
    }

    async fn run_user_tasks(
        &self,
        user_id: Uuid,
        tasks: Vec<ScheduledTask>,
        now: DateTime<Utc>,
        report: &mut WorkerReport,
    ) -> Result<()> {
        let mut credentials_rejected = self.credentials.is_blocked(user_id).await?;

        for task in tasks {
            if credentials_rejected {
                self.record_failure(&task, INVALID_CREDENTIALS, now, report).await?;
                continue;
            }

            match self.execute(&task, now).await {
                Ok(()) => {
                    if self.scheduler.complete(task.id, now).await? {
                        report.completed += 1;
                    }
                }
                Err(SyncError::InvalidCredentials(_)) => {
                    warn!(%user_id, "Credentials rejected during tactics capture");
                    self.credentials.invalidate(user_id, INVALID_CREDENTIALS).await?;
                    credentials_rejected = true;
                    self.record_failure(&task, INVALID_CREDENTIALS, now, report).await?;
                }
                Err(e) if matches!(e, SyncError::Database(_)) => return Err(e),
                Err(e) => {
                    self.record_failure(&task, &e.to_string(), now, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        task: &ScheduledTask,
        reason: &str,
        now: DateTime<Utc>,
        report: &mut WorkerReport,
    ) -> Result<()> {
        error!(task_id = task.id, user_id = %task.user_id, reason, "Tactics capture failed");
        if self.scheduler.fail(task.id, reason, now).await? {
            report.failed += 1;
        }
        Ok(())
    }

    async fn execute(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<()> {
        let meta: TacticsTaskMetadata = serde_json::from_value(task.metadata.clone())
            .map_err(|e| SyncError::Validation(format!("task metadata: {e}")))?;

        let request = TacticsRequest {
            slot_index: meta.slot_index,
            team_name: meta.team_name.clone(),
        };
        let capture = self.collector.capture_tactics(task.user_id, &request).await?;

        self.facts
            .sync_tactics(meta.league_instance_id, &capture, Some(meta.round), now)
            .await?;
        debug!(task_id = task.id, team = %meta.team_name, round = meta.round, "Tactics captured");
        Ok(())
    }

    /// Poll until stopped
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Tactics worker started (interval: {}s, batch: {})",
            self.config.poll_interval_secs, self.config.batch_size
        );

        let mut timer =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
        while self.running.load(Ordering::SeqCst) {
            timer.tick().await;
            if let Err(e) = self.run_once(Utc::now()).await {
                error!("Tactics poll failed: {}", e);
            }
        }
        info!("Tactics worker stopped");
    }
}
