//! Per-user run: collect, then resolve and synchronize every slot in order
//!
//! Slots are processed sequentially because the claimed-instance set is
//! per run. Different users' runs may execute concurrently.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{CredentialStore, LeagueStore};
use crate::collector::SnapshotCollector;
use crate::config::{AppConfig, MatchingConfig, RunConfig, SyncConfig};
use crate::domain::{SlotSnapshot, SlotStatus, Snapshot};
use crate::error::{Result, SyncError};
use crate::resolver::{
    resolve_league_type, ClaimedInstances, InstanceMatch, InstanceMatcher, LeagueCatalog,
    MatchRequest,
};
use crate::scheduler::TaskScheduler;
use crate::sync::{FactSummary, FactSynchronizer};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Synced {
        instance_id: i64,
        league_name: String,
        created: bool,
        facts: FactSummary,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotReport {
    pub slot_index: u8,
    pub outcome: SlotOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub user_id: Uuid,
    pub slots: Vec<SlotReport>,
    pub deactivated_links: u64,
    /// Set when a slot failed before claiming; only links replaced in other
    /// leagues were deactivated
    pub deactivation_limited: bool,
    pub tasks_scheduled: usize,
    pub attempts: u32,
}

impl RunReport {
    pub fn synced(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.outcome, SlotOutcome::Synced { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.outcome, SlotOutcome::Failed { .. }))
            .count()
    }

    pub fn instance_for_slot(&self, slot_index: u8) -> Option<i64> {
        self.slots.iter().find_map(|s| match &s.outcome {
            SlotOutcome::Synced { instance_id, .. } if s.slot_index == slot_index => {
                Some(*instance_id)
            }
            _ => None,
        })
    }
}

fn league_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Where a slot's processing stopped
enum SlotError {
    /// Nothing was claimed for the slot
    BeforeClaim(SyncError),
    /// The slot owns an instance; only its facts are incomplete
    AfterClaim(SyncError),
}

impl SlotError {
    fn inner(&self) -> &SyncError {
        match self {
            SlotError::BeforeClaim(e) | SlotError::AfterClaim(e) => e,
        }
    }

    fn into_inner(self) -> SyncError {
        match self {
            SlotError::BeforeClaim(e) | SlotError::AfterClaim(e) => e,
        }
    }
}

pub struct RunOrchestrator {
    store: Arc<dyn LeagueStore>,
    credentials: Arc<dyn CredentialStore>,
    collector: Arc<dyn SnapshotCollector>,
    matcher: InstanceMatcher,
    facts: FactSynchronizer,
    scheduler: TaskScheduler,
    matching: MatchingConfig,
    sync: SyncConfig,
    run: RunConfig,
}

impl RunOrchestrator {
    pub fn new(
        store: Arc<dyn LeagueStore>,
        credentials: Arc<dyn CredentialStore>,
        collector: Arc<dyn SnapshotCollector>,
        config: &AppConfig,
    ) -> Self {
        Self {
            matcher: InstanceMatcher::new(
                store.clone(),
                config.matching.instance_overlap_threshold,
            ),
            facts: FactSynchronizer::new(store.clone()),
            scheduler: TaskScheduler::new(store.clone(), config.scheduler.safety_margin_secs),
            store,
            credentials,
            collector,
            matching: config.matching.clone(),
            sync: config.sync.clone(),
            run: config.run.clone(),
        }
    }

    /// Run one user with bounded retries on transient failures.
    ///
    /// Rejected credentials are invalidated and never retried.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn run_user(&self, user_id: Uuid) -> Result<RunReport> {
        if self.credentials.is_blocked(user_id).await? {
            warn!("Skipping user with invalidated credentials");
            return Err(SyncError::InvalidCredentials(user_id));
        }

        // The snapshot is reused by later attempts so retries do not re-collect
        let mut snapshot: Option<Snapshot> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(user_id, &mut snapshot).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    info!(
                        attempt,
                        synced = report.synced(),
                        failed = report.failed(),
                        deactivated = report.deactivated_links,
                        tasks = report.tasks_scheduled,
                        "Run complete"
                    );
                    return Ok(report);
                }
                Err(SyncError::InvalidCredentials(id)) => {
                    error!("Collection agent rejected credentials");
                    self.credentials.invalidate(id, INVALID_CREDENTIALS).await?;
                    return Err(SyncError::InvalidCredentials(id));
                }
                Err(e) if e.is_transient() && attempt < self.run.max_attempts => {
                    let delay = self.run.backoff_duration(attempt);
                    warn!(attempt, ?delay, error = %e, "Run failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Run failed");
                    return Err(e);
                }
            }
        }
    }

    /// Run every user with valid credentials, `run.concurrency` at a time
    pub async fn run_all(&self) -> Result<Vec<(Uuid, Result<RunReport>)>> {
        let users = self.credentials.users_with_valid_credentials().await?;
        info!(users = users.len(), concurrency = self.run.concurrency, "Starting sync for all users");

        let results = stream::iter(users)
            .map(|user_id| async move { (user_id, self.run_user(user_id).await) })
            .buffer_unordered(self.run.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    async fn attempt(&self, user_id: Uuid, cached: &mut Option<Snapshot>) -> Result<RunReport> {
        if cached.is_none() {
            let collected = self.collector.collect(user_id).await?;
            debug!(slots = collected.slots.len(), "Snapshot collected");
            *cached = Some(collected);
        }
        let Some(snapshot) = cached.as_ref() else {
            return Err(SyncError::Internal("snapshot cache empty".to_string()));
        };

        let catalog = LeagueCatalog::new(self.store.load_catalog().await?);
        let now = snapshot.collected_at;

        let mut slots: Vec<&SlotSnapshot> = snapshot.slots.iter().collect();
        slots.sort_by_key(|s| s.slot_index);

        let mut claimed = ClaimedInstances::new();
        let mut reports = Vec::with_capacity(slots.len());
        // Dashboard names of slots that failed before claiming an instance
        let mut unclaimed_failures: BTreeSet<String> = BTreeSet::new();
        let mut synced: Vec<(&SlotSnapshot, i64, String)> = Vec::new();

        for slot in slots {
            if let SlotStatus::Failed { reason } = &slot.status {
                warn!(slot = slot.slot_index, %reason, "Collector flagged slot as failed");
                unclaimed_failures.insert(league_key(&slot.dashboard_name));
                reports.push(SlotReport {
                    slot_index: slot.slot_index,
                    outcome: SlotOutcome::Failed {
                        reason: reason.clone(),
                    },
                });
                continue;
            }

            let outcome = match self
                .process_slot(user_id, slot, &catalog, &mut claimed, now)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.inner().is_transient() => return Err(e.into_inner()),
                Err(e) => {
                    if let SlotError::BeforeClaim(_) = e {
                        unclaimed_failures.insert(league_key(&slot.dashboard_name));
                    }
                    let reason = e.into_inner().to_string();
                    error!(slot = slot.slot_index, %reason, "Slot failed");
                    SlotOutcome::Failed { reason }
                }
            };

            if let SlotOutcome::Synced {
                instance_id,
                league_name,
                ..
            } = &outcome
            {
                synced.push((slot, *instance_id, league_name.clone()));
            }
            reports.push(SlotReport {
                slot_index: slot.slot_index,
                outcome,
            });
        }

        let deactivation_limited = !unclaimed_failures.is_empty();
        let deactivated_links = if deactivation_limited {
            // Links replaced by a claim in a league no failed slot plays in
            // are still retired, so a season rollover is not kept alive
            let replaced: Vec<String> = synced
                .iter()
                .map(|(_, _, name)| league_key(name))
                .filter(|name| !unclaimed_failures.contains(name))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            warn!(
                failed_leagues = ?unclaimed_failures,
                "A slot failed before claiming an instance; keeping its links active"
            );
            if replaced.is_empty() {
                0
            } else {
                self.store
                    .deactivate_replaced_links(user_id, &claimed.ids(), &replaced)
                    .await?
            }
        } else {
            let count = self
                .store
                .deactivate_links_except(user_id, &claimed.ids())
                .await?;
            if count > 0 {
                info!(count, "Deactivated links not confirmed by this run");
            }
            count
        };

        let mut tasks_scheduled = 0;
        for (slot, instance_id, league_name) in synced {
            if self
                .scheduler
                .schedule_tactics(user_id, instance_id, &league_name, slot, now)
                .await?
                .is_some()
            {
                tasks_scheduled += 1;
            }
        }

        Ok(RunReport {
            user_id,
            slots: reports,
            deactivated_links,
            deactivation_limited,
            tasks_scheduled,
            attempts: 0,
        })
    }

    #[instrument(skip(self, slot, catalog, claimed), fields(slot = slot.slot_index))]
    async fn process_slot(
        &self,
        user_id: Uuid,
        slot: &SlotSnapshot,
        catalog: &LeagueCatalog,
        claimed: &mut ClaimedInstances,
        now: DateTime<Utc>,
    ) -> std::result::Result<SlotOutcome, SlotError> {
        if slot.managed_club_name.trim().is_empty() && slot.dashboard_name.trim().is_empty() {
            return Err(SlotError::BeforeClaim(SyncError::MalformedSlot {
                slot: slot.slot_index,
                reason: "no club or league name".to_string(),
            }));
        }

        if self.sync.is_ignored(&slot.dashboard_name) {
            return Ok(SlotOutcome::Skipped {
                reason: format!("{} is ignored", slot.dashboard_name.trim()),
            });
        }

        let competitors = slot.competitor_set();
        let resolution = resolve_league_type(
            catalog,
            &slot.managed_club_name,
            &competitors,
            &slot.dashboard_name,
            self.matching.type_min_competitor_share,
        );
        if !resolution.is_confident() {
            warn!(
                club = %slot.managed_club_name,
                dashboard = %slot.dashboard_name,
                ?resolution,
                "League type unresolved, using dashboard name"
            );
        }
        let league_name = resolution.name().to_string();
        if league_name.is_empty() {
            return Err(SlotError::BeforeClaim(SyncError::MalformedSlot {
                slot: slot.slot_index,
                reason: "league name resolved to empty".to_string(),
            }));
        }

        if self.sync.is_ignored(&league_name) {
            return Ok(SlotOutcome::Skipped {
                reason: format!("{league_name} is ignored"),
            });
        }

        let fingerprint = slot.manager_fingerprint();
        let standings_clubs = slot.standings_clubs();
        let request = MatchRequest {
            user_id,
            league_name: &league_name,
            fingerprint: &fingerprint,
            standings_clubs: &standings_clubs,
        };
        let InstanceMatch {
            instance_id,
            created,
            ..
        } = self
            .matcher
            .resolve(catalog, &request, claimed, now)
            .await
            .map_err(SlotError::BeforeClaim)?;

        let facts = self
            .facts
            .sync_slot(user_id, instance_id, slot, now)
            .await
            .map_err(SlotError::AfterClaim)?;

        Ok(SlotOutcome::Synced {
            instance_id,
            league_name,
            created,
            facts,
        })
    }
}
