//! In-memory store used for dry runs and tests
//!
//! Mirrors the natural keys and conflict behaviour of the Postgres schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::traits::{CredentialStore, LeagueStore, MarketSyncOutcome};
use crate::domain::{
    InstanceCandidate, LeagueConfigurationType, LeagueInstance, LinkDetails, ManagerFingerprint,
    MarketListing, MatchResult, NewTask, ScheduledTask, TacticsRecord, TaskStatus, TeamEntry,
    Transfer, UserLeagueLink,
};
use crate::error::{Result, SyncError};

type TransferKey = (i64, i32, String, String, Decimal);
type ListingKey = (i64, String, String);
type MatchKey = (i64, i32, String, String);
type TacticsKey = (i64, i32, String);

#[derive(Debug, Clone)]
struct Credential {
    is_valid: bool,
    invalidated_at: Option<DateTime<Utc>>,
    invalid_reason: Option<String>,
}

#[derive(Default)]
struct State {
    types: BTreeMap<String, LeagueConfigurationType>,
    instances: BTreeMap<i64, LeagueInstance>,
    next_instance_id: i64,
    links: BTreeMap<(Uuid, i64), UserLeagueLink>,
    transfers: BTreeMap<TransferKey, Transfer>,
    listings: BTreeMap<ListingKey, MarketListing>,
    matches: BTreeMap<MatchKey, MatchResult>,
    tactics: BTreeMap<TacticsKey, TacticsRecord>,
    tasks: BTreeMap<i64, ScheduledTask>,
    next_task_id: i64,
    credentials: BTreeMap<Uuid, Credential>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with valid credentials
    pub async fn add_user(&self, user_id: Uuid) {
        self.state.lock().await.credentials.insert(
            user_id,
            Credential {
                is_valid: true,
                invalidated_at: None,
                invalid_reason: None,
            },
        );
    }

    pub async fn invalid_reason(&self, user_id: Uuid) -> Option<String> {
        let state = self.state.lock().await;
        state
            .credentials
            .get(&user_id)
            .and_then(|c| c.invalid_reason.clone())
    }

    pub async fn instance_count(&self) -> usize {
        self.state.lock().await.instances.len()
    }
}

fn link_fingerprint(link: &UserLeagueLink) -> ManagerFingerprint {
    ManagerFingerprint::from_names(link.managers_by_team.values().map(String::as_str))
}

#[async_trait]
impl LeagueStore for MemoryStore {
    // ==================== Catalog ====================

    async fn load_catalog(&self) -> Result<Vec<LeagueConfigurationType>> {
        Ok(self.state.lock().await.types.values().cloned().collect())
    }

    async fn upsert_configuration_type(&self, config_type: &LeagueConfigurationType) -> Result<()> {
        self.state
            .lock()
            .await
            .types
            .insert(config_type.name.clone(), config_type.clone());
        Ok(())
    }

    // ==================== Instances ====================

    async fn find_candidate_instances(
        &self,
        name: &str,
        requester: Uuid,
    ) -> Result<Vec<InstanceCandidate>> {
        let state = self.state.lock().await;
        let wanted = name.trim().to_lowercase();

        let mut candidates = Vec::new();
        for instance in state.instances.values() {
            if instance.name.trim().to_lowercase() != wanted {
                continue;
            }
            let links: Vec<&UserLeagueLink> = state
                .links
                .values()
                .filter(|l| l.league_instance_id == instance.id)
                .collect();
            if !links.iter().any(|l| l.is_active) {
                continue;
            }

            let mut saved = ManagerFingerprint::default();
            for link in links.iter().filter(|l| l.is_active) {
                saved.extend(&link_fingerprint(link));
            }

            candidates.push(InstanceCandidate {
                instance_id: instance.id,
                updated_at: instance.updated_at,
                saved_fingerprint: saved,
                linked_to_requester: links.iter().any(|l| l.user_id == requester),
            });
        }
        Ok(candidates)
    }

    async fn get_instance(&self, id: i64) -> Result<Option<LeagueInstance>> {
        Ok(self.state.lock().await.instances.get(&id).cloned())
    }

    async fn create_instance(
        &self,
        name: &str,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<LeagueInstance> {
        let mut state = self.state.lock().await;
        state.next_instance_id += 1;
        let instance = LeagueInstance {
            id: state.next_instance_id,
            name: name.to_string(),
            roster: roster.to_vec(),
            created_at: now,
            updated_at: now,
        };
        state.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn touch_instance(&self, id: i64, name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("league instance {id}")))?;
        instance.name = name.to_string();
        instance.updated_at = now;

        for link in state.links.values_mut().filter(|l| l.league_instance_id == id) {
            link.last_scraped_at = Some(now);
        }
        Ok(())
    }

    async fn update_instance_roster(
        &self,
        id: i64,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("league instance {id}")))?;
        instance.roster = roster.to_vec();
        instance.updated_at = now;
        Ok(())
    }

    // ==================== Links ====================

    async fn activate_link(
        &self,
        user_id: Uuid,
        instance_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.instances.contains_key(&instance_id) {
            return Err(SyncError::NotFound(format!("league instance {instance_id}")));
        }
        match state.links.get_mut(&(user_id, instance_id)) {
            Some(link) => {
                link.is_active = true;
                link.last_scraped_at = Some(now);
                Ok(false)
            }
            None => {
                state.links.insert(
                    (user_id, instance_id),
                    UserLeagueLink::new(user_id, instance_id, now),
                );
                Ok(true)
            }
        }
    }

    async fn update_link_details(
        &self,
        user_id: Uuid,
        instance_id: i64,
        details: &LinkDetails,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let link = state
            .links
            .get_mut(&(user_id, instance_id))
            .ok_or_else(|| SyncError::NotFound(format!("link {user_id}/{instance_id}")))?;
        link.standings = details.standings.clone();
        link.squad_values = details.squad_values.clone();
        link.managers_by_team = details.managers_by_team.clone();
        link.last_scraped_at = Some(now);
        Ok(())
    }

    async fn deactivate_links_except(&self, user_id: Uuid, keep: &[i64]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for link in state
            .links
            .values_mut()
            .filter(|l| l.user_id == user_id && l.is_active)
        {
            if !keep.contains(&link.league_instance_id) {
                link.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn deactivate_replaced_links(
        &self,
        user_id: Uuid,
        keep: &[i64],
        names: &[String],
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let State {
            instances, links, ..
        } = &mut *state;

        let mut count = 0;
        for link in links
            .values_mut()
            .filter(|l| l.user_id == user_id && l.is_active)
        {
            if keep.contains(&link.league_instance_id) {
                continue;
            }
            let replaced = instances
                .get(&link.league_instance_id)
                .map_or(false, |i| names.contains(&i.name.trim().to_lowercase()));
            if replaced {
                link.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_links(&self, user_id: Uuid) -> Result<Vec<UserLeagueLink>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    // ==================== Facts ====================

    async fn upsert_transfers(&self, transfers: &[Transfer]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for t in transfers {
            let key = (
                t.league_instance_id,
                t.round,
                t.player_name.clone(),
                t.manager_name.clone(),
                t.final_price,
            );
            match state.transfers.get_mut(&key) {
                Some(existing) => {
                    existing.seller_manager = t.seller_manager.clone();
                    existing.buyer_manager = t.buyer_manager.clone();
                    existing.transaction_type = t.transaction_type;
                    existing.position = t.position.clone();
                    existing.base_value = t.base_value;
                    existing.from_text = t.from_text.clone();
                    existing.to_text = t.to_text.clone();
                }
                None => {
                    state.transfers.insert(key, t.clone());
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    async fn replace_market_listings(
        &self,
        instance_id: i64,
        listings: &[MarketListing],
    ) -> Result<MarketSyncOutcome> {
        let mut state = self.state.lock().await;

        let mut previously_active = BTreeSet::new();
        for (key, listing) in state
            .listings
            .iter_mut()
            .filter(|(k, l)| k.0 == instance_id && l.is_active)
        {
            listing.is_active = false;
            previously_active.insert(key.clone());
        }

        let mut seen = BTreeSet::new();
        for l in listings {
            let key = (instance_id, l.name.clone(), l.seller_manager.clone());
            let mut row = l.clone();
            row.league_instance_id = instance_id;
            row.is_active = true;
            state.listings.insert(key.clone(), row);
            seen.insert(key);
        }

        Ok(MarketSyncOutcome {
            active: seen.len() as u64,
            expired: previously_active.difference(&seen).count() as u64,
        })
    }

    async fn upsert_matches(&self, matches: &[MatchResult]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for m in matches {
            let key = (
                m.league_instance_id,
                m.round,
                m.home_team.clone(),
                m.away_team.clone(),
            );
            match state.matches.get_mut(&key) {
                Some(existing) => existing.refine(m.clone()),
                None => {
                    state.matches.insert(key, m.clone());
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }

    async fn upsert_tactics(&self, record: &TacticsRecord) -> Result<()> {
        let key = (
            record.league_instance_id,
            record.round,
            record.team_name.clone(),
        );
        self.state.lock().await.tactics.insert(key, record.clone());
        Ok(())
    }

    async fn list_transfers(&self, instance_id: i64) -> Result<Vec<Transfer>> {
        let state = self.state.lock().await;
        Ok(state
            .transfers
            .values()
            .filter(|t| t.league_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_market_listings(&self, instance_id: i64) -> Result<Vec<MarketListing>> {
        let state = self.state.lock().await;
        Ok(state
            .listings
            .values()
            .filter(|l| l.league_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_matches(&self, instance_id: i64) -> Result<Vec<MatchResult>> {
        let state = self.state.lock().await;
        Ok(state
            .matches
            .values()
            .filter(|m| m.league_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_tactics(&self, instance_id: i64) -> Result<Vec<TacticsRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .tactics
            .values()
            .filter(|t| t.league_instance_id == instance_id)
            .cloned()
            .collect())
    }

    // ==================== Scheduled Tasks ====================

    async fn insert_task(&self, task: &NewTask) -> Result<Option<i64>> {
        let mut state = self.state.lock().await;
        let exists = state.tasks.values().any(|t| {
            t.user_id == task.user_id
                && t.task_type == task.task_type
                && t.scheduled_at == task.scheduled_at
        });
        if exists {
            return Ok(None);
        }

        state.next_task_id += 1;
        let id = state.next_task_id;
        state.tasks.insert(
            id,
            ScheduledTask {
                id,
                user_id: task.user_id,
                task_type: task.task_type.clone(),
                scheduled_at: task.scheduled_at,
                status: TaskStatus::Pending,
                metadata: task.metadata.clone(),
                created_at: Utc::now(),
                claimed_at: None,
                executed_at: None,
            },
        );
        Ok(Some(id))
    }

    async fn has_pending_task(
        &self,
        user_id: Uuid,
        task_type: &str,
        instance_id: i64,
        round: i32,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.tasks.values().any(|t| {
            t.user_id == user_id
                && t.task_type == task_type
                && t.status == TaskStatus::Pending
                && t.metadata.get("league_instance_id").and_then(|v| v.as_i64()) == Some(instance_id)
                && t.metadata.get("round").and_then(|v| v.as_i64()) == Some(i64::from(round))
        }))
    }

    async fn claim_due_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>> {
        let mut state = self.state.lock().await;
        let mut due: Vec<&mut ScheduledTask> = state
            .tasks
            .values_mut()
            .filter(|t| t.task_type == task_type && t.is_due(now))
            .collect();
        due.sort_by_key(|t| (t.scheduled_at, t.id));

        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        let mut claimed = Vec::new();
        for task in due.into_iter().take(limit) {
            task.status = TaskStatus::Running;
            task.claimed_at = Some(now);
            claimed.push(task.clone());
        }
        Ok(claimed)
    }

    async fn complete_task(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Completed;
                task.executed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_task(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Failed;
                task.executed_at = Some(now);
                if let Some(obj) = task.metadata.as_object_mut() {
                    obj.insert("error".to_string(), serde_json::Value::from(error));
                } else {
                    task.metadata = serde_json::json!({ "error": error });
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_stale_claims(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for task in state.tasks.values_mut().filter(|t| {
            t.status == TaskStatus::Running && t.claimed_at.map_or(false, |c| c < cutoff)
        }) {
            task.status = TaskStatus::Failed;
            task.executed_at = Some(now);
            if let Some(obj) = task.metadata.as_object_mut() {
                obj.insert("error".to_string(), serde_json::Value::from("claim expired"));
            }
            count += 1;
        }
        Ok(count)
    }

    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<ScheduledTask>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn is_blocked(&self, user_id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .credentials
            .get(&user_id)
            .map_or(false, |c| !c.is_valid))
    }

    async fn invalidate(&self, user_id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let credential = state.credentials.entry(user_id).or_insert(Credential {
            is_valid: true,
            invalidated_at: None,
            invalid_reason: None,
        });
        credential.is_valid = false;
        credential.invalidated_at = Some(Utc::now());
        credential.invalid_reason = Some(reason.to_string());
        Ok(())
    }

    async fn users_with_valid_credentials(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .credentials
            .iter()
            .filter(|(_, c)| c.is_valid)
            .map(|(id, _)| *id)
            .collect())
    }
}
