use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    InstanceCandidate, LeagueConfigurationType, LeagueInstance, LinkDetails, MarketListing,
    MatchResult, NewTask, ScheduledTask, TacticsRecord, TeamEntry, Transfer, UserLeagueLink,
};
use crate::error::Result;

/// Outcome of replacing an instance's market listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketSyncOutcome {
    /// Listings active after the sync
    pub active: u64,
    /// Previously active listings absent from the new snapshot
    pub expired: u64,
}

/// Relational store behind the sync engine.
///
/// Every write is keyed by the natural keys of the persisted tables, so
/// repeating a call with the same input never creates additional rows.
#[async_trait]
pub trait LeagueStore: Send + Sync {
    // ==================== Catalog ====================

    async fn load_catalog(&self) -> Result<Vec<LeagueConfigurationType>>;

    /// Insert a configuration type or replace the roster of an existing one
    async fn upsert_configuration_type(&self, config_type: &LeagueConfigurationType) -> Result<()>;

    // ==================== Instances ====================

    /// Instances named like `name` (case-insensitive) that have at least one
    /// active link from any user, with their saved manager fingerprints
    async fn find_candidate_instances(
        &self,
        name: &str,
        requester: Uuid,
    ) -> Result<Vec<InstanceCandidate>>;

    async fn get_instance(&self, id: i64) -> Result<Option<LeagueInstance>>;

    async fn create_instance(
        &self,
        name: &str,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<LeagueInstance>;

    /// Refresh the display name and the scrape time of every link
    async fn touch_instance(&self, id: i64, name: &str, now: DateTime<Utc>) -> Result<()>;

    async fn update_instance_roster(
        &self,
        id: i64,
        roster: &[TeamEntry],
        now: DateTime<Utc>,
    ) -> Result<()>;

    // ==================== Links ====================

    /// Ensure an active link exists. Returns true when a new row was inserted.
    async fn activate_link(&self, user_id: Uuid, instance_id: i64, now: DateTime<Utc>)
        -> Result<bool>;

    /// Full replacement of the link's derived views
    async fn update_link_details(
        &self,
        user_id: Uuid,
        instance_id: i64,
        details: &LinkDetails,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Deactivate the user's active links whose instance is not in `keep`
    async fn deactivate_links_except(&self, user_id: Uuid, keep: &[i64]) -> Result<u64>;

    /// Like `deactivate_links_except`, limited to instances whose name is in
    /// `names` (lowercase, trimmed)
    async fn deactivate_replaced_links(
        &self,
        user_id: Uuid,
        keep: &[i64],
        names: &[String],
    ) -> Result<u64>;

    async fn list_links(&self, user_id: Uuid) -> Result<Vec<UserLeagueLink>>;

    // ==================== Facts ====================

    /// Returns the number of newly inserted rows
    async fn upsert_transfers(&self, transfers: &[Transfer]) -> Result<u64>;

    /// Flip every active listing of the instance to inactive, then upsert
    /// `listings` as active, atomically
    async fn replace_market_listings(
        &self,
        instance_id: i64,
        listings: &[MarketListing],
    ) -> Result<MarketSyncOutcome>;

    /// Returns the number of newly inserted rows
    async fn upsert_matches(&self, matches: &[MatchResult]) -> Result<u64>;

    async fn upsert_tactics(&self, record: &TacticsRecord) -> Result<()>;

    async fn list_transfers(&self, instance_id: i64) -> Result<Vec<Transfer>>;

    async fn list_market_listings(&self, instance_id: i64) -> Result<Vec<MarketListing>>;

    async fn list_matches(&self, instance_id: i64) -> Result<Vec<MatchResult>>;

    async fn list_tactics(&self, instance_id: i64) -> Result<Vec<TacticsRecord>>;

    // ==================== Scheduled Tasks ====================

    /// Insert a task; `None` when (user, type, scheduled_at) already exists
    async fn insert_task(&self, task: &NewTask) -> Result<Option<i64>>;

    /// Whether a pending task of this type targets the same instance and round
    async fn has_pending_task(
        &self,
        user_id: Uuid,
        task_type: &str,
        instance_id: i64,
        round: i32,
    ) -> Result<bool>;

    /// Atomically move due pending tasks to `running` and return them
    async fn claim_due_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledTask>>;

    /// `running` -> `completed`. Returns false if the task was not running.
    async fn complete_task(&self, id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// `running` -> `failed` with an error summary merged into metadata
    async fn fail_task(&self, id: i64, error: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Fail running tasks claimed before `cutoff`
    async fn fail_stale_claims(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<ScheduledTask>>;
}

/// Credential store shared with the collection agent
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// True only when a credential row exists and was invalidated
    async fn is_blocked(&self, user_id: Uuid) -> Result<bool>;

    async fn invalidate(&self, user_id: Uuid, reason: &str) -> Result<()>;

    async fn users_with_valid_credentials(&self) -> Result<Vec<Uuid>>;
}
