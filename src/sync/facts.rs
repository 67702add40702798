use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::adapters::LeagueStore;
use crate::domain::text::parse_money;
use crate::domain::{
    apply_squad_values, LinkDetails, MarketListing, MatchResult, SlotSnapshot, TacticsCapture,
    TacticsRecord, Transfer,
};
use crate::error::{Result, SyncError};

/// Attempts for an upsert that lost a natural-key race
const CONFLICT_ATTEMPTS: u32 = 3;

/// What one slot's synchronization wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSummary {
    pub transfers: usize,
    pub new_transfers: u64,
    pub market_active: u64,
    pub market_expired: u64,
    pub matches: usize,
    pub new_matches: u64,
    pub tactics: usize,
    pub roster_updates: usize,
    /// Rows dropped because their display text could not be parsed
    pub rejected: usize,
}

/// Retry an idempotent write that hit a unique violation
pub async fn retry_on_conflict<T, F, Fut>(operation: &str, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Err(e) if e.is_unique_violation() && attempt < CONFLICT_ATTEMPTS => {
                warn!(operation, attempt, "Natural-key conflict, retrying upsert");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Collect parsed rows, counting and logging the ones that fail validation
fn keep_valid<T>(rows: impl Iterator<Item = Result<T>>, kind: &str, rejected: &mut usize) -> Result<Vec<T>> {
    let mut valid = Vec::new();
    for row in rows {
        match row {
            Ok(row) => valid.push(row),
            Err(SyncError::Validation(reason)) => {
                debug!(kind, %reason, "Rejected row");
                *rejected += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(valid)
}

/// Merges a slot's observed facts into the store against a resolved instance
pub struct FactSynchronizer {
    store: Arc<dyn LeagueStore>,
}

impl FactSynchronizer {
    pub fn new(store: Arc<dyn LeagueStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, slot), fields(slot = slot.slot_index))]
    pub async fn sync_slot(
        &self,
        user_id: Uuid,
        instance_id: i64,
        slot: &SlotSnapshot,
        now: DateTime<Utc>,
    ) -> Result<FactSummary> {
        let mut summary = FactSummary::default();

        // ==================== Link views ====================

        let details = LinkDetails {
            standings: slot.standings.clone(),
            squad_values: slot.squad_values.clone(),
            managers_by_team: slot.managers_by_team(),
        };
        self.store
            .update_link_details(user_id, instance_id, &details, now)
            .await?;

        let values = keep_valid(
            slot.squad_values
                .iter()
                .map(|row| parse_money(&row.value).map(|v| (row.club.clone(), v))),
            "squad_value",
            &mut summary.rejected,
        )?;
        if !values.is_empty() {
            if let Some(mut instance) = self.store.get_instance(instance_id).await? {
                summary.roster_updates = apply_squad_values(&mut instance.roster, &values);
                if summary.roster_updates > 0 {
                    self.store
                        .update_instance_roster(instance_id, &instance.roster, now)
                        .await?;
                }
            }
        }

        // ==================== Transfers ====================

        let transfers = keep_valid(
            slot.transfers
                .iter()
                .map(|raw| Transfer::from_raw(instance_id, raw, now)),
            "transfer",
            &mut summary.rejected,
        )?;
        summary.transfers = transfers.len();
        summary.new_transfers =
            retry_on_conflict("transfers", || self.store.upsert_transfers(&transfers)).await?;

        // ==================== Market ====================

        let listings = keep_valid(
            slot.market_listings
                .iter()
                .map(|raw| MarketListing::from_raw(instance_id, raw, now)),
            "market_listing",
            &mut summary.rejected,
        )?;
        let market = retry_on_conflict("market_listings", || {
            self.store.replace_market_listings(instance_id, &listings)
        })
        .await?;
        summary.market_active = market.active;
        summary.market_expired = market.expired;

        // ==================== Matches ====================

        let matches = keep_valid(
            slot.matches
                .iter()
                .map(|raw| MatchResult::from_raw(instance_id, raw)),
            "match",
            &mut summary.rejected,
        )?;
        summary.matches = matches.len();
        summary.new_matches =
            retry_on_conflict("matches", || self.store.upsert_matches(&matches)).await?;

        // ==================== Tactics ====================

        if let Some(capture) = &slot.tactics {
            let round = slot.next_match.as_ref().map(|m| m.round);
            match self.sync_tactics(instance_id, capture, round, now).await {
                Ok(()) => summary.tactics = 1,
                Err(SyncError::Validation(reason)) => {
                    debug!(%reason, "Rejected tactics");
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(?summary, "Slot facts synchronized");
        Ok(summary)
    }

    /// Upsert one tactics capture
    pub async fn sync_tactics(
        &self,
        instance_id: i64,
        capture: &TacticsCapture,
        fallback_round: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = TacticsRecord::from_capture(instance_id, capture, fallback_round, now)?;
        retry_on_conflict("tactics", || self.store.upsert_tactics(&record)).await
    }
}
