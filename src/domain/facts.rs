//! Fact rows keyed by league instance
//!
//! Each type carries the natural key the store enforces; conversions from
//! the raw snapshot rows live here so malformed rows are rejected before
//! anything touches storage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::snapshot::{
    MatchEvent, MatchRatings, RawMarketListing, RawMatch, RawTransfer, StatPair, TacticsCapture,
};
use super::text::{is_human_manager, parse_money, split_club_manager};
use crate::error::{Result, SyncError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Purchase,
    Sale,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TransactionType::Purchase),
            "sale" => Some(TransactionType::Sale),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key: (league_instance_id, round, player_name, manager_name, final_price)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub league_instance_id: i64,
    pub round: i32,
    pub player_name: String,
    /// The human manager this transfer is attributed to
    pub manager_name: String,
    pub seller_manager: Option<String>,
    pub buyer_manager: Option<String>,
    pub transaction_type: TransactionType,
    pub position: Option<String>,
    pub base_value: Decimal,
    pub final_price: Decimal,
    pub from_text: String,
    pub to_text: String,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Build from a raw row. CPU-to-CPU moves have no manager and are rejected.
    pub fn from_raw(instance_id: i64, raw: &RawTransfer, now: DateTime<Utc>) -> Result<Self> {
        let (_, seller) = split_club_manager(&raw.from);
        let (_, buyer) = split_club_manager(&raw.to);

        let (manager_name, transaction_type) = match (&buyer, &seller) {
            (Some(buyer), _) => (buyer.clone(), TransactionType::Purchase),
            (None, Some(seller)) => (seller.clone(), TransactionType::Sale),
            (None, None) => {
                return Err(SyncError::Validation(format!(
                    "transfer of {} has no human manager",
                    raw.player_name
                )))
            }
        };

        let player_name = raw.player_name.trim().to_string();
        if player_name.is_empty() {
            return Err(SyncError::Validation("transfer without player name".into()));
        }

        Ok(Self {
            league_instance_id: instance_id,
            round: raw.round,
            player_name,
            manager_name,
            seller_manager: seller,
            buyer_manager: buyer,
            transaction_type,
            position: raw.position.clone(),
            base_value: parse_money(&raw.value)?,
            final_price: parse_money(&raw.price)?,
            from_text: raw.from.clone(),
            to_text: raw.to.clone(),
            created_at: now,
        })
    }
}

/// Natural key: (league_instance_id, name, seller_manager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub league_instance_id: i64,
    pub name: String,
    /// Empty when the seller is the computer
    pub seller_manager: String,
    pub nationality: Option<String>,
    pub position: Option<String>,
    pub age: Option<i32>,
    pub seller_team: Option<String>,
    pub attack: Option<i32>,
    pub defense: Option<i32>,
    pub overall: Option<i32>,
    pub price: Decimal,
    pub base_value: Decimal,
    pub captured_at: DateTime<Utc>,
    pub is_active: bool,
}

impl MarketListing {
    pub fn from_raw(instance_id: i64, raw: &RawMarketListing, now: DateTime<Utc>) -> Result<Self> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(SyncError::Validation("market listing without player name".into()));
        }
        let seller_manager = raw
            .seller_manager
            .as_deref()
            .filter(|m| is_human_manager(m))
            .map(|m| m.trim().to_string())
            .unwrap_or_default();

        Ok(Self {
            league_instance_id: instance_id,
            name,
            seller_manager,
            nationality: raw.nationality.clone(),
            position: raw.position.clone(),
            age: raw.age,
            seller_team: raw.seller_team.clone(),
            attack: raw.attack,
            defense: raw.defense,
            overall: raw.overall,
            price: parse_money(&raw.price)?,
            base_value: parse_money(&raw.value)?,
            captured_at: now,
            is_active: true,
        })
    }
}

/// Natural key: (league_instance_id, round, home_team, away_team)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub league_instance_id: i64,
    pub round: i32,
    pub home_team: String,
    pub home_manager: Option<String>,
    pub away_team: String,
    pub away_manager: Option<String>,
    pub home_goals: i32,
    pub away_goals: i32,
    pub events: Vec<MatchEvent>,
    pub statistics: BTreeMap<String, StatPair>,
    pub ratings: MatchRatings,
    pub referee: Option<String>,
    pub referee_strictness: Option<String>,
}

impl MatchResult {
    pub fn from_raw(instance_id: i64, raw: &RawMatch) -> Result<Self> {
        let home_team = raw.home_team.trim().to_string();
        let away_team = raw.away_team.trim().to_string();
        if home_team.is_empty() || away_team.is_empty() {
            return Err(SyncError::Validation(format!(
                "round {} match is missing a team",
                raw.round
            )));
        }
        if raw.home_goals < 0 || raw.away_goals < 0 {
            return Err(SyncError::Validation(format!(
                "{home_team} vs {away_team}: negative score"
            )));
        }

        let human = |m: &Option<String>| {
            m.as_deref()
                .filter(|m| is_human_manager(m))
                .map(|m| m.trim().to_string())
        };

        Ok(Self {
            league_instance_id: instance_id,
            round: raw.round,
            home_team,
            home_manager: human(&raw.home_manager),
            away_team,
            away_manager: human(&raw.away_manager),
            home_goals: raw.home_goals,
            away_goals: raw.away_goals,
            events: raw.events.clone(),
            statistics: raw.statistics.clone(),
            ratings: raw.ratings.clone(),
            referee: raw.referee.clone(),
            referee_strictness: raw.referee_strictness.clone(),
        })
    }

    /// Fold a later scrape of the same match into this row.
    ///
    /// Detail lists are only replaced by non-empty ones.
    pub fn refine(&mut self, newer: MatchResult) {
        self.home_manager = newer.home_manager;
        self.away_manager = newer.away_manager;
        self.home_goals = newer.home_goals;
        self.away_goals = newer.away_goals;
        self.referee = newer.referee;
        self.referee_strictness = newer.referee_strictness;
        if !newer.events.is_empty() {
            self.events = newer.events;
        }
        if !newer.statistics.is_empty() {
            self.statistics = newer.statistics;
        }
        if !newer.ratings.is_empty() {
            self.ratings = newer.ratings;
        }
    }
}

/// Natural key: (league_instance_id, round, team_name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticsRecord {
    pub league_instance_id: i64,
    pub round: i32,
    pub team_name: String,
    pub game_plan: String,
    pub tackling: String,
    pub pressure: i32,
    pub mentality: i32,
    pub tempo: i32,
    pub forwards_tactic: String,
    pub midfielders_tactic: String,
    pub defenders_tactic: String,
    pub offside_trap: bool,
    pub marking: String,
    pub captured_at: DateTime<Utc>,
}

impl TacticsRecord {
    /// `fallback_round` is used when the capture does not name its round
    pub fn from_capture(
        instance_id: i64,
        capture: &TacticsCapture,
        fallback_round: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let round = capture.round.or(fallback_round).ok_or_else(|| {
            SyncError::Validation(format!("tactics of {} have no round", capture.team_name))
        })?;
        let team_name = capture.team_name.trim().to_string();
        if team_name.is_empty() {
            return Err(SyncError::Validation("tactics without team name".into()));
        }

        Ok(Self {
            league_instance_id: instance_id,
            round,
            team_name,
            game_plan: capture.game_plan.clone(),
            tackling: capture.tackling.clone(),
            pressure: capture.pressure,
            mentality: capture.mentality,
            tempo: capture.tempo,
            forwards_tactic: capture.forwards_tactic.clone(),
            midfielders_tactic: capture.midfielders_tactic.clone(),
            defenders_tactic: capture.defenders_tactic.clone(),
            offside_trap: capture.offside_trap,
            marking: capture.marking.clone(),
            captured_at: now,
        })
    }
}
