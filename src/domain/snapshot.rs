//! Snapshot model produced by the collection agent
//!
//! One `Snapshot` per user run. Every slot the user manages is described
//! independently; the agent flags slots it could not read consistently
//! instead of handing over half-populated data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::text::{is_human_manager, normalize_club_name, parse_countdown};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub slots: Vec<SlotSnapshot>,
}

/// Whether the agent could read a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Ok,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub slot_index: u8,
    #[serde(default)]
    pub status: SlotStatus,
    /// League name as shown on the career dashboard
    pub dashboard_name: String,
    /// The user's own club in this slot
    pub managed_club_name: String,
    #[serde(default)]
    pub competitor_club_names: Vec<String>,
    #[serde(default)]
    pub standings: Vec<StandingRow>,
    #[serde(default)]
    pub squad_values: Vec<SquadValueRow>,
    #[serde(default)]
    pub transfers: Vec<RawTransfer>,
    #[serde(default)]
    pub market_listings: Vec<RawMarketListing>,
    #[serde(default)]
    pub matches: Vec<RawMatch>,
    #[serde(default)]
    pub tactics: Option<TacticsCapture>,
    #[serde(default)]
    pub next_match: Option<NextMatch>,
}

impl SlotSnapshot {
    /// Normalized names of the clubs competing in this slot's league.
    ///
    /// Falls back to the standings when the agent did not list competitors.
    pub fn competitor_set(&self) -> BTreeSet<String> {
        let names: Box<dyn Iterator<Item = &String>> = if self.competitor_club_names.is_empty() {
            Box::new(self.standings.iter().map(|row| &row.club))
        } else {
            Box::new(self.competitor_club_names.iter())
        };
        names
            .map(|name| normalize_club_name(name))
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Human managers currently in the standings
    pub fn manager_fingerprint(&self) -> ManagerFingerprint {
        ManagerFingerprint::from_names(self.standings.iter().map(|row| row.manager.as_str()))
    }

    /// Club -> manager for human-run clubs
    pub fn managers_by_team(&self) -> BTreeMap<String, String> {
        self.standings
            .iter()
            .filter(|row| is_human_manager(&row.manager))
            .map(|row| (row.club.clone(), row.manager.trim().to_string()))
            .collect()
    }

    /// Club names in standings order, for synthesizing an unknown roster
    pub fn standings_clubs(&self) -> Vec<String> {
        let mut rows: Vec<&StandingRow> = self.standings.iter().collect();
        rows.sort_by_key(|row| row.position);
        rows.into_iter().map(|row| row.club.clone()).collect()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SlotStatus::Failed { .. })
    }
}

/// Set of human manager names observed in a league at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerFingerprint(BTreeSet<String>);

impl ManagerFingerprint {
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            names
                .into_iter()
                .filter(|name| is_human_manager(name))
                .map(|name| name.trim().to_string())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn extend(&mut self, other: &ManagerFingerprint) {
        self.0.extend(other.0.iter().cloned());
    }

    /// |self ∩ saved| / |saved|, or `None` when `saved` is empty
    pub fn overlap_ratio(&self, saved: &ManagerFingerprint) -> Option<f64> {
        if saved.is_empty() {
            return None;
        }
        let shared = self.0.intersection(&saved.0).count();
        Some(shared as f64 / saved.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub position: i32,
    pub club: String,
    #[serde(default)]
    pub manager: String,
    #[serde(default)]
    pub played: i32,
    #[serde(default)]
    pub won: i32,
    #[serde(default)]
    pub drawn: i32,
    #[serde(default)]
    pub lost: i32,
    #[serde(default)]
    pub points: i32,
    #[serde(default)]
    pub goals_for: i32,
    #[serde(default)]
    pub goals_against: i32,
    #[serde(default)]
    pub goal_difference: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadValueRow {
    pub position: i32,
    pub club: String,
    #[serde(default)]
    pub manager: String,
    /// Display text, e.g. "245.3M"
    pub value: String,
    #[serde(default)]
    pub players: i32,
    #[serde(default)]
    pub average_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransfer {
    pub player_name: String,
    /// "Club\nManager" of the selling side
    pub from: String,
    /// "Club\nManager" of the buying side
    pub to: String,
    #[serde(default)]
    pub position: Option<String>,
    pub round: i32,
    /// Display text of the player's base value
    pub value: String,
    /// Display text of the agreed price
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMarketListing {
    pub name: String,
    #[serde(default)]
    pub seller_manager: Option<String>,
    #[serde(default)]
    pub seller_team: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub attack: Option<i32>,
    #[serde(default)]
    pub defense: Option<i32>,
    #[serde(default)]
    pub overall: Option<i32>,
    pub price: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub minute: i32,
    #[serde(rename = "type")]
    pub kind: String,
    pub side: String,
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatPair {
    pub home: String,
    pub away: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player: String,
    pub grade: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchRatings {
    #[serde(default)]
    pub home: Vec<PlayerRating>,
    #[serde(default)]
    pub away: Vec<PlayerRating>,
}

impl MatchRatings {
    pub fn is_empty(&self) -> bool {
        self.home.is_empty() && self.away.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatch {
    pub round: i32,
    pub home_team: String,
    #[serde(default)]
    pub home_manager: Option<String>,
    pub away_team: String,
    #[serde(default)]
    pub away_manager: Option<String>,
    pub home_goals: i32,
    pub away_goals: i32,
    #[serde(default)]
    pub events: Vec<MatchEvent>,
    #[serde(default)]
    pub statistics: BTreeMap<String, StatPair>,
    #[serde(default)]
    pub ratings: MatchRatings,
    #[serde(default)]
    pub referee: Option<String>,
    #[serde(default)]
    pub referee_strictness: Option<String>,
}

/// Tactical setup as shown on the tactics page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticsCapture {
    pub team_name: String,
    /// Round the setup applies to; defaults to the slot's next match
    #[serde(default)]
    pub round: Option<i32>,
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextMatch {
    pub round: i32,
    /// Seconds until kickoff; zero when no countdown is running
    #[serde(default)]
    pub countdown_seconds: u64,
    /// Countdown as displayed, e.g. "02d 06h 05m 30s"
    #[serde(default)]
    pub countdown: Option<String>,
    #[serde(default)]
    pub is_cup_match: bool,
    #[serde(default)]
    pub referee: Option<String>,
    #[serde(default)]
    pub referee_strictness: Option<String>,
}

impl NextMatch {
    /// Seconds until kickoff, read from the displayed countdown when the
    /// agent did not convert it
    pub fn seconds_until_kickoff(&self) -> u64 {
        match (self.countdown_seconds, &self.countdown) {
            (0, Some(text)) => parse_countdown(text),
            (seconds, _) => seconds,
        }
    }
}
