use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::{ManagerFingerprint, SquadValueRow, StandingRow};
use super::text::normalize_club_name;

/// One club of a configuration type's fixed roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub club_name: String,
    /// Millions
    pub starting_squad_value: Decimal,
    /// Millions per round
    pub fixed_income_per_round: Decimal,
}

/// Named roster template offered by the simulation.
///
/// Reference data; the same club name can appear in several types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueConfigurationType {
    pub name: String,
    pub roster: Vec<RosterEntry>,
}

/// Team as tracked inside a running league instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamEntry {
    pub club_name: String,
    pub starting_squad_value: Decimal,
    pub fixed_income_per_round: Decimal,
    pub current_value: Decimal,
}

impl From<&RosterEntry> for TeamEntry {
    fn from(entry: &RosterEntry) -> Self {
        Self {
            club_name: entry.club_name.clone(),
            starting_squad_value: entry.starting_squad_value,
            fixed_income_per_round: entry.fixed_income_per_round,
            current_value: entry.starting_squad_value,
        }
    }
}

impl TeamEntry {
    /// Entry for a club missing from the catalog
    pub fn unknown(club_name: impl Into<String>) -> Self {
        Self {
            club_name: club_name.into(),
            starting_squad_value: Decimal::ZERO,
            fixed_income_per_round: Decimal::ZERO,
            current_value: Decimal::ZERO,
        }
    }
}

/// Update `current_value` of roster entries from parsed squad values.
///
/// Returns how many entries changed.
pub fn apply_squad_values(roster: &mut [TeamEntry], values: &[(String, Decimal)]) -> usize {
    let mut changed = 0;
    for team in roster.iter_mut() {
        let key = normalize_club_name(&team.club_name);
        if let Some((_, value)) = values
            .iter()
            .find(|(club, _)| normalize_club_name(club) == key)
        {
            if team.current_value != *value {
                team.current_value = *value;
                changed += 1;
            }
        }
    }
    changed
}

/// One concrete run of a configuration type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueInstance {
    pub id: i64,
    pub name: String,
    pub roster: Vec<TeamEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's view of one league instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLeagueLink {
    pub user_id: Uuid,
    pub league_instance_id: i64,
    pub is_active: bool,
    pub standings: Vec<StandingRow>,
    pub squad_values: Vec<SquadValueRow>,
    pub managers_by_team: std::collections::BTreeMap<String, String>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub calendar_scraped: bool,
    pub created_at: DateTime<Utc>,
}

impl UserLeagueLink {
    pub fn new(user_id: Uuid, league_instance_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            league_instance_id,
            is_active: true,
            standings: Vec::new(),
            squad_values: Vec::new(),
            managers_by_team: Default::default(),
            last_scraped_at: Some(now),
            calendar_scraped: false,
            created_at: now,
        }
    }
}

/// Point-in-time league views written onto a link
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkDetails {
    pub standings: Vec<StandingRow>,
    pub squad_values: Vec<SquadValueRow>,
    pub managers_by_team: std::collections::BTreeMap<String, String>,
}

/// Existing instance considered by the matcher
#[derive(Debug, Clone)]
pub struct InstanceCandidate {
    pub instance_id: i64,
    pub updated_at: DateTime<Utc>,
    /// Union of manager names saved on the instance's active links
    pub saved_fingerprint: ManagerFingerprint,
    /// Whether the requesting user already has a link to it
    pub linked_to_requester: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_team_entry_starts_at_roster_value() {
        let entry = RosterEntry {
            club_name: "Arsenal".to_string(),
            starting_squad_value: dec!(245.30),
            fixed_income_per_round: dec!(3.5),
        };
        let team = TeamEntry::from(&entry);
        assert_eq!(team.current_value, dec!(245.30));
    }

    #[test]
    fn test_apply_squad_values_matches_normalized_names() {
        let mut roster = vec![TeamEntry::unknown("FC Porto"), TeamEntry::unknown("Benfica")];
        let values = vec![("Porto".to_string(), dec!(120.5))];

        assert_eq!(apply_squad_values(&mut roster, &values), 1);
        assert_eq!(roster[0].current_value, dec!(120.5));
        assert_eq!(roster[1].current_value, Decimal::ZERO);

        // second application is a no-op
        assert_eq!(apply_squad_values(&mut roster, &values), 0);
    }
}
