use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

use crate::adapters::LeagueStore;
use crate::domain::text::normalize_club_name;
use crate::domain::{LeagueConfigurationType, TeamEntry};
use crate::error::{Result, SyncError};

/// Load configuration types from a JSON file and upsert them by name.
///
/// Returns how many types were written.
pub async fn import_catalog(store: &dyn LeagueStore, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read(path).await?;
    let types: Vec<LeagueConfigurationType> = serde_json::from_slice(&raw)?;

    let mut seen = BTreeSet::new();
    for config_type in &types {
        let name = config_type.name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation("configuration type without name".into()));
        }
        if !seen.insert(name.to_string()) {
            return Err(SyncError::Validation(format!("duplicate configuration type {name}")));
        }
        if config_type.roster.is_empty() {
            return Err(SyncError::Validation(format!("{name} has an empty roster")));
        }
    }

    for config_type in &types {
        store.upsert_configuration_type(config_type).await?;
    }
    info!(count = types.len(), path = %path.display(), "Catalog imported");
    Ok(types.len())
}

/// Known configuration types with a club -> types reverse index
#[derive(Debug, Clone, Default)]
pub struct LeagueCatalog {
    types: BTreeMap<String, LeagueConfigurationType>,
    by_club: BTreeMap<String, BTreeSet<String>>,
    rosters: BTreeMap<String, BTreeSet<String>>,
}

impl LeagueCatalog {
    pub fn new(types: impl IntoIterator<Item = LeagueConfigurationType>) -> Self {
        let mut catalog = Self::default();
        for config_type in types {
            let roster: BTreeSet<String> = config_type
                .roster
                .iter()
                .map(|entry| normalize_club_name(&entry.club_name))
                .filter(|name| !name.is_empty())
                .collect();
            for club in &roster {
                catalog
                    .by_club
                    .entry(club.clone())
                    .or_default()
                    .insert(config_type.name.clone());
            }
            catalog.rosters.insert(config_type.name.clone(), roster);
            catalog.types.insert(config_type.name.clone(), config_type);
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LeagueConfigurationType> {
        self.types.get(name)
    }

    /// Types whose roster contains the club
    pub fn types_for_club(&self, club: &str) -> Vec<&str> {
        self.by_club
            .get(&normalize_club_name(club))
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Normalized club names of a type's roster
    pub fn roster_clubs(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.rosters.get(name)
    }

    /// Starting roster for a new instance of `name`
    pub fn seed_roster(&self, name: &str) -> Option<Vec<TeamEntry>> {
        self.types
            .get(name)
            .map(|t| t.roster.iter().map(TeamEntry::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RosterEntry;
    use rust_decimal_macros::dec;

    fn config_type(name: &str, clubs: &[&str]) -> LeagueConfigurationType {
        LeagueConfigurationType {
            name: name.to_string(),
            roster: clubs
                .iter()
                .map(|club| RosterEntry {
                    club_name: club.to_string(),
                    starting_squad_value: dec!(100),
                    fixed_income_per_round: dec!(2),
                })
                .collect(),
        }
    }

    #[test]
    fn test_reverse_index_uses_normalized_names() {
        let catalog = LeagueCatalog::new([
            config_type("Portugal", &["FC Porto", "Benfica"]),
            config_type("Champions", &["Porto", "Real Madrid"]),
        ]);

        assert_eq!(catalog.types_for_club("porto"), vec!["Champions", "Portugal"]);
        assert_eq!(catalog.types_for_club("Benfica"), vec!["Portugal"]);
        assert!(catalog.types_for_club("Ajax").is_empty());
    }

    #[test]
    fn test_seed_roster_copies_financials() {
        let catalog = LeagueCatalog::new([config_type("Portugal", &["Benfica"])]);
        let roster = catalog.seed_roster("Portugal").unwrap();
        assert_eq!(roster[0].current_value, dec!(100));
        assert!(catalog.seed_roster("Unknown").is_none());
    }

    #[tokio::test]
    async fn test_import_replaces_roster_by_name() {
        use crate::adapters::MemoryStore;

        let store = MemoryStore::new();
        let path = std::env::temp_dir().join(format!("catalog-{}.json", uuid::Uuid::new_v4()));
        let json = r#"[
            {"name": "Portugal", "roster": [
                {"club_name": "Benfica", "starting_squad_value": "310.5", "fixed_income_per_round": "4"}
            ]}
        ]"#;
        tokio::fs::write(&path, json).await.unwrap();

        assert_eq!(import_catalog(&store, &path).await.unwrap(), 1);
        assert_eq!(import_catalog(&store, &path).await.unwrap(), 1);
        tokio::fs::remove_file(&path).await.unwrap();

        let catalog = store.load_catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].roster[0].starting_squad_value, dec!(310.5));
    }
}
