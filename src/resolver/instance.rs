//! League instance matching
//!
//! Decides whether a slot continues an existing league instance or starts a
//! new one. Identity is inferred from the human managers seen in the
//! standings, compared against what co-participants saved earlier.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::LeagueCatalog;
use crate::adapters::LeagueStore;
use crate::domain::{InstanceCandidate, ManagerFingerprint, TeamEntry};
use crate::error::Result;

/// Instance ids already bound to a slot during the current run
#[derive(Debug, Clone, Default)]
pub struct ClaimedInstances(BTreeSet<i64>);

impl ClaimedInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already claimed
    pub fn claim(&mut self, id: i64) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.0.iter().copied().collect()
    }
}

/// Which existing instance, if any, a slot should continue
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Overlap ratio cleared the threshold
    Matched { instance_id: i64, ratio: f64 },
    /// No saved managers to compare against, or the current standings
    /// show none; reused at low confidence
    Fallback { instance_id: i64 },
    /// Start a new instance
    New { best_ratio: Option<f64> },
}

/// Requester's own link first, then the most recently updated, then the oldest id
fn preference(a: &InstanceCandidate, b: &InstanceCandidate) -> Ordering {
    a.linked_to_requester
        .cmp(&b.linked_to_requester)
        .then(a.updated_at.cmp(&b.updated_at))
        .then(b.instance_id.cmp(&a.instance_id))
}

/// Pure selection over unclaimed candidates
pub fn select_candidate(
    candidates: &[InstanceCandidate],
    current: &ManagerFingerprint,
    threshold: f64,
) -> Selection {
    let empty_saved = candidates
        .iter()
        .filter(|c| c.saved_fingerprint.is_empty())
        .max_by(|a, b| preference(a, b));

    if current.is_empty() {
        let own = candidates
            .iter()
            .filter(|c| c.linked_to_requester)
            .max_by(|a, b| preference(a, b));
        return match own.or(empty_saved) {
            Some(c) => Selection::Fallback {
                instance_id: c.instance_id,
            },
            None => Selection::New { best_ratio: None },
        };
    }

    let best = candidates
        .iter()
        .filter_map(|c| current.overlap_ratio(&c.saved_fingerprint).map(|r| (r, c)))
        .max_by(|(ra, a), (rb, b)| ra.total_cmp(rb).then_with(|| preference(a, b)));

    match best {
        Some((ratio, c)) if ratio >= threshold => Selection::Matched {
            instance_id: c.instance_id,
            ratio,
        },
        best => match empty_saved {
            Some(c) => Selection::Fallback {
                instance_id: c.instance_id,
            },
            None => Selection::New {
                best_ratio: best.map(|(r, _)| r),
            },
        },
    }
}

/// A slot's view of the league it needs an instance for
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    pub user_id: Uuid,
    /// Resolved type name, or the dashboard name when unresolved
    pub league_name: &'a str,
    pub fingerprint: &'a ManagerFingerprint,
    /// Used to synthesize a roster when the type is not in the catalog
    pub standings_clubs: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMatch {
    pub instance_id: i64,
    pub created: bool,
    pub link_created: bool,
    pub selection: Selection,
}

pub struct InstanceMatcher {
    store: Arc<dyn LeagueStore>,
    threshold: f64,
    /// Serializes search-then-create per league name within this process
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceMatcher {
    pub fn new(store: Arc<dyn LeagueStore>, threshold: f64) -> Self {
        Self {
            store,
            threshold,
            creation_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, league_name: &str) -> Arc<Mutex<()>> {
        self.creation_locks
            .entry(league_name.trim().to_lowercase())
            .or_default()
            .clone()
    }

    /// Resolve the slot to an instance id and claim it for this run
    pub async fn resolve(
        &self,
        catalog: &LeagueCatalog,
        request: &MatchRequest<'_>,
        claimed: &mut ClaimedInstances,
        now: DateTime<Utc>,
    ) -> Result<InstanceMatch> {
        let lock = self.lock_for(request.league_name);
        let _guard = lock.lock().await;

        let candidates: Vec<InstanceCandidate> = self
            .store
            .find_candidate_instances(request.league_name, request.user_id)
            .await?
            .into_iter()
            .filter(|c| !claimed.contains(c.instance_id))
            .collect();

        let selection = select_candidate(&candidates, request.fingerprint, self.threshold);
        debug!(
            league = request.league_name,
            candidates = candidates.len(),
            managers = request.fingerprint.len(),
            ?selection,
            "Instance selection"
        );

        match selection {
            Selection::Matched { instance_id, .. } | Selection::Fallback { instance_id } => {
                if let Selection::Fallback { .. } = selection {
                    warn!(
                        league = request.league_name,
                        instance_id, "Low-confidence instance match"
                    );
                }
                claimed.claim(instance_id);
                let link_created = self
                    .store
                    .activate_link(request.user_id, instance_id, now)
                    .await?;
                self.store
                    .touch_instance(instance_id, request.league_name, now)
                    .await?;

                Ok(InstanceMatch {
                    instance_id,
                    created: false,
                    link_created,
                    selection,
                })
            }
            Selection::New { best_ratio } => {
                let roster = catalog.seed_roster(request.league_name).unwrap_or_else(|| {
                    request
                        .standings_clubs
                        .iter()
                        .map(TeamEntry::unknown)
                        .collect()
                });
                let instance = self
                    .store
                    .create_instance(request.league_name, &roster, now)
                    .await?;
                claimed.claim(instance.id);
                self.store
                    .activate_link(request.user_id, instance.id, now)
                    .await?;

                info!(
                    league = request.league_name,
                    instance_id = instance.id,
                    ?best_ratio,
                    "Started new league instance"
                );

                Ok(InstanceMatch {
                    instance_id: instance.id,
                    created: true,
                    link_created: true,
                    selection,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(id: i64, managers: &[&str], linked: bool, age_secs: i64) -> InstanceCandidate {
        InstanceCandidate {
            instance_id: id,
            updated_at: Utc::now() - Duration::seconds(age_secs),
            saved_fingerprint: ManagerFingerprint::from_names(managers.iter().copied()),
            linked_to_requester: linked,
        }
    }

    fn fp(names: &[&str]) -> ManagerFingerprint {
        ManagerFingerprint::from_names(names.iter().copied())
    }

    #[test]
    fn test_reuses_instance_above_threshold() {
        let candidates = vec![candidate(1, &["A", "B", "C", "D"], false, 0)];
        assert_eq!(
            select_candidate(&candidates, &fp(&["A", "B", "C"]), 0.70),
            Selection::Matched {
                instance_id: 1,
                ratio: 0.75
            }
        );
    }

    #[test]
    fn test_disjoint_managers_start_new_instance() {
        let candidates = vec![candidate(1, &["A", "B", "C", "D"], true, 0)];
        assert_eq!(
            select_candidate(&candidates, &fp(&["E", "F"]), 0.70),
            Selection::New {
                best_ratio: Some(0.0)
            }
        );
    }

    #[test]
    fn test_empty_saved_fingerprint_is_fallback() {
        let candidates = vec![
            candidate(1, &["A", "B", "C", "D"], false, 0),
            candidate(2, &[], false, 0),
        ];
        assert_eq!(
            select_candidate(&candidates, &fp(&["E"]), 0.70),
            Selection::Fallback { instance_id: 2 }
        );
    }

    #[test]
    fn test_ties_prefer_requester_link_then_recency() {
        let candidates = vec![
            candidate(1, &["A", "B"], false, 0),
            candidate(2, &["A", "B"], true, 100),
            candidate(3, &["A", "B"], true, 10),
        ];
        assert_eq!(
            select_candidate(&candidates, &fp(&["A", "B"]), 0.70),
            Selection::Matched {
                instance_id: 3,
                ratio: 1.0
            }
        );
    }

    #[test]
    fn test_empty_current_fingerprint_prefers_own_link() {
        let candidates = vec![candidate(1, &[], false, 0), candidate(2, &["A"], true, 0)];
        assert_eq!(
            select_candidate(&candidates, &ManagerFingerprint::default(), 0.70),
            Selection::Fallback { instance_id: 2 }
        );
    }

    #[test]
    fn test_claim_is_exclusive() {
        let mut claimed = ClaimedInstances::new();
        assert!(claimed.claim(7));
        assert!(!claimed.claim(7));
        assert_eq!(claimed.ids(), vec![7]);
    }
}
