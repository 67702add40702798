use std::collections::BTreeSet;

use super::catalog::LeagueCatalog;

/// How a slot's league name was decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeResolution {
    /// The managed club belongs to exactly one configuration type
    Unique(String),
    /// Several types contain the club; the competitor overlap picked one
    ByOverlap { name: String, score: usize },
    /// No confident answer; the dashboard name is used as-is
    Fallback { name: String, candidates: usize },
}

impl TypeResolution {
    pub fn name(&self) -> &str {
        match self {
            TypeResolution::Unique(name) => name,
            TypeResolution::ByOverlap { name, .. } => name,
            TypeResolution::Fallback { name, .. } => name,
        }
    }

    pub fn is_confident(&self) -> bool {
        !matches!(self, TypeResolution::Fallback { .. })
    }
}

/// Map a managed club (plus the clubs it competes against) to a
/// configuration type name.
///
/// `competitors` must already be normalized. An ambiguous club is resolved
/// only when the best type shares strictly more than `min_share` of the
/// competitor set and no other type ties with it.
pub fn resolve_league_type(
    catalog: &LeagueCatalog,
    managed_club: &str,
    competitors: &BTreeSet<String>,
    dashboard_name: &str,
    min_share: f64,
) -> TypeResolution {
    let candidates = catalog.types_for_club(managed_club);
    let fallback = |candidates: usize| TypeResolution::Fallback {
        name: dashboard_name.trim().to_string(),
        candidates,
    };

    match candidates.as_slice() {
        [] => fallback(0),
        [only] => TypeResolution::Unique(only.to_string()),
        many => {
            let mut scored: Vec<(usize, &str)> = many
                .iter()
                .map(|name| {
                    let score = catalog
                        .roster_clubs(name)
                        .map(|roster| roster.intersection(competitors).count())
                        .unwrap_or(0);
                    (score, *name)
                })
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));

            let (best_score, best_name) = scored[0];
            let tied = scored.get(1).map_or(false, |(score, _)| *score == best_score);
            let required = min_share * competitors.len() as f64;

            if !tied && best_score as f64 > required {
                TypeResolution::ByOverlap {
                    name: best_name.to_string(),
                    score: best_score,
                }
            } else {
                fallback(many.len())
            }
        }
    }
}
