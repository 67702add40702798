//! League identity resolution: configuration type, then concrete instance

pub mod catalog;
pub mod instance;
pub mod league_type;

pub use catalog::{import_catalog, LeagueCatalog};
pub use instance::{
    select_candidate, ClaimedInstances, InstanceMatch, InstanceMatcher, MatchRequest, Selection,
};
pub use league_type::{resolve_league_type, TypeResolution};
