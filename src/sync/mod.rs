pub mod facts;

pub use facts::{retry_on_conflict, FactSummary, FactSynchronizer};
