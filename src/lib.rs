pub mod adapters;
pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod sync;

pub use adapters::{CredentialStore, LeagueStore, MemoryStore, PostgresStore};
pub use collector::{ExternalAgent, FileCollector, SnapshotCollector, TacticsRequest};
pub use config::AppConfig;
pub use error::{Result, SyncError};
pub use orchestrator::{RunOrchestrator, RunReport, SlotOutcome, SlotReport};
pub use resolver::{ClaimedInstances, InstanceMatcher, LeagueCatalog};
pub use scheduler::{TacticsCaptureWorker, TaskScheduler, WorkerReport};
pub use sync::{FactSummary, FactSynchronizer};
