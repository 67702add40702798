use thiserror::Error;
use uuid::Uuid;

/// Main error type for the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Snapshot errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed slot {slot}: {reason}")]
    MalformedSlot { slot: u8, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Collection agent errors
    #[error("Credentials rejected for user {0}")]
    InvalidCredentials(Uuid),

    #[error("Collector error: {0}")]
    Collector(String),

    #[error("Collector timed out after {0}s")]
    CollectorTimeout(u64),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE classes
const DATA_EXCEPTION: &str = "22";
const INTEGRITY_VIOLATION: &str = "23";

impl SyncError {
    /// Whether retrying the whole run may succeed.
    ///
    /// Store outages and collector crashes are transient. Rejected credentials,
    /// bad configuration and malformed input never get better by retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Database(sqlx::Error::Database(db)) => match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) | None => true,
                // Data exceptions and integrity violations repeat on every attempt
                Some(code) => !(code.starts_with(DATA_EXCEPTION) || code.starts_with(INTEGRITY_VIOLATION)),
            },
            SyncError::Database(e) => !matches!(e, sqlx::Error::RowNotFound | sqlx::Error::ColumnNotFound(_)),
            SyncError::Io(_) | SyncError::Collector(_) | SyncError::CollectorTimeout(_) => true,
            _ => false,
        }
    }

    /// Credential rejection from the collection agent
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::InvalidCredentials(_))
    }

    /// Natural-key race between two writers (Postgres `23505`)
    pub fn is_unique_violation(&self) -> bool {
        match self {
            SyncError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}
