use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Heuristic thresholds for league resolution.
///
/// `instance_overlap_threshold` trades two failure modes against each other:
/// a low value risks merging two different real leagues that happen to share
/// a few managers, a high value risks splitting one league into spurious
/// "new seasons" when several managers leave or rename at once. Tune per
/// deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Minimum |current ∩ saved| / |saved| to reuse an existing instance
    #[serde(default = "default_overlap_threshold")]
    pub instance_overlap_threshold: f64,
    /// Share of the competitor set a candidate roster must exceed to resolve
    /// an ambiguous club name to a configuration type
    #[serde(default = "default_type_share")]
    pub type_min_competitor_share: f64,
}

fn default_overlap_threshold() -> f64 {
    0.70
}

fn default_type_share() -> f64 {
    0.30
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            instance_overlap_threshold: default_overlap_threshold(),
            type_min_competitor_share: default_type_share(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncConfig {
    /// League names that are never synchronized (cup competitions etc.)
    #[serde(default)]
    pub ignored_leagues: Vec<String>,
}

impl SyncConfig {
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_leagues
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Delay after kickoff before the live tactics view is captured
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: u64,
    /// How often the tactics worker polls for due tasks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum tasks claimed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Claims older than this are considered abandoned
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,
}

fn default_safety_margin() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    50
}

fn default_claim_timeout() -> u64 {
    1800
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            claim_timeout_secs: default_claim_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Attempts per user run (transient failures only)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,
    /// Maximum backoff delay
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Users synchronized concurrently by `sync-all`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    120
}

fn default_concurrency() -> usize {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            concurrency: default_concurrency(),
        }
    }
}

impl RunConfig {
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let delay = self
            .base_backoff_secs
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_secs(delay.min(self.max_backoff_secs))
    }
}

/// External data-collection agent
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Program to spawn (e.g. "osm-agent")
    #[serde(default = "default_agent_program")]
    pub program: String,
    /// Arguments placed before the subcommand
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit code the agent uses when the site rejects the login
    #[serde(default = "default_auth_exit_code")]
    pub auth_failure_exit_code: i32,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_agent_program() -> String {
    "osm-agent".to_string()
}

fn default_auth_exit_code() -> i32 {
    3
}

fn default_agent_timeout() -> u64 {
    900
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: Vec::new(),
            auth_failure_exit_code: default_auth_exit_code(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Run against the in-memory store instead of PostgreSQL
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "postgres://localhost/leaguesync")?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific file (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LEAGUESYNC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // LEAGUESYNC_DATABASE__URL, LEAGUESYNC_MATCHING__INSTANCE_OVERLAP_THRESHOLD, ...
            .add_source(
                Environment::with_prefix("LEAGUESYNC")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("sync.ignored_leagues")
                    .with_list_parse_key("agent.args")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration used when no file is present
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/leaguesync".to_string(),
                max_connections: default_max_connections(),
            },
            matching: MatchingConfig::default(),
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
            run: RunConfig::default(),
            agent: AgentConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let overlap = self.matching.instance_overlap_threshold;
        if !(overlap > 0.0 && overlap <= 1.0) {
            errors.push("matching.instance_overlap_threshold must be in (0, 1]".to_string());
        }

        let share = self.matching.type_min_competitor_share;
        if !(share > 0.0 && share <= 1.0) {
            errors.push("matching.type_min_competitor_share must be in (0, 1]".to_string());
        }

        if self.run.max_attempts == 0 {
            errors.push("run.max_attempts must be at least 1".to_string());
        }

        if self.run.concurrency == 0 {
            errors.push("run.concurrency must be at least 1".to_string());
        }

        if self.scheduler.batch_size <= 0 {
            errors.push("scheduler.batch_size must be positive".to_string());
        }

        if self.agent.program.trim().is_empty() {
            errors.push("agent.program must not be empty".to_string());
        }

        if !self.dry_run.enabled && self.database.url.trim().is_empty() {
            errors.push("database.url is required unless dry_run is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
