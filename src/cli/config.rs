//! Starboard configuration file handling
//!
//! Provides default configuration generation and loading for the operator
//! binary. Configuration files are TOML and live under the platform data
//! directory unless `--config` points elsewhere.
//!
//! ## Operator vs Community Settings
//!
//! This file holds OPERATOR settings only: database, relay transport, sweep
//! schedule, logging. Per-community settings (star threshold, self-star
//! policy, origin deletion) live in the database and are changed with the
//! `settings` command.

use serde::{Deserialize, Serialize};
use starboard::engine::{EngineConfig, DEFAULT_CLAIM_LEASE};
use starboard::relay::{
    publish_deadline, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_ORIGIN_DELETE_DELAY,
    DEFAULT_RELAY_BASE_URL,
};
use starboard::store::{Database, DatabaseOptions};
use starboard::sweeper::DEFAULT_SWEEP_INTERVAL;
use starboard::{ServiceConfig, SweeperConfig, UserId};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETENTION_DAYS: u64 = 30;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Starboard operator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarboardConfig {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub sweeper: SweeperSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the database lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Webhook endpoint; targets are posted to `{base_url}/{id}/{secret}`
    pub base_url: String,

    pub timeout_secs: u64,

    /// Delivery attempts per publish, first try included
    pub max_attempts: u32,

    /// Wait before deleting the star prompt of a relayed message
    pub origin_delete_delay_ms: u64,

    /// How long an unfinished publish blocks other publishers
    pub claim_lease_secs: u64,

    /// The starboard's own user id; its messages cannot be starred
    pub bot_user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperSection {
    pub interval_secs: u64,

    /// Messages older than this are purged and can no longer be starred
    pub retention_days: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_RELAY_BASE_URL.to_string(),
            timeout_secs: DEFAULT_RELAY_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            origin_delete_delay_ms: DEFAULT_ORIGIN_DELETE_DELAY.as_millis() as u64,
            claim_lease_secs: DEFAULT_CLAIM_LEASE.as_secs(),
            bot_user_id: None,
        }
    }
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl StarboardConfig {
    /// Create a new configuration with the given database path
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database: DatabaseConfig {
                path: database_path,
                max_connections: DEFAULT_MAX_CONNECTIONS,
                busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            },
            relay: RelayConfig::default(),
            sweeper: SweeperSection::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: StarboardConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    #[allow(dead_code)]
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".into());
        }
        if self.relay.max_attempts == 0 {
            return Err("relay.max_attempts must be at least 1".into());
        }
        if self.relay.timeout_secs == 0 {
            return Err("relay.timeout_secs must be at least 1".into());
        }
        if self.relay.claim_lease_secs == 0 {
            return Err("relay.claim_lease_secs must be at least 1".into());
        }

        // A publish still running when its claim expires lets a second one start
        let lease = Duration::from_secs(self.relay.claim_lease_secs);
        let worst_case = self
            .service_config()
            .retry
            .worst_case(Duration::from_secs(self.relay.timeout_secs));
        if worst_case >= publish_deadline(lease) {
            return Err(format!(
                "relay.claim_lease_secs = {} is too short: {} attempts of {}s can take {}, \
                 which must stay under three quarters of the lease",
                self.relay.claim_lease_secs,
                self.relay.max_attempts,
                self.relay.timeout_secs,
                humantime::format_duration(worst_case)
            )
            .into());
        }
        if self.sweeper.interval_secs == 0 {
            return Err("sweeper.interval_secs must be at least 1".into());
        }
        if self.sweeper.retention_days == 0 {
            return Err("sweeper.retention_days must be at least 1".into());
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.sweeper.retention_days * SECS_PER_DAY)
    }

    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.database.max_connections,
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweeper.interval_secs),
            retention: self.retention(),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            engine: EngineConfig {
                retention: self.retention(),
                claim_lease: Duration::from_secs(self.relay.claim_lease_secs),
                bot_user_id: self.relay.bot_user_id,
            },
            retry: RetryPolicy {
                max_attempts: self.relay.max_attempts,
                ..Default::default()
            },
            origin_delete_delay: Duration::from_millis(self.relay.origin_delete_delay_ms),
        }
    }

    /// Open the configured database and bring its schema up to date
    pub async fn open_database(&self) -> Result<Database, Box<dyn std::error::Error>> {
        let database = Database::open(&self.database.path, &self.database_options())
            .await
            .map_err(|e| {
                format!(
                    "Failed to open database '{}': {}",
                    self.database.path.display(),
                    e
                )
            })?;
        database.migrate().await?;
        Ok(database)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(database_path: &Path) -> String {
        format!(
            r#"# Starboard Configuration (Operator Settings)
#
# This file contains OPERATOR configuration only: where the database lives,
# how the relay talks to webhooks, how often expired messages are purged.
#
# COMMUNITY SETTINGS (star threshold, self stars, prompt deletion) are stored
# in the database. Change them with `starboard settings --community <id>`.

[database]
# Path to the SQLite database (created if missing)
path = "{database_path}"

# Connection pool size
max_connections = {max_connections}

# How long a writer waits for the database lock, in milliseconds
busy_timeout_ms = {busy_timeout_ms}

[relay]
# Webhook endpoint; messages are posted to <base_url>/<id>/<secret>
base_url = "{base_url}"

# Per-request timeout in seconds
timeout_secs = {timeout_secs}

# Delivery attempts per publish (refused connections and rate limits only)
max_attempts = {max_attempts}

# Delay before the star prompt of a relayed message is deleted, in milliseconds
origin_delete_delay_ms = {origin_delete_delay_ms}

# How long an unfinished publish blocks other publishers, in seconds.
# Must exceed timeout_secs * max_attempts plus backoff by a third.
claim_lease_secs = {claim_lease_secs}

# The starboard's own user id; messages it posted cannot be starred
# bot_user_id = 123456789012345678

[sweeper]
# Seconds between sweeps
interval_secs = {interval_secs}

# Messages older than this many days are purged and can no longer be starred
retention_days = {retention_days}

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "{log_level}"
"#,
            database_path = database_path.display(),
            max_connections = DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms = DEFAULT_BUSY_TIMEOUT_MS,
            base_url = DEFAULT_RELAY_BASE_URL,
            timeout_secs = DEFAULT_RELAY_TIMEOUT_SECS,
            max_attempts = DEFAULT_MAX_ATTEMPTS,
            origin_delete_delay_ms = DEFAULT_ORIGIN_DELETE_DELAY.as_millis(),
            claim_lease_secs = DEFAULT_CLAIM_LEASE.as_secs(),
            interval_secs = DEFAULT_SWEEP_INTERVAL.as_secs(),
            retention_days = DEFAULT_RETENTION_DAYS,
            log_level = DEFAULT_LOG_LEVEL,
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        database_path: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(database_path);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }

    /// Load the config at `config_path` (or the default path), generating a
    /// default file next to it if none exists yet
    pub fn load_or_create(
        config_path: Option<String>,
    ) -> Result<(PathBuf, Self), Box<dyn std::error::Error>> {
        let config_path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);

        if !config_path.exists() {
            let database_path = default_database_path(&config_path);
            Self::create_default(&config_path, &database_path)?;
            eprintln!("Created default configuration: {}", config_path.display());
        }

        let config = Self::load(&config_path)?;
        Ok((config_path, config))
    }
}

/// Data directory holding the config and database
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("starboard")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Get the default database path, stored adjacent to the config file
///
/// - Config: ~/.local/share/starboard/config.toml
/// - Database: ~/.local/share/starboard/starboard.db
pub fn default_database_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(default_data_dir)
        .join("starboard.db")
}
