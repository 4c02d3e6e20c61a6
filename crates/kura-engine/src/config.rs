//! # Engine Configuration
//!
//! Timeouts, database location, commission rates and loyalty switches.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KURA_DB_PATH=/var/lib/kura/kura.db                                 │
//! │     KURA_TERMINAL_TIMEOUT_SECS=300                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kura/kura.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.kura.engine/kura.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kura.toml
//! [database]
//! path = "/var/lib/kura/kura.db"
//! lock_wait_secs = 5
//! unit_of_work_timeout_secs = 120
//!
//! [payment]
//! terminal_timeout_secs = 300
//! refund_wait_timeout_secs = 60
//!
//! [commission.rates]
//! cash = 10
//! bank = 10
//! card = 13
//! e_money = 13
//! qr = 13
//!
//! [store]
//! points_enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use kura_core::{CommissionTable, PaymentMethod};
use kura_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; `:memory:` for an in-memory database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Bounded wait for the write lock (seconds).
    #[serde(default = "default_lock_wait")]
    pub lock_wait_secs: u64,

    /// Bounded total run time of one unit of work (seconds).
    #[serde(default = "default_uow_timeout")]
    pub unit_of_work_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "kura", "engine")
        .map(|dirs| dirs.data_dir().join("kura.db"))
        .unwrap_or_else(|| PathBuf::from("kura.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_wait() -> u64 {
    5
}

fn default_uow_timeout() -> u64 {
    120
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            lock_wait_secs: default_lock_wait(),
            unit_of_work_timeout_secs: default_uow_timeout(),
        }
    }
}

// =============================================================================
// Payment Settings
// =============================================================================

/// Terminal watchdog and refund polling.
///
/// ## Refund Wait
/// ```text
/// create_refund ──► poll refund_status
///                      │  500ms, 1s, 2s, 4s, 5s, 5s ... (capped at max)
///                      ▼
///               succeeded ──► return completes
///               gave up after refund_wait_timeout ──► ExternalPaymentFailure
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Delay before an unconfirmed terminal checkout is canceled (seconds).
    #[serde(default = "default_terminal_timeout")]
    pub terminal_timeout_secs: u64,

    /// Total time a return waits for refund confirmation (seconds).
    #[serde(default = "default_refund_wait_timeout")]
    pub refund_wait_timeout_secs: u64,

    /// First refund poll interval (milliseconds).
    #[serde(default = "default_refund_poll_initial")]
    pub refund_poll_initial_ms: u64,

    /// Longest refund poll interval (milliseconds).
    #[serde(default = "default_refund_poll_max")]
    pub refund_poll_max_ms: u64,
}

fn default_terminal_timeout() -> u64 {
    300
}

fn default_refund_wait_timeout() -> u64 {
    60
}

fn default_refund_poll_initial() -> u64 {
    500
}

fn default_refund_poll_max() -> u64 {
    5000
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            terminal_timeout_secs: default_terminal_timeout(),
            refund_wait_timeout_secs: default_refund_wait_timeout(),
            refund_poll_initial_ms: default_refund_poll_initial(),
            refund_poll_max_ms: default_refund_poll_max(),
        }
    }
}

// =============================================================================
// Commission Settings
// =============================================================================

/// Consignment commission percent per payment method name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionSettings {
    #[serde(default = "default_rates")]
    pub rates: BTreeMap<String, i64>,
}

fn default_rates() -> BTreeMap<String, i64> {
    [("cash", 10), ("bank", 10), ("card", 13), ("e_money", 13), ("qr", 13)]
        .into_iter()
        .map(|(method, percent)| (method.to_string(), percent))
        .collect()
}

impl Default for CommissionSettings {
    fn default() -> Self {
        CommissionSettings {
            rates: default_rates(),
        }
    }
}

impl CommissionSettings {
    /// Parses the method names into a [`CommissionTable`].
    pub fn table(&self) -> EngineResult<CommissionTable> {
        let mut rates = BTreeMap::new();
        for (name, percent) in &self.rates {
            let method: PaymentMethod = name.parse().map_err(EngineError::Config)?;
            if !(0..=100).contains(percent) {
                return Err(EngineError::Config(format!(
                    "commission rate for {} must be between 0 and 100, got {}",
                    name, percent
                )));
            }
            rates.insert(method, *percent);
        }
        Ok(CommissionTable::new(rates))
    }
}

// =============================================================================
// Store Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Credit and debit loyalty points on completion.
    #[serde(default = "default_true")]
    pub points_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            points_enabled: true,
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub payment: PaymentSettings,

    #[serde(default)]
    pub commission: CommissionSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kura.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(EngineError::Config("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.lock_wait_secs == 0 || self.database.unit_of_work_timeout_secs == 0 {
            return Err(EngineError::Config(
                "database timeouts must be greater than 0".into(),
            ));
        }
        if self.database.lock_wait_secs > self.database.unit_of_work_timeout_secs {
            return Err(EngineError::Config(
                "database.lock_wait_secs must not exceed unit_of_work_timeout_secs".into(),
            ));
        }
        if self.payment.terminal_timeout_secs == 0 {
            return Err(EngineError::Config(
                "payment.terminal_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.payment.refund_wait_timeout_secs >= self.database.unit_of_work_timeout_secs {
            return Err(EngineError::Config(
                "payment.refund_wait_timeout_secs must be shorter than unit_of_work_timeout_secs".into(),
            ));
        }
        if self.payment.refund_poll_initial_ms == 0
            || self.payment.refund_poll_initial_ms > self.payment.refund_poll_max_ms
        {
            return Err(EngineError::Config(
                "payment.refund_poll_initial_ms must be between 1 and refund_poll_max_ms".into(),
            ));
        }
        self.commission.table()?;
        Ok(())
    }

    /// Applies `KURA_*` overrides read through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("KURA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        let seconds = |key: &str| -> Option<u64> {
            let raw = var(key)?;
            match raw.parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring non-numeric environment override");
                    None
                }
            }
        };

        if let Some(secs) = seconds("KURA_LOCK_WAIT_SECS") {
            self.database.lock_wait_secs = secs;
        }
        if let Some(secs) = seconds("KURA_UOW_TIMEOUT_SECS") {
            self.database.unit_of_work_timeout_secs = secs;
        }
        if let Some(secs) = seconds("KURA_TERMINAL_TIMEOUT_SECS") {
            debug!(secs, "Overriding terminal timeout from environment");
            self.payment.terminal_timeout_secs = secs;
        }
        if let Some(secs) = seconds("KURA_REFUND_WAIT_TIMEOUT_SECS") {
            self.payment.refund_wait_timeout_secs = secs;
        }

        if let Some(flag) = var("KURA_POINTS_ENABLED") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.store.points_enabled = true,
                "0" | "false" | "no" => self.store.points_enabled = false,
                _ => warn!(value = %flag, "Unknown KURA_POINTS_ENABLED value in environment"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kura", "engine")
            .map(|dirs| dirs.config_dir().join("kura.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Pool settings for [`kura_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        if self.database.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory().lock_wait(self.lock_wait());
        }
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .lock_wait(self.lock_wait())
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.database.lock_wait_secs)
    }

    pub fn unit_of_work_timeout(&self) -> Duration {
        Duration::from_secs(self.database.unit_of_work_timeout_secs)
    }

    pub fn terminal_timeout(&self) -> Duration {
        Duration::from_secs(self.payment.terminal_timeout_secs)
    }

    pub fn refund_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.payment.refund_wait_timeout_secs)
    }

    pub fn refund_poll_initial(&self) -> Duration {
        Duration::from_millis(self.payment.refund_poll_initial_ms)
    }

    pub fn refund_poll_max(&self) -> Duration {
        Duration::from_millis(self.payment.refund_poll_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database.lock_wait_secs, 5);
        assert_eq!(config.database.unit_of_work_timeout_secs, 120);
        assert_eq!(config.terminal_timeout(), Duration::from_secs(300));
        assert!(config.store.points_enabled);
        assert!(config.validate().is_ok());

        let table = config.commission.table().unwrap();
        assert_eq!(table.percent_for(PaymentMethod::Cash), 10);
        assert_eq!(table.percent_for(PaymentMethod::Qr), 13);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [payment]
            terminal_timeout_secs = 90

            [commission.rates]
            cash = 8
            card = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.payment.terminal_timeout_secs, 90);
        assert_eq!(config.payment.refund_wait_timeout_secs, 60);
        assert_eq!(config.database.lock_wait_secs, 5);

        let table = config.commission.table().unwrap();
        assert_eq!(table.percent_for(PaymentMethod::Card), 15);
        // methods without a row pay nothing
        assert_eq!(table.percent_for(PaymentMethod::Qr), 0);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KURA_DB_PATH", "/tmp/kura-override.db"),
            ("KURA_TERMINAL_TIMEOUT_SECS", "45"),
            ("KURA_LOCK_WAIT_SECS", "soon"),
            ("KURA_POINTS_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/kura-override.db"));
        assert_eq!(config.payment.terminal_timeout_secs, 45);
        assert_eq!(config.database.lock_wait_secs, 5);
        assert!(!config.store.points_enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.database.lock_wait_secs = 300;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.commission.rates.insert("cheque".to_string(), 5);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.commission.rates.insert("card".to_string(), 130);
        assert!(config.validate().is_err());

        // the refund poll runs inside a unit of work and must end first
        let mut config = EngineConfig::default();
        config.database.unit_of_work_timeout_secs = 60;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        config.payment.refund_wait_timeout_secs = 45;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("kura-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[database]\npath = \":memory:\"\nunit_of_work_timeout_secs = 90\n")
            .unwrap();

        let config = EngineConfig::load(Some(path.clone())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.database.unit_of_work_timeout_secs, 90);
        assert_eq!(config.db_config().max_connections, 1);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let path = std::env::temp_dir().join(format!("kura-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[database\npath = ").unwrap();

        let result = EngineConfig::load(Some(path.clone()));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
