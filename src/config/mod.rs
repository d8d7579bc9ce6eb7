//! Typed configuration.
//!
//! Defaults, then an optional TOML file, then environment variables. Loaded
//! once at startup; bad values fail fast with [`Error::Config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::WorkerId;

pub const ENV_CONFIG_FILE: &str = "TRANSFER_STORE_CONFIG";
pub const ENV_DIRECTORY: &str = "TRANSFER_STORE_DIRECTORY";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "TRANSFER_STORE_REFRESH_INTERVAL_SECS";
pub const ENV_CLAIM_TIMEOUT_SECS: &str = "TRANSFER_STORE_CLAIM_TIMEOUT_SECS";
pub const ENV_RETENTION_HOURS: &str = "TRANSFER_STORE_RETENTION_HOURS";
pub const ENV_WORKER_ID: &str = "TRANSFER_STORE_WORKER_ID";

/// Process-level configuration for binaries embedding the store.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Like [`from_env`](Self::from_env), but `config_file` (when given)
    /// replaces the file named by `TRANSFER_STORE_CONFIG`.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::load_from(config_file, |name| std::env::var(name).ok())
    }

    /// [`load`](Self::load) with environment lookups going through `lookup`.
    pub fn load_from<F>(config_file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => lookup(ENV_CONFIG_FILE)
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        };

        let mut store = match file {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::default(),
        };
        store.apply_env_from(&lookup)?;

        Ok(Self {
            store,
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Settings for one [`TransferStore`](crate::store::TransferStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding one file per transfer.
    pub directory: PathBuf,
    /// Maximum age of the in-memory cache before a query rescans.
    pub refresh_interval: Duration,
    /// Lease length; older claims are released on the next rescan.
    pub claim_timeout: Duration,
    /// How long confirmed transfers are kept before retention deletes them.
    pub retention: Duration,
    /// Claim owner identity. `None` means `<hostname>-<pid>`.
    pub worker_id: Option<WorkerId>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("transfer-store"),
            refresh_interval: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            worker_id: None,
        }
    }
}

/// On-disk shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreConfigFile {
    directory: Option<PathBuf>,
    refresh_interval_secs: Option<u64>,
    claim_timeout_secs: Option<u64>,
    retention_hours: Option<u64>,
    worker_id: Option<String>,
}

impl StoreConfig {
    /// Defaults rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(WorkerId::new(worker_id));
        self
    }

    /// The configured worker id, or the local `<hostname>-<pid>` one.
    pub fn resolve_worker_id(&self) -> WorkerId {
        self.worker_id.clone().unwrap_or_else(WorkerId::local)
    }

    /// Load a TOML config file over the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    /// Parse TOML config text over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: StoreConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let mut config = Self::default();
        if let Some(directory) = file.directory {
            config.directory = directory;
        }
        if let Some(secs) = file.refresh_interval_secs {
            config.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.claim_timeout_secs {
            config.claim_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = file.retention_hours {
            config.retention = hours_to_duration(hours)?;
        }
        if let Some(worker_id) = file.worker_id.filter(|w| !w.trim().is_empty()) {
            config.worker_id = Some(WorkerId::new(worker_id.trim()));
        }
        Ok(config)
    }

    /// Apply `TRANSFER_STORE_*` overrides read through `lookup`.
    ///
    /// Blank values are ignored; values that don't parse are errors.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = var(ENV_DIRECTORY) {
            self.directory = PathBuf::from(dir);
        }
        if let Some(secs) = var(ENV_REFRESH_INTERVAL_SECS) {
            self.refresh_interval = Duration::from_secs(parse_u64(ENV_REFRESH_INTERVAL_SECS, &secs)?);
        }
        if let Some(secs) = var(ENV_CLAIM_TIMEOUT_SECS) {
            self.claim_timeout = Duration::from_secs(parse_u64(ENV_CLAIM_TIMEOUT_SECS, &secs)?);
        }
        if let Some(hours) = var(ENV_RETENTION_HOURS) {
            self.retention = hours_to_duration(parse_u64(ENV_RETENTION_HOURS, &hours)?)?;
        }
        if let Some(worker_id) = var(ENV_WORKER_ID) {
            self.worker_id = Some(WorkerId::new(worker_id));
        }
        Ok(())
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got {value:?}")))
}

pub(crate) fn hours_to_duration(hours: u64) -> Result<Duration> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("retention of {hours} hours is too large")))
}
