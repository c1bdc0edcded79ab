// ⚙️ Import configuration - capitol.toml
//
// Paths, id allocation and version fetching. Unknown keys are rejected so a
// typo never silently falls back to a default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::documents::RetryPolicy;
use crate::error::{ImportError, Result};
use crate::ids::IdAllocator;

// ============================================================================
// CONFIG
// ============================================================================

/// Contents of `capitol.toml`. Every field has a default, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the scraped data, one directory per jurisdiction.
    pub data_dir: PathBuf,
    /// SQLite database file.
    pub database: PathBuf,
    /// Hand-maintained overrides, e.g. `leg_ids/<jur>.csv`.
    pub manual_data_dir: PathBuf,
    /// Replaces the built-in schemas when set.
    pub schema_dir: Option<PathBuf>,
    pub ids: IdsConfig,
    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            database: PathBuf::from("capitol.db"),
            manual_data_dir: PathBuf::from("manual_data"),
            schema_dir: None,
            ids: IdsConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

// ============================================================================
// ID ALLOCATION
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct IdsConfig {
    pub use_counters: bool,
    pub retry_slack: u64,
}

impl Default for IdsConfig {
    fn default() -> Self {
        let allocator = IdAllocator::default();
        IdsConfig {
            use_counters: allocator.use_counters,
            retry_slack: allocator.retry_slack,
        }
    }
}

impl IdsConfig {
    pub fn allocator(&self) -> IdAllocator {
        IdAllocator {
            use_counters: self.use_counters,
            retry_slack: self.retry_slack,
        }
    }
}

// ============================================================================
// VERSION FETCHING
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Download bill versions into the blob store. Needs the `fetch` feature.
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            enabled: false,
            timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

impl Config {
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input).map_err(|e| ImportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.enabled && self.fetch.timeout_secs == 0 {
            return Err(ImportError::Config("fetch.timeout_secs must be positive".into()));
        }
        if self.fetch.enabled && !cfg!(feature = "fetch") {
            return Err(ImportError::Config(
                "fetch.enabled requires building with the `fetch` feature".into(),
            ));
        }
        Ok(())
    }

    /// `<data_dir>/<abbr>`
    pub fn jurisdiction_dir(&self, abbr: &str) -> PathBuf {
        self.data_dir.join(abbr)
    }
}
