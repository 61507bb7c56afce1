//! Application configuration.
//!
//! Values come from built-in defaults, then `config.toml` under the user's
//! config directory, then `TAROT_*` environment variables.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{catalog::CardCatalog, session::GameRules, store::FileStore};

/// Directory under `~/.config` holding the configuration file.
pub const CONFIG_DIR: &str = "tarot";

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"# Tarot configuration.
# Every value is optional; remove a line to fall back to the built-in default.
# Environment variables override this file, e.g. TAROT_INITIAL_DRAWS=5 or
# TAROT_API__BASE_URL=https://example.com/api

# Free draws granted on a fresh install.
initial_draws = 3

# Value written after login; anything above 900 is shown as unlimited.
unlimited_draws = 999

# Cards dealt per reading.
slot_count = 3

# Pause before cards are dealt, in milliseconds.
loading_delay_ms = 1500

# Storage key holding the remaining draws.
quota_key = "tarot_remaining_draws"

# Fixed RNG seed for reproducible readings.
# seed = 42

# Directory for the quota store and logs.
# data_dir = "/path/to/data"

[api]
base_url = "http://localhost:3000/api"
timeout_secs = 10
# auth_token = "..."
"#;

/// Remote card service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Bearer token attached to requests when present.
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 10,
            auth_token: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the quota store and log files.
    pub data_dir: PathBuf,
    /// Quota on a fresh install.
    pub initial_draws: i64,
    /// Sentinel written by login.
    pub unlimited_draws: i64,
    /// Number of slots per reading.
    pub slot_count: usize,
    /// Artificial delay before cards are dealt.
    pub loading_delay_ms: u64,
    /// Storage key of the quota.
    pub quota_key: String,
    /// Optional RNG seed.
    pub seed: Option<u64>,
    /// Remote card service.
    pub api: ApiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: FileStore::default_root(),
            initial_draws: 3,
            unlimited_draws: 999,
            slot_count: 3,
            loading_delay_ms: 1500,
            quota_key: "tarot_remaining_draws".to_string(),
            seed: None,
            api: ApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(config_path())
    }

    /// Load configuration from `path`, layering environment overrides on top.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("TAROT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = settings
            .try_deserialize()
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Check that a reading can always be dealt from the built-in deck.
    pub fn validate(&self) -> Result<()> {
        let deck_size = CardCatalog::standard().len();
        ensure!(
            (1..=deck_size).contains(&self.slot_count),
            "slot_count must be between 1 and {deck_size}, got {}",
            self.slot_count
        );
        Ok(())
    }

    /// Loading delay as a duration.
    pub fn loading_delay(&self) -> Duration {
        Duration::from_millis(self.loading_delay_ms)
    }

    /// Session rules derived from this configuration.
    pub fn rules(&self) -> GameRules {
        GameRules {
            slot_count: self.slot_count,
            initial_draws: self.initial_draws,
            unlimited_draws: self.unlimited_draws,
            loading_delay: self.loading_delay(),
            quota_key: self.quota_key.clone(),
        }
    }

    /// Key-value store rooted at `data_dir`.
    pub fn store(&self) -> FileStore {
        FileStore::new(&self.data_dir)
    }

    /// Directory for log files.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Default configuration file path.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Write the commented default configuration if none exists yet.
pub fn ensure_default_config() -> Result<()> {
    ensure_config_at(config_path())
}

/// Write the commented default configuration to `path` if it is missing.
pub fn ensure_config_at(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write config {}", path.display()))?;
    info!(path = %path.display(), "default configuration written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_file_matches_builtin_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tarot").join(CONFIG_FILE);
        ensure_config_at(&path)?;
        assert!(path.exists());

        let config = AppConfig::load_from(&path)?;
        let defaults = AppConfig::default();
        assert_eq!(config.initial_draws, defaults.initial_draws);
        assert_eq!(config.unlimited_draws, 999);
        assert_eq!(config.slot_count, 3);
        assert_eq!(config.loading_delay(), Duration::from_millis(1500));
        assert_eq!(config.quota_key, "tarot_remaining_draws");
        assert_eq!(config.api, ApiConfig::default());
        assert_eq!(config.seed, None);
        Ok(())
    }

    #[test]
    fn existing_file_is_not_overwritten() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "initial_draws = 5\n")?;
        ensure_config_at(&path)?;
        assert_eq!(fs::read_to_string(&path)?, "initial_draws = 5\n");
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "initial_draws = 1\nseed = 7\ndata_dir = \"/tmp/tarot-test\"\n[api]\ntimeout_secs = 2\n",
        )?;
        let config = AppConfig::load_from(&path)?;
        assert_eq!(config.initial_draws, 1);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tarot-test"));
        assert_eq!(config.api.timeout_secs, 2);
        assert_eq!(config.api.base_url, "http://localhost:3000/api");
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/tarot-test/logs"));

        let rules = config.rules();
        assert_eq!(rules.initial_draws, 1);
        assert_eq!(rules.slot_count, 3);
        Ok(())
    }

    #[test]
    fn slot_count_must_fit_the_deck() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        for invalid in [0, 16] {
            fs::write(&path, format!("slot_count = {invalid}\n"))?;
            let err = AppConfig::load_from(&path).unwrap_err();
            assert!(
                format!("{err:#}").contains("slot_count must be between 1 and 15"),
                "unexpected error for {invalid}: {err:#}"
            );
        }
        for valid in [1, 15] {
            fs::write(&path, format!("slot_count = {valid}\n"))?;
            assert_eq!(AppConfig::load_from(&path)?.slot_count, valid);
        }
        Ok(())
    }

    #[test]
    fn missing_file_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = AppConfig::load_from(dir.path().join("absent.toml"))?;
        assert_eq!(config.slot_count, 3);
        assert_eq!(config.initial_draws, 3);
        Ok(())
    }
}
