//! Configuration management for dealwatchd.
//!
//! Loads settings from `--config`, `./dealwatch.toml` or
//! `/etc/dealwatch/config.toml`, falling back to defaults. Telegram
//! credentials can be supplied through the environment instead of the file.

use anyhow::{Context, Result};
use dealwatch_shared::WorkingCopy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file in the working directory
pub const LOCAL_CONFIG_PATH: &str = "dealwatch.toml";

/// System-wide config file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dealwatch/config.toml";

pub const ENV_TELEGRAM_TOKEN: &str = "DEALWATCH_TELEGRAM_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "DEALWATCH_TELEGRAM_CHAT_ID";

/// Telegram bot credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub chat_id: String,

    /// Bot API base URL (overridable for testing against a local stub)
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_id: String::new(),
            api_base: default_api_base(),
        }
    }
}

impl TelegramConfig {
    pub fn has_credentials(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }
}

/// Self-update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between update checks
    #[serde(default = "default_update_interval")]
    pub interval_secs: u64,

    /// Git URL of the remote source of truth. Empty disables updates.
    #[serde(default)]
    pub remote_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Working copy root; managed paths are relative to it
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default = "default_managed_files")]
    pub managed_files: Vec<PathBuf>,

    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Self-test entry point at the root of a staged candidate
    #[serde(default = "default_self_test_entry")]
    pub self_test_entry: String,

    #[serde(default = "default_self_test_interpreter")]
    pub self_test_interpreter: String,

    #[serde(default = "default_self_test_timeout")]
    pub self_test_timeout_secs: u64,

    /// Upper bound for `git ls-remote` and `git clone`
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u64 {
    60
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_managed_files() -> Vec<PathBuf> {
    [
        "bin/dealwatchd",
        "dealwatch.toml",
        "version.txt",
        "Cargo.toml",
        "Cargo.lock",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn default_version_file() -> PathBuf {
    PathBuf::from(dealwatch_shared::working_copy::DEFAULT_VERSION_FILE)
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(dealwatch_shared::working_copy::DEFAULT_BACKUP_DIR)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(dealwatch_shared::working_copy::DEFAULT_STAGING_DIR)
}

fn default_self_test_entry() -> String {
    "self_test.sh".to_string()
}

fn default_self_test_interpreter() -> String {
    "sh".to_string()
}

fn default_self_test_timeout() -> u64 {
    45
}

fn default_git_timeout() -> u64 {
    120
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_update_interval(),
            remote_url: String::new(),
            branch: default_branch(),
            root: default_root(),
            managed_files: default_managed_files(),
            version_file: default_version_file(),
            backup_dir: default_backup_dir(),
            staging_dir: default_staging_dir(),
            self_test_entry: default_self_test_entry(),
            self_test_interpreter: default_self_test_interpreter(),
            self_test_timeout_secs: default_self_test_timeout(),
            git_timeout_secs: default_git_timeout(),
        }
    }
}

impl UpdateConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn self_test_timeout(&self) -> Duration {
        Duration::from_secs(self.self_test_timeout_secs)
    }

    pub fn git_timeout(&self) -> Option<Duration> {
        (self.git_timeout_secs > 0).then(|| Duration::from_secs(self.git_timeout_secs))
    }

    /// Build the working copy handle these settings describe
    pub fn working_copy(&self) -> Result<WorkingCopy> {
        let wc = WorkingCopy::new(&self.root, self.managed_files.clone())
            .context("Invalid managed_files entry")?
            .with_version_file(&self.version_file)
            .with_backup_dir(&self.backup_dir)
            .with_staging_dir(&self.staging_dir);
        Ok(wc)
    }
}

/// Listing monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_monitor_url")]
    pub url: String,

    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Pause after a failed cycle
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Only the first N listings on the page are considered
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    #[serde(default = "default_max_price")]
    pub max_price: f64,

    /// Listings whose link does not start with this are dropped
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Lowercase title fragments, at least one must match
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Per-GPU price ceiling under which a listing is tagged as a good deal
    #[serde(default = "default_deal_limits")]
    pub deal_limits: BTreeMap<String, f64>,
}

fn default_monitor_url() -> String {
    "https://www.ebay.com/sch/i.html?_nkw=gaming+laptop&LH_PrefLoc=1&_sop=10".to_string()
}

fn default_monitor_interval() -> u64 {
    300
}

fn default_error_backoff() -> u64 {
    60
}

fn default_max_items() -> usize {
    20
}

fn default_max_price() -> f64 {
    2500.0
}

fn default_url_prefix() -> String {
    "https://www.ebay.com".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_keywords() -> Vec<String> {
    [
        "rtx 3060", "rtx 3070", "rtx 3080", "rtx 4060", "rtx 4070", "rtx 4080", "rtx 4090",
        "rx 6600m", "rx 6700m", "rx 6800m", "rx 6850m xt", "rx 7600m", "rx 7700s",
        "rx 7800m xt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_deal_limits() -> BTreeMap<String, f64> {
    [
        ("rtx 4090", 2200.0),
        ("rtx 4080", 1900.0),
        ("rtx 4070", 1500.0),
        ("rtx 4060", 1200.0),
        ("rtx 4050", 1000.0),
        ("rtx 3070", 1200.0),
        ("rtx 3060", 1000.0),
        ("rtx 3050", 900.0),
        ("rx 6600m", 900.0),
        ("rx 6700m", 1100.0),
        ("rx 6800m", 1300.0),
        ("rx 6850m xt", 1300.0),
        ("rx 7600m", 1100.0),
        ("rx 7700s", 1200.0),
        ("rx 7800m xt", 1300.0),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), *v))
    .collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            url: default_monitor_url(),
            interval_secs: default_monitor_interval(),
            error_backoff_secs: default_error_backoff(),
            max_items: default_max_items(),
            max_price: default_max_price(),
            url_prefix: default_url_prefix(),
            data_dir: default_data_dir(),
            keywords: default_keywords(),
            deal_limits: default_deal_limits(),
        }
    }
}

impl MonitorConfig {
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }
}

/// Structured activity log location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_activity_log")]
    pub activity_log: PathBuf,
}

fn default_activity_log() -> PathBuf {
    dealwatch_shared::EventLog::default_path()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            activity_log: default_activity_log(),
        }
    }
}

/// Full agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the explicit path, then the usual locations, or
    /// return defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path).unwrap_or_else(|e| {
                warn!("Failed to load {}: {:#}, using defaults", path.display(), e);
                Config::default()
            }),
            None => Self::load_from_path(Path::new(LOCAL_CONFIG_PATH))
                .or_else(|_| Self::load_from_path(Path::new(SYSTEM_CONFIG_PATH)))
                .unwrap_or_else(|e| {
                    warn!("Config not found, using defaults: {:#}", e);
                    Config::default()
                }),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Load config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_TELEGRAM_TOKEN).filter(|v| !v.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(chat_id) = lookup(ENV_TELEGRAM_CHAT_ID).filter(|v| !v.is_empty()) {
            self.telegram.chat_id = chat_id;
        }
    }

    /// Write the default config to a path (for first-time setup)
    pub fn save_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }

    /// Activity log path, resolved against the working copy root when relative
    pub fn activity_log_path(&self) -> PathBuf {
        if self.logging.activity_log.is_absolute() {
            self.logging.activity_log.clone()
        } else {
            self.update.root.join(&self.logging.activity_log)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.update.interval_secs, 60);
        assert_eq!(config.update.self_test_timeout_secs, 45);
        assert_eq!(config.update.branch, "main");
        assert_eq!(config.update.self_test_entry, "self_test.sh");
        assert_eq!(config.monitor.interval_secs, 300);
        assert_eq!(config.monitor.max_items, 20);
        assert!(config.update.managed_files.contains(&PathBuf::from("version.txt")));
        assert!(!config.telegram.has_credentials());
    }

    #[test]
    fn test_parse_toml_partial() {
        let toml_str = r#"
[update]
remote_url = "https://example.com/agent.git"
interval_secs = 120
managed_files = ["bin/dealwatchd", "version.txt"]

[monitor]
max_price = 1800.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.update.remote_url, "https://example.com/agent.git");
        assert_eq!(config.update.interval(), Duration::from_secs(120));
        assert_eq!(config.update.managed_files.len(), 2);
        // Defaults for missing fields
        assert_eq!(config.update.self_test_timeout(), Duration::from_secs(45));
        assert_eq!(config.monitor.max_price, 1800.0);
        assert_eq!(config.monitor.max_items, 20);
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_deal_limits_override() {
        let toml_str = r#"
[monitor.deal_limits]
"rtx 4090" = 2000.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.monitor.deal_limits.len(), 1);
        assert_eq!(config.monitor.deal_limits["rtx 4090"], 2000.0);
    }

    #[test]
    fn test_env_overrides_credentials() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            (ENV_TELEGRAM_TOKEN, "123:abc"),
            (ENV_TELEGRAM_CHAT_ID, "42"),
        ]
        .into_iter()
        .collect();

        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.telegram.chat_id, "42");
        assert!(config.telegram.has_credentials());
    }

    #[test]
    fn test_empty_env_does_not_clear_file_values() {
        let mut config = Config::default();
        config.telegram.token = "from-file".to_string();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.telegram.token, "from-file");
    }

    #[test]
    fn test_save_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/dealwatch.toml");
        Config::save_default(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.update.interval_secs, 60);
        assert_eq!(loaded.monitor.keywords, default_keywords());
    }

    #[test]
    fn test_load_missing_explicit_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.update.interval_secs, 60);
    }

    #[test]
    fn test_working_copy_from_config() {
        let mut update = UpdateConfig::default();
        update.root = PathBuf::from("/srv/dealwatch");
        let wc = update.working_copy().unwrap();
        assert_eq!(wc.backup_root(), PathBuf::from("/srv/dealwatch/backup_versions"));

        update.managed_files = vec![PathBuf::from("../escape")];
        assert!(update.working_copy().is_err());
    }

    #[test]
    fn test_activity_log_path_relative_to_root() {
        let mut config = Config::default();
        config.update.root = PathBuf::from("/srv/dealwatch");
        assert_eq!(
            config.activity_log_path(),
            PathBuf::from("/srv/dealwatch/logs/activity_log.txt")
        );
    }
}
