//! Configuration management for remedy
//!
//! Two layers live here:
//! - `FixConfig`: engine thresholds, read from `remedy.toml` at the repository
//!   root and overridden by CLI flags.
//! - `UserConfig`: per-user provider settings in
//!   `~/.config/remedy/config.json`, with API keys in the system keychain.

use anyhow::Context;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validate::ValidationConfig;

pub const REPO_CONFIG_FILE: &str = "remedy.toml";

/// Engine settings threaded into the controller, pipeline and runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    pub max_retries: usize,
    pub max_lines_changed: usize,
    pub max_change_ratio: f64,
    pub proximity_warn_lines: usize,
    pub dry_run: bool,
    pub generator_timeout_ms: u64,
    pub max_parallel_groups: usize,
    pub git_commit: bool,
    pub exclude_external_rules: bool,
    /// Rule prefixes (e.g. `python:S1186`) whose fixes may not remove declarations
    pub forbid_declaration_removal_for: Vec<String>,
}

impl Default for FixConfig {
    fn default() -> Self {
        FixConfig {
            max_retries: 3,
            max_lines_changed: 30,
            max_change_ratio: 0.10,
            proximity_warn_lines: 20,
            dry_run: false,
            generator_timeout_ms: 120_000,
            max_parallel_groups: 4,
            git_commit: false,
            exclude_external_rules: true,
            forbid_declaration_removal_for: Vec::new(),
        }
    }
}

/// Values given on the command line; `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_retries: Option<usize>,
    pub max_lines_changed: Option<usize>,
    pub max_change_ratio: Option<f64>,
    pub dry_run: bool,
    pub generator_timeout_secs: Option<u64>,
    pub max_parallel_groups: Option<usize>,
    pub git_commit: bool,
}

impl FixConfig {
    /// Parse a `remedy.toml` document. Missing keys keep their defaults.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: FixConfig = toml::from_str(content).context("Invalid remedy.toml")?;
        Ok(config)
    }

    /// Defaults, then `remedy.toml` in `repo_root` if present.
    pub fn load(repo_root: &Path) -> anyhow::Result<Self> {
        let path = repo_root.join(REPO_CONFIG_FILE);
        if !path.exists() {
            return Ok(FixConfig::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded repository config");
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = overrides.max_lines_changed {
            self.max_lines_changed = v;
        }
        if let Some(v) = overrides.max_change_ratio {
            self.max_change_ratio = v;
        }
        if let Some(v) = overrides.generator_timeout_secs {
            self.generator_timeout_ms = v.saturating_mul(1000);
        }
        if let Some(v) = overrides.max_parallel_groups {
            self.max_parallel_groups = v;
        }
        self.dry_run |= overrides.dry_run;
        self.git_commit |= overrides.git_commit;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if !self.max_change_ratio.is_finite() || self.max_change_ratio < 0.0 {
            return Err(format!(
                "max_change_ratio must be a non-negative number (got {})",
                self.max_change_ratio
            ));
        }
        if self.max_parallel_groups == 0 {
            return Err("max_parallel_groups must be at least 1".to_string());
        }
        if self.generator_timeout_ms == 0 {
            return Err("generator_timeout_ms must be positive".to_string());
        }
        Ok(())
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }

    pub fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            max_lines_changed: self.max_lines_changed,
            max_change_ratio: self.max_change_ratio,
            proximity_warn_lines: self.proximity_warn_lines,
            forbid_declaration_removal_for: self.forbid_declaration_removal_for.clone(),
        }
    }
}

/// Chat-completions provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Openrouter,
    Openai,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Openrouter => "openrouter",
            Provider::Openai => "openai",
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::Openrouter => "OPENROUTER_API_KEY",
            Provider::Openai => "OPENAI_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Openrouter => "https://openrouter.ai/api/v1",
            Provider::Openai => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openrouter => "anthropic/claude-sonnet-4",
            Provider::Openai => "gpt-4o",
        }
    }
}

/// Per-user provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub provider: Provider,
    pub openrouter_model: Option<String>,
    pub openai_model: Option<String>,
    /// Overrides the provider's endpoint (proxies, self-hosted gateways)
    pub api_base_url: Option<String>,
}

const KEYRING_SERVICE: &str = "remedy";

fn keyring_entry(provider: Provider) -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, &format!("{}_api_key", provider.name()))
}

fn read_keyring_key(provider: Provider) -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry(provider)?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

impl UserConfig {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remedy"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`. A corrupt file is moved aside and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "user config was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    pub fn model_for(&self, provider: Provider) -> String {
        let configured = match provider {
            Provider::Openrouter => self.openrouter_model.as_deref(),
            Provider::Openai => self.openai_model.as_deref(),
        };
        configured
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(provider.default_model())
            .to_string()
    }

    pub fn base_url_for(&self, provider: Provider) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| provider.default_base_url().to_string())
    }

    /// API key from the provider's environment variable, then the keychain.
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        if let Ok(key) = std::env::var(provider.api_key_env()) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key(provider) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(
                    provider = provider.name(),
                    error = %err,
                    "failed to read API key from system keychain; set {} instead",
                    provider.api_key_env()
                );
                None
            }
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_config_defaults() {
        let config = FixConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_lines_changed, 30);
        assert!((config.max_change_ratio - 0.10).abs() < f64::EPSILON);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = FixConfig::from_toml("max_retries = 5\ndry_run = true\n").unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(config.dry_run);
        assert_eq!(config.max_lines_changed, 30);
        assert!(FixConfig::from_toml("max_retries = \"many\"").is_err());
    }

    #[test]
    fn layering_repo_file_then_overrides() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(REPO_CONFIG_FILE),
            "max_lines_changed = 50\nmax_parallel_groups = 2\n",
        )
        .unwrap();

        let mut config = FixConfig::load(root.path()).unwrap();
        assert_eq!(config.max_lines_changed, 50);

        config.apply_overrides(&ConfigOverrides {
            max_lines_changed: Some(10),
            generator_timeout_secs: Some(5),
            dry_run: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(config.max_lines_changed, 10);
        assert_eq!(config.max_parallel_groups, 2);
        assert_eq!(config.generator_timeout(), Duration::from_secs(5));
        assert!(config.dry_run);
    }

    #[test]
    fn missing_repo_file_uses_defaults() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(FixConfig::load(root.path()).unwrap(), FixConfig::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero_retries = FixConfig {
            max_retries: 0,
            ..FixConfig::default()
        };
        assert!(zero_retries.validate().is_err());

        let nan_ratio = FixConfig {
            max_change_ratio: f64::NAN,
            ..FixConfig::default()
        };
        assert!(nan_ratio.validate().is_err());

        let no_workers = FixConfig {
            max_parallel_groups: 0,
            ..FixConfig::default()
        };
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn user_config_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remedy").join("config.json");

        let config = UserConfig {
            provider: Provider::Openai,
            openai_model: Some("gpt-4.1".to_string()),
            ..UserConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = UserConfig::load_from(&path);
        assert_eq!(loaded.provider, Provider::Openai);
        assert_eq!(loaded.model_for(Provider::Openai), "gpt-4.1");
        assert_eq!(loaded.model_for(Provider::Openrouter), "anthropic/claude-sonnet-4");

        fs::write(&path, "{ broken").unwrap();
        let fallback = UserConfig::load_from(&path);
        assert_eq!(fallback.provider, Provider::Openrouter);
        assert!(path.with_extension("json.corrupt").exists());
    }
}
