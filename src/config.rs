//! Application configuration.
//!
//! Configuration is loaded from the first file found at:
//! 1. The path given with `--config`
//! 2. `$WECOM_AUDIT_CONFIG` (environment variable)
//! 3. `./config.json`
//! 4. `~/.config/wecom-audit/config.toml` (Linux/macOS)
//!    `%APPDATA%\wecom-audit\config.toml` (Windows)
//!
//! Files ending in `.toml` are parsed as TOML, anything else as JSON.
//! Credentials have no defaults: a missing required field is a fatal error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Organization (corporation) identifier.
    pub corporation_id: String,
    /// Secret of the audit application.
    pub app_secret: String,
    /// PEM file holding the organization's RSA private key.
    pub private_key_path: PathBuf,
    /// Records requested per page (the service caps this at 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Extra private keys for rotated public key versions.
    #[serde(default)]
    pub keys: Vec<VersionedKey>,
    /// Retrieval tuning.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Output and logging.
    #[serde(default)]
    pub output: OutputConfig,
}

/// A private key registered for one public key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedKey {
    pub version: u32,
    pub path: PathBuf,
}

/// Retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Sequence to resume after (0 = from the beginning).
    pub start_seq: u64,
    /// Timeout for every remote call, in seconds.
    pub timeout_secs: u64,
    /// Threads used to decrypt one batch (1 = no extra threads).
    pub decrypt_workers: usize,
    /// Largest attachment accepted, in bytes (default: 104857600 = 100 MB).
    pub max_media_size: usize,
    /// Stop after this many pages.
    pub max_batches: Option<usize>,
}

/// Output and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for `messages.json`, grouped files and attachments.
    pub output_dir: PathBuf,
    /// Check downloaded attachments against their `md5sum`.
    pub verify_md5: bool,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

// ── Default implementations ─────────────────────────────────────

fn default_batch_size() -> u32 {
    1000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            start_seq: 0,
            timeout_secs: 60,
            decrypt_workers: 1,
            max_media_size: 100 * 1024 * 1024, // 100 MB
            max_batches: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            verify_md5: true,
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Timeout applied to each remote call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval.timeout_secs)
    }

    /// Check the fields serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.corporation_id.trim().is_empty() {
            return Err(AuditError::Config("corporation_id is empty".into()));
        }
        if self.app_secret.trim().is_empty() {
            return Err(AuditError::Config("app_secret is empty".into()));
        }
        if self.private_key_path.as_os_str().is_empty() {
            return Err(AuditError::Config("private_key_path is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(AuditError::Config("batch_size must be positive".into()));
        }
        if self.retrieval.timeout_secs == 0 {
            return Err(AuditError::Config("timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Resolve relative key paths against `base` (the config file's directory).
    fn resolve_paths(&mut self, base: &Path) {
        if self.private_key_path.is_relative() {
            self.private_key_path = base.join(&self.private_key_path);
        }
        for key in &mut self.keys {
            if key.path.is_relative() {
                key.path = base.join(&key.path);
            }
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Parse configuration text. `toml` selects TOML, otherwise JSON.
pub fn parse_config(contents: &str, toml: bool) -> Result<Config> {
    let config: Config = if toml {
        toml::from_str(contents).map_err(|e| AuditError::Config(e.to_string()))?
    } else {
        serde_json::from_str(contents).map_err(|e| AuditError::Config(e.to_string()))?
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate a configuration file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let mut config = parse_config(&contents, is_toml).map_err(|e| match e {
        AuditError::Config(msg) => AuditError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })?;

    let base = path.parent().unwrap_or(Path::new("."));
    config.resolve_paths(base);
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Load configuration from `explicit` or the first standard location that exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }
    match config_file_candidates().into_iter().find(|p| p.exists()) {
        Some(path) => load_config_from(&path),
        None => Err(AuditError::Config(
            "no configuration file found (use --config or $WECOM_AUDIT_CONFIG)".into(),
        )),
    }
}

/// Standard config file locations, in lookup order.
pub fn config_file_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("WECOM_AUDIT_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. Working directory
    paths.push(PathBuf::from("config.json"));

    // 3. Standard config directory
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("wecom-audit").join("config.toml"));
    }
    paths
}

/// Return the cache directory for logs.
pub fn cache_dir(config: Option<&Config>) -> PathBuf {
    if let Some(dir) = config.and_then(|c| c.output.cache_dir.clone()) {
        return dir;
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wecom-audit")
}
