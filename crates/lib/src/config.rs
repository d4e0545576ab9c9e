//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.porto/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;
use crate::tab::DEFAULT_GREETING;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Where tabs are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chat defaults (debug mode, greeting).
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Backend location and health check timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the backend (default "http://localhost:8090"). Overridden by PORTO_API_BASE_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds before a health check counts as failed (default 5).
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_health_timeout_secs() -> u64 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Override the state directory. Relative paths are resolved against the config file's parent.
    /// Omit to use `state` next to the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Ask the backend for tool execution traces on every turn.
    #[serde(default)]
    pub debug_mode: bool,

    /// Greeting shown in fresh tabs. Omit or leave empty for the built-in German greeting.
    #[serde(default)]
    pub greeting: Option<String>,
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PORTO_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".porto").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or PORTO_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolve the backend base URL: env PORTO_API_BASE_URL overrides config.
pub fn resolve_api_base_url(config: &Config) -> String {
    std::env::var("PORTO_API_BASE_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            let u = config.api.base_url.trim();
            if u.is_empty() {
                None
            } else {
                Some(u.to_string())
            }
        })
        .unwrap_or_else(default_base_url)
}

/// Greeting for fresh tabs.
pub fn resolve_greeting(config: &Config) -> String {
    config
        .chat
        .greeting
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_GREETING.to_string())
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Default state directory when no override is set: `state` subdirectory of the config file's parent.
pub fn storage_dir(config_path: &Path) -> PathBuf {
    config_parent(config_path).join("state")
}

/// Resolve the state directory: `config.storage.directory` if set, otherwise the default.
pub fn resolve_storage_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.storage.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent(config_path).join(d)
            }
        }
        _ => storage_dir(config_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.api.base_url, "http://localhost:8090");
        assert_eq!(c.api.health_timeout(), Duration::from_secs(5));
        assert!(!c.chat.debug_mode);
        assert_eq!(resolve_greeting(&c), DEFAULT_GREETING);
    }

    #[test]
    fn partial_json_keeps_section_defaults() {
        let c: Config =
            serde_json::from_str(r#"{ "api": { "healthTimeoutSecs": 2 }, "chat": { "debugMode": true } }"#)
                .unwrap();
        assert_eq!(c.api.base_url, "http://localhost:8090");
        assert_eq!(c.api.health_timeout_secs, 2);
        assert!(c.chat.debug_mode);
        assert!(c.storage.directory.is_none());
    }

    #[test]
    fn blank_greeting_falls_back() {
        let mut c = Config::default();
        c.chat.greeting = Some("  ".to_string());
        assert_eq!(resolve_greeting(&c), DEFAULT_GREETING);
        c.chat.greeting = Some("Hi there".to_string());
        assert_eq!(resolve_greeting(&c), "Hi there");
    }

    #[test]
    fn resolve_storage_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.porto/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.porto/state")
        );
    }

    #[test]
    fn resolve_storage_dir_override_relative() {
        let mut config = Config::default();
        config.storage.directory = Some(PathBuf::from("data/tabs"));
        let path = Path::new("/home/user/.porto/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.porto/data/tabs")
        );
    }

    #[test]
    fn resolve_storage_dir_override_absolute() {
        let mut config = Config::default();
        config.storage.directory = Some(PathBuf::from("/var/lib/porto"));
        let path = Path::new("/home/user/.porto/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/var/lib/porto")
        );
    }

    #[test]
    fn load_config_missing_file_gives_defaults() {
        let path = std::env::temp_dir()
            .join(format!("porto-config-test-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.api.health_timeout_secs, 5);
    }

    #[test]
    fn load_config_rejects_bad_json() {
        let dir = std::env::temp_dir().join(format!("porto-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(load_config(Some(path)).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
