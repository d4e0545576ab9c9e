//! Initialize the configuration directory: create ~/.porto, a default config, and the state directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the state directory (default `state`, or `storage.directory` from an existing config).
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let state_dir = config::resolve_storage_dir(&config, config_path);
    if !state_dir.exists() {
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating state directory {}", state_dir.display()))?;
        log::info!("created state directory at {}", state_dir.display());
    } else {
        log::debug!("state directory already exists at {}, skipping", state_dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_config_and_state_dir() {
        let dir = std::env::temp_dir().join(format!("porto-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");
        let out = init_config_dir(&config_path).unwrap();
        assert_eq!(out, dir);
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");
        assert!(dir.join("state").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn keeps_existing_config() {
        let dir = std::env::temp_dir().join(format!("porto-init-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.json");
        std::fs::write(&config_path, r#"{"storage":{"directory":"tabs"}}"#).unwrap();
        init_config_dir(&config_path).unwrap();
        assert!(std::fs::read_to_string(&config_path).unwrap().contains("tabs"));
        assert!(dir.join("tabs").is_dir());
        assert!(!dir.join("state").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
