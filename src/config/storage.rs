use crate::config::schema::AppConfig;
use crate::error::{ReposterError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration file path based on platform
pub fn get_config_path() -> PathBuf {
    let config_dir = if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|p| p.join("nl.reposter.app"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        dirs::config_dir()
            .map(|p| p.join("reposter"))
            .unwrap_or_else(|| PathBuf::from("."))
    };

    config_dir.join("config.toml")
}

/// Load configuration from the default location, creating it if missing
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&get_config_path())
}

/// Load configuration from `path`. A file that fails to parse is reported,
/// never replaced with defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::info!("Config file not found at {:?}, creating default", path);
        let config = AppConfig::default();
        save_config_to(&config, path)?;
        return Ok(config);
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ReposterError::Config(format!("Failed to read config from {:?}: {}", path, e))
    })?;

    let config: AppConfig = toml::from_str(&content)?;
    crate::config::validate_config(&config)?;

    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ReposterError::Config(format!(
                "Failed to create config directory {:?}: {}",
                parent, e
            ))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(path, content).map_err(|e| {
        ReposterError::Config(format!("Failed to write config to {:?}: {}", path, e))
    })?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let path = get_config_path();
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.browser.cdp_port, 9222);

        let again = load_config_from(&path).unwrap();
        assert_eq!(again.api.port, config.api.port);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "enabled = false\n[api]\nport = 40000\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.api.port, 40000);
        assert_eq!(config.site.create_form_path, "/plaats");
        assert_eq!(config.timing.poll_interval_ms, 100);
    }

    #[test]
    fn test_broken_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "enabled = [not toml").unwrap();

        assert!(load_config_from(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "enabled = [not toml");
    }
}
