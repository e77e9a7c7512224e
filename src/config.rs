use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::diff::{default_directory_map, DirectoryMapping};

const APP_DIR: &str = "device-config-sync";

/// Cross-platform configuration directory manager
pub struct ConfigManager;

impl ConfigManager {
    /// Get the main configuration directory path following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/device-config-sync or ~/.config/device-config-sync
    /// - macOS: ~/Library/Application Support/device-config-sync
    /// - Windows: %APPDATA%\device-config-sync
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            // Follow XDG Base Directory Specification
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join(APP_DIR))
            } else {
                let home = dirs::home_dir().context("Failed to get home directory")?;
                Ok(home.join(".config").join(APP_DIR))
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Ok(dirs::config_dir()
                .context("Failed to get config directory")?
                .join(APP_DIR))
        }
    }

    /// Default data directory: reference mirror, backups, settings and log.
    ///
    /// Kept outside the live tree so reinstalling the daemon never wipes it.
    pub fn default_data_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
                return Ok(PathBuf::from(xdg_data).join(APP_DIR));
            }
        }
        Ok(dirs::data_dir()
            .context("Failed to get data directory")?
            .join(APP_DIR))
    }

    /// Get the daemon config file path (config.toml)
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}

/// Daemon configuration, read from `config.toml`.
///
/// Every field has a default so an absent file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the HTTP surface binds to
    pub listen: String,

    /// Where the reference mirror, backup repository, settings and log live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Filesystem root of the device volume (`0:/` resolves here)
    pub live_root: PathBuf,

    /// Version reported by the device, used to pick a reference branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_version: Option<String>,

    /// Reference folder to device directory mapping
    pub directories: Vec<DirectoryMapping>,

    /// Reference paths that are never overwritten (exact paths or `*` globs)
    pub protected: Vec<String>,

    /// Live directories tracked by the backup history
    pub backup_dirs: Vec<String>,

    /// Abort git network transfers that stall longer than this
    pub git_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            listen: "127.0.0.1:8470".to_string(),
            data_dir: None,
            live_root: PathBuf::from("/opt/dsf/sd"),
            device_version: None,
            directories: default_directory_map(),
            protected: vec![
                "sys/meltingplot/machine-override*".to_string(),
                "sys/meltingplot/dsf-config-override.g".to_string(),
            ],
            backup_dirs: vec![
                "sys".to_string(),
                "macros".to_string(),
                "filaments".to_string(),
            ],
            git_timeout_secs: 120,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&ConfigManager::config_file_path()?)
    }

    /// Load configuration from a file, falling back to defaults when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DaemonConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => ConfigManager::default_data_dir(),
        }
    }

    /// Local mirror of the reference repository
    pub fn reference_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("reference"))
    }

    /// Backup repository (git directory only; the work tree is `live_root`)
    pub fn backup_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("backups"))
    }

    /// Persisted operator settings
    pub fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("settings.json"))
    }

    /// Get the log file path
    pub fn log_file_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("device-config-sync.log"))
    }

    /// Ensure the data directory exists
    pub fn ensure_data_dir(&self) -> Result<PathBuf> {
        let data_dir = self.data_dir()?;
        fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory: {}", data_dir.display())
        })?;
        Ok(data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen, "127.0.0.1:8470");
        assert_eq!(config.git_timeout_secs, 120);
        assert!(config
            .directories
            .iter()
            .any(|m| m.reference == "sys/" && m.device == "0:/sys/"));
        assert_eq!(config.backup_dirs, vec!["sys", "macros", "filaments"]);
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
live_root = "/srv/device"
device_version = "3.5.1"
protected = ["sys/custom/*"]
"#,
        )
        .unwrap();

        let config = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(config.live_root, PathBuf::from("/srv/device"));
        assert_eq!(config.device_version.as_deref(), Some("3.5.1"));
        assert_eq!(config.protected, vec!["sys/custom/*"]);
        assert_eq!(config.listen, "127.0.0.1:8470");
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let config = DaemonConfig {
            data_dir: Some(temp.path().join("data")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(loaded.data_dir, Some(temp.path().join("data")));
        assert_eq!(
            loaded.reference_dir().unwrap(),
            temp.path().join("data").join("reference")
        );
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = DaemonConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.listen, DaemonConfig::default().listen);
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_xdg_config_home_respected() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-xdg-config");
        let config_dir = ConfigManager::config_dir().unwrap();
        assert!(config_dir
            .to_string_lossy()
            .contains("/tmp/test-xdg-config/device-config-sync"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }
}
