//! Configuration management for checkoutfs

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default interval between background overlay flushes
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Default sled page cache size: 64MB
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default name of the file left in an unmounted checkout directory
pub const DEFAULT_MARKER_FILE: &str = "README_CHECKOUT.txt";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Overlay store configuration
    pub overlay: OverlayConfig,

    /// Mount point configuration
    pub mount: MountConfig,

    /// Fault injection configuration
    pub fault_injection: FaultInjectionConfig,

    /// Path to the data directory (checkout records and overlays)
    pub data_dir: PathBuf,
}

/// Overlay store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Seconds between background flushes of a running mount (0 = disabled)
    pub flush_interval_secs: u64,

    /// sled page cache capacity in bytes
    pub cache_capacity_bytes: u64,
}

/// Mount point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Marker file written into the mount directory while unmounted
    pub marker_file_name: String,

    /// Delete the mount directory on remove when nothing else is left in it
    pub remove_empty_mount_point: bool,
}

/// Fault injection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    /// Accept fault definitions (test deployments only)
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("checkoutfs");

        Config {
            overlay: OverlayConfig::default(),
            mount: MountConfig::default(),
            fault_injection: FaultInjectionConfig::default(),
            data_dir,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            cache_capacity_bytes: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            marker_file_name: DEFAULT_MARKER_FILE.to_string(),
            remove_empty_mount_point: true,
        }
    }
}

impl Config {
    /// Default configuration rooted at `data_dir`
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Config {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CHECKOUTFS_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(interval) = std::env::var("CHECKOUTFS_FLUSH_INTERVAL") {
            if let Ok(secs) = interval.trim().parse::<u64>() {
                self.overlay.flush_interval_secs = secs;
            }
        }

        if let Ok(flag) = std::env::var("CHECKOUTFS_FAULT_INJECTION") {
            match flag.trim() {
                "1" | "true" | "yes" => self.fault_injection.enabled = true,
                "0" | "false" | "no" => self.fault_injection.enabled = false,
                _ => {}
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "Data directory must not be empty".to_string(),
            ));
        }

        let marker = &self.mount.marker_file_name;
        if marker.is_empty() || marker.contains('/') || marker == "." || marker == ".." {
            return Err(Error::InvalidConfig(format!(
                "Marker file name must be a single path component: {:?}",
                marker
            )));
        }

        if self.overlay.cache_capacity_bytes == 0 {
            return Err(Error::InvalidConfig(
                "Overlay cache capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.clients_dir())?;
        Ok(())
    }

    /// Directory holding one subdirectory per checkout
    pub fn clients_dir(&self) -> PathBuf {
        self.data_dir.join("clients")
    }

    /// File listing every registered checkout
    pub fn checkouts_file(&self) -> PathBuf {
        self.data_dir.join("checkouts.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::with_data_dir(dir.path().join("data"));
        config.overlay.flush_interval_secs = 5;
        config.fault_injection.enabled = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.overlay.flush_interval_secs, 5);
        assert!(loaded.fault_injection.enabled);
        assert_eq!(loaded.mount.marker_file_name, DEFAULT_MARKER_FILE);
    }

    #[test]
    fn test_validate_rejects_bad_marker() {
        let mut config = Config::with_data_dir("/tmp/checkoutfs-test");
        config.mount.marker_file_name = "a/b".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.mount.marker_file_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::with_data_dir(dir.path().join("nested/data"));
        config.ensure_directories().unwrap();
        assert!(config.clients_dir().is_dir());
    }
}
