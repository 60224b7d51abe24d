//! Process configuration.
//!
//! One `Config` value is built at process start (defaults, optionally
//! overridden by a TOML file) and passed by reference into the constructors
//! that need it. There is no global configuration state.

use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/baseplate/baseplate.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Advisory lock taken by the CLI around mutating actions.
    pub lock_file: PathBuf,

    /// Whether to program controller interrupt mask registers at setup.
    pub init_irq: bool,

    /// Whether `finish()` locks the controller configuration
    /// (point of no return for the kernel driver topology).
    pub lock_scd_conf: bool,

    /// Where the reload-cause history is persisted.
    pub reboot_cause_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/var/lock/baseplate.lock"),
            init_irq: false,
            lock_scd_conf: true,
            reboot_cause_file: PathBuf::from("/run/baseplate/reload-cause"),
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults; a
    /// malformed file warns and yields the defaults.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.init_irq);
        assert!(config.lock_scd_conf);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str("init_irq = true\n").unwrap();
        assert!(config.init_irq);
        assert!(config.lock_scd_conf);
        assert_eq!(config.lock_file, PathBuf::from("/var/lock/baseplate.lock"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/baseplate.toml"));
        assert!(!config.init_irq);
    }
}
