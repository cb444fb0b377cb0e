//! Pool configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::error::{LicenseError, LicenseResult};

/// Settings key of [`PoolConfig::license_file_path`].
pub const SETTING_LICENSE_FILE_PATH: &str = "licensing.license_file_path";
/// Settings key of [`PoolConfig::modules_file_path`].
pub const SETTING_MODULES_FILE_PATH: &str = "licensing.modules_file_path";
/// Settings key of [`PoolConfig::warning_percent`].
pub const SETTING_WARNING_PERCENT: &str = "licensing.client_limit_warning_percent";
/// Settings key of [`PoolConfig::over_limit_percent`].
pub const SETTING_OVER_LIMIT_PERCENT: &str = "licensing.client_limit_over_limit_percent";

/// Key-value settings store provided by the host application.
pub trait SettingsStore {
    /// Returns the value stored under `key`.
    fn get_setting(&self, key: &str) -> Option<String>;
}

impl SettingsStore for HashMap<String, String> {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl SettingsStore for BTreeMap<String, String> {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Where licenses are read from and how module usage is graded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// A `.opsilic` file, or a directory of them.
    pub license_file_path: Option<PathBuf>,
    /// A legacy modules file.
    pub modules_file_path: Option<PathBuf>,
    /// Width of the `close_to_limit` band below 100 % usage.
    pub warning_percent: u32,
    /// Width of the grace band above 100 % usage in which an over-limit
    /// module stays available.
    pub over_limit_percent: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            license_file_path: None,
            modules_file_path: None,
            warning_percent: 5,
            over_limit_percent: 5,
        }
    }
}

impl PoolConfig {
    /// Reads the configuration from a settings store. Missing keys keep
    /// their defaults; blank paths count as missing.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if a percentage does not parse or is
    /// above 100.
    pub fn from_settings(store: &dyn SettingsStore) -> LicenseResult<Self> {
        let path = |key: &str| {
            store
                .get_setting(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let percent = |key: &str, default: u32| -> LicenseResult<u32> {
            match store.get_setting(key) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse::<u32>() {
                    Ok(value) if value <= 100 => Ok(value),
                    _ => Err(LicenseError::Config(format!(
                        "{key} must be a percentage between 0 and 100, got '{raw}'"
                    ))),
                },
            }
        };

        let defaults = Self::default();
        let config = Self {
            license_file_path: path(SETTING_LICENSE_FILE_PATH),
            modules_file_path: path(SETTING_MODULES_FILE_PATH),
            warning_percent: percent(SETTING_WARNING_PERCENT, defaults.warning_percent)?,
            over_limit_percent: percent(SETTING_OVER_LIMIT_PERCENT, defaults.over_limit_percent)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that both percentages lie between 0 and 100.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] naming the first field out of range.
    pub fn validate(&self) -> LicenseResult<()> {
        for (name, value) in [
            ("warning_percent", self.warning_percent),
            ("over_limit_percent", self.over_limit_percent),
        ] {
            if value > 100 {
                return Err(LicenseError::Config(format!(
                    "{name} must be a percentage between 0 and 100, got {value}"
                )));
            }
        }
        Ok(())
    }
}
