//! Shared constants and enumerations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LicenseError;

/// Client number that stands for "any number of clients".
pub const UNLIMITED_CLIENTS: u64 = 999_999_999;

/// Schema version written by current tooling.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Bound on the number of `(test_revoked, at_date)` entries a license
/// keeps in its state cache.
pub const MAX_STATE_CACHE_ENTRIES: usize = 64;

/// Modules that need a license to become available.
pub const MODULE_IDS: &[&str] = &[
    "directory-connector",
    "license_management",
    "linux_agent",
    "local_imaging",
    "macos_agent",
    "monitoring",
    "osim-ui",
    "scalability1",
    "secureboot",
    "swondemand",
    "vpn",
    "win-vhd",
    "wim-capture",
];

/// Modules that are available without any license.
pub const FREE_MODULE_IDS: &[&str] = &[
    "dynamic_depot",
    "install_by_shutdown",
    "mysql_backend",
    "treeview",
    "uefi",
    "userroles",
];

/// Date that stands for "never expires" (9999-12-31).
#[must_use]
pub fn unlimited_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Today's calendar date in local time.
#[must_use]
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// The kind of a license.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    /// Basic grant, superseded once a standard grant for the same module exists.
    Core,
    /// Full grant.
    #[default]
    Standard,
}

impl LicenseType {
    /// Returns the wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Standard => "standard",
        }
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseType {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Self::Core),
            "standard" => Ok(Self::Standard),
            other => Err(LicenseError::invalid(
                "type",
                format!("expected 'core' or 'standard', got '{other}'"),
            )),
        }
    }
}

/// The evaluated state of a single license at a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    /// Signature verifies and the license is in force.
    Valid,
    /// Signature does not verify against the trust anchor.
    InvalidSignature,
    /// `valid_until` lies before the evaluation date.
    Expired,
    /// `valid_from` lies after the evaluation date.
    NotYetValid,
    /// Another valid license revokes this one.
    Revoked,
    /// A core license superseded by a standard license for the same module.
    ReplacedByNonCore,
}

impl LicenseState {
    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::Revoked => "revoked",
            Self::ReplacedByNonCore => "replaced_by_non_core",
        }
    }
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The aggregated state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// No license needed.
    Free,
    /// Licensed with headroom.
    Licensed,
    /// No valid license.
    Unlicensed,
    /// Usage is within the warning band below the limit.
    CloseToLimit,
    /// Usage exceeds the licensed client number.
    OverLimit,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Licensed => "licensed",
            Self::Unlicensed => "unlicensed",
            Self::CloseToLimit => "close_to_limit",
            Self::OverLimit => "over_limit",
        };
        f.write_str(name)
    }
}
