//! Configuration and report rendering for the `opsi-license` tool.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Subcommand;
use opsi_license::{
    ClientNumbers, LicenseFilter, LicensePool, LicenseState, LicenseType, PoolConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

/// Reports the tool can print.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List every license with its state
    Licenses,
    /// Show availability of every module
    Modules,
    /// List the dates on which license validity changes
    Dates,
    /// Print the checksum over all valid licenses
    Checksum,
    /// Show the contents of the valid legacy modules file
    Legacy,
}

/// Client counts as given in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCounts {
    /// Clients that are neither Linux nor macOS.
    pub windows: u64,
    /// Linux clients.
    pub linux: u64,
    /// macOS clients.
    pub macos: u64,
}

impl ClientCounts {
    /// Converts to the library's client numbers.
    #[must_use]
    pub fn numbers(&self) -> ClientNumbers {
        ClientNumbers::new(self.windows, self.linux, self.macos)
    }
}

/// Contents of the TOML configuration file.
///
/// ```toml
/// [licensing]
/// license_file_path = "/etc/opsi/licenses"
/// modules_file_path = "/etc/opsi/modules"
/// warning_percent = 5
/// over_limit_percent = 5
///
/// [clients]
/// windows = 120
/// linux = 12
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// The `[licensing]` table.
    pub licensing: PoolConfig,
    /// The `[clients]` table.
    pub clients: ClientCounts,
}

/// Command-line values that take precedence over the configuration file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Overrides {
    /// License file or directory of .opsilic files
    #[arg(long)]
    pub license_path: Option<PathBuf>,

    /// Legacy modules file
    #[arg(long)]
    pub modules_file: Option<PathBuf>,

    /// Number of clients that are neither Linux nor macOS
    #[arg(long)]
    pub clients: Option<u64>,

    /// Number of Linux clients
    #[arg(long)]
    pub linux: Option<u64>,

    /// Number of macOS clients
    #[arg(long)]
    pub macos: Option<u64>,
}

impl ToolConfig {
    /// Reads the configuration file, or returns the defaults without one.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .licensing
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Applies command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(path) = &overrides.license_path {
            self.licensing.license_file_path = Some(path.clone());
        }
        if let Some(path) = &overrides.modules_file {
            self.licensing.modules_file_path = Some(path.clone());
        }
        if let Some(count) = overrides.clients {
            self.clients.windows = count;
        }
        if let Some(count) = overrides.linux {
            self.clients.linux = count;
        }
        if let Some(count) = overrides.macos {
            self.clients.macos = count;
        }
        self
    }
}

/// One row of the `licenses` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSummary {
    pub id: String,
    pub module_id: String,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub schema_version: u32,
    pub client_number: u64,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    /// State at the report date, revocation included.
    pub state: LicenseState,
}

/// Renders the report for `command` as JSON.
pub fn render(command: Command, pool: &LicensePool, at_date: Option<NaiveDate>) -> Result<Value> {
    let value = match command {
        Command::Licenses => {
            let rows: Vec<LicenseSummary> = pool
                .get_licenses(LicenseFilter::new())
                .map(|license| LicenseSummary {
                    id: license.id().to_string(),
                    module_id: license.module_id().to_string(),
                    license_type: license.license_type(),
                    schema_version: license.schema_version(),
                    client_number: license.client_number(),
                    valid_from: license.valid_from(),
                    valid_until: license.valid_until(),
                    state: license.get_state(true, at_date),
                })
                .collect();
            serde_json::to_value(rows)?
        }
        Command::Modules => serde_json::to_value(pool.get_modules(at_date))?,
        Command::Dates => serde_json::to_value(pool.get_relevant_dates())?,
        Command::Checksum => json!({ "checksum": pool.get_licenses_checksum(at_date) }),
        Command::Legacy => serde_json::to_value(pool.get_legacy_modules())?,
    };
    Ok(value)
}
