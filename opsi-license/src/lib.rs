//! License verification and module accounting for opsi.
//!
//! This crate handles:
//! - Validation, hashing and RSA signing of license records
//! - Signature verification against the embedded trust anchors
//! - Reading `.opsilic` license documents and legacy modules files
//! - Evaluating license states (validity window, revocation, replacement)
//! - Aggregating per-module availability against live client counts
//!
//! # Design Principles
//!
//! - **Verification is a state, not an error**: a license that fails to
//!   verify evaluates to [`LicenseState::InvalidSignature`]
//! - **Schema selects the key**: schema 1 licenses verify against the legacy
//!   key with a raw RSA check, later schemas against the current key with
//!   RSA-PSS over SHA3-512
//! - **Atomic loads**: a pool either replaces its contents completely or
//!   keeps them
//! - **No global state**: the service root owns a [`PoolProvider`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use opsi_license::{ClientNumbers, PoolConfig, PoolProvider, TrustAnchors};
//!
//! let config = PoolConfig {
//!     license_file_path: Some("/etc/opsi/licenses".into()),
//!     modules_file_path: Some("/etc/opsi/modules".into()),
//!     ..PoolConfig::default()
//! };
//! let provider = PoolProvider::new(
//!     config,
//!     TrustAnchors::embedded()?,
//!     Arc::new(ClientNumbers::new(120, 12, 3)),
//! );
//! for (module_id, info) in provider.pool()?.get_modules(None) {
//!     println!("{module_id}: {}", info.state);
//! }
//! # Ok::<(), opsi_license::LicenseError>(())
//! ```

mod anchors;
mod clients;
pub mod codec;
mod config;
mod crypto;
mod error;
mod license;
mod modules;
mod pool;
mod provider;
mod types;

pub use anchors::{TrustAnchors, decode_ssh_rsa};
pub use clients::{ClientInfo, ClientNumbers, Platform};
pub use config::{
    PoolConfig, SETTING_LICENSE_FILE_PATH, SETTING_MODULES_FILE_PATH, SETTING_OVER_LIMIT_PERCENT,
    SETTING_WARNING_PERCENT, SettingsStore,
};
pub use error::{LicenseError, LicenseResult};
pub use license::{FIELD_NAMES, LicenseParams, OpsiLicense, is_valid_license_id};
pub use modules::{ModuleInfo, counted_platform};
pub use pool::{LicenseFilter, LicensePool};
pub use provider::PoolProvider;
pub use types::{
    CURRENT_SCHEMA_VERSION, FREE_MODULE_IDS, LicenseState, LicenseType, MAX_STATE_CACHE_ENTRIES,
    MODULE_IDS, ModuleState, UNLIMITED_CLIENTS, today, unlimited_date,
};
