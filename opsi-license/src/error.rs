//! Error types for the licensing module.

use std::path::PathBuf;
use thiserror::Error;

/// Licensing-specific errors.
///
/// Authenticity and validity problems of a license are not errors: they are
/// reported through [`crate::LicenseState`].
#[derive(Debug, Error)]
pub enum LicenseError {
    /// A license field failed validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with the value.
        reason: String,
    },

    /// A license document contains a field the license type does not know.
    #[error("unknown license field: {0}")]
    UnknownField(String),

    /// Signing is not available for this schema version.
    #[error("signing is not supported for schema version {0}")]
    UnsupportedSchema(u32),

    /// Refused to write a license document without licenses.
    #[error("refusing to write a license document without licenses")]
    EmptyDocument,

    /// A license document is syntactically malformed.
    #[error("malformed license document at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A trust anchor or signing key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Creating a signature failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A configuration value could not be interpreted.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing a license source failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl LicenseError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
