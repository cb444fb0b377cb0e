//! Reader for legacy modules files.
//!
//! A modules file grants several modules at once under one raw RSA
//! signature:
//!
//! ```text
//! customer = uib GmbH
//! expires = never
//! vpn = yes
//! scalability1 = 500
//! signature = 0a1b...
//! ```
//!
//! Each granted module becomes one schema 1 [`OpsiLicense`]. All of them
//! share the signature and the normalized file contents it covers.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{LicenseError, LicenseResult};
use crate::license::{LicenseParams, OpsiLicense};
use crate::types::{LicenseType, UNLIMITED_CLIENTS, unlimited_date};

/// Prefix of the ids given to licenses read from a modules file.
pub const LEGACY_ID_PREFIX: &str = "legacy-";

/// Product version recorded on legacy licenses.
pub const LEGACY_OPSI_VERSION: &str = "4.1";

/// Issue and start date recorded on legacy licenses.
#[must_use]
pub fn legacy_issue_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Parses the contents of a modules file.
///
/// # Errors
///
/// Returns [`LicenseError::Parse`] for lines without `=`, undecodable
/// signatures or expiry dates, and module values that are neither a
/// switch nor a count.
pub fn parse_modules(text: &str) -> LicenseResult<Vec<OpsiLicense>> {
    let mut entries: BTreeMap<String, (usize, String)> = BTreeMap::new();
    let mut signature = Vec::new();

    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error(line_no, "expected 'key = value'"))?;
        let key = key.trim().to_lowercase();
        let value = if key == "customer" {
            value.trim().to_string()
        } else {
            value.trim().to_lowercase()
        };

        if key == "signature" {
            signature = hex::decode(&value)
                .map_err(|e| parse_error(line_no, format!("signature: {e}")))?;
        } else {
            entries.insert(key, (line_no, value));
        }
    }

    let additional_data: String = entries
        .iter()
        .map(|(key, (_, value))| format!("{key} = {value}\r\n"))
        .collect();

    let customer = entries.get("customer").map(|(_, value)| value.clone());
    let valid_until = match entries.get("expires") {
        None => unlimited_date(),
        Some((_, value)) if value == "never" => unlimited_date(),
        Some((line_no, value)) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|e| parse_error(*line_no, format!("expires '{value}': {e}")))?,
    };

    let mut licenses = Vec::new();
    for (module_id, (line_no, value)) in &entries {
        if module_id == "customer" || module_id == "expires" {
            continue;
        }
        let Some(client_number) = parse_grant(value)
            .map_err(|message| parse_error(*line_no, format!("{module_id}: {message}")))?
        else {
            continue;
        };

        licenses.push(OpsiLicense::new(LicenseParams {
            id: Some(format!("{LEGACY_ID_PREFIX}{module_id}")),
            license_type: LicenseType::Standard,
            schema_version: 1,
            opsi_version: LEGACY_OPSI_VERSION.to_string(),
            customer_name: customer.clone(),
            module_id: module_id.clone(),
            client_number,
            issued_at: Some(legacy_issue_date()),
            valid_from: Some(legacy_issue_date()),
            valid_until: Some(valid_until),
            additional_data: Some(additional_data.clone()),
            signature: signature.clone(),
            ..LicenseParams::default()
        })?);
    }
    Ok(licenses)
}

/// Reads and parses a modules file.
///
/// # Errors
///
/// Returns [`LicenseError::Io`] if the file cannot be read, or any error
/// of [`parse_modules`].
pub fn read_modules_file(path: &Path) -> LicenseResult<Vec<OpsiLicense>> {
    let text = fs::read_to_string(path).map_err(|e| LicenseError::io(path, e))?;
    parse_modules(&text)
}

/// `Ok(None)` means the module is not granted.
fn parse_grant(value: &str) -> Result<Option<u64>, String> {
    match value {
        "yes" | "unlimited" => Ok(Some(UNLIMITED_CLIENTS)),
        "" | "no" => Ok(None),
        count => match count.parse::<u64>() {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n.min(UNLIMITED_CLIENTS))),
            Err(_) => Err(format!("'{count}' is neither yes/no nor a client count")),
        },
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> LicenseError {
    LicenseError::Parse {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULES: &str = "\
Customer = uib GmbH
expires = 2031-12-31
VPN = Yes
scalability1 = 500
treeview = no
macos_agent = 0
signature = 0a0b0c
";

    #[test]
    fn one_license_per_granted_module() {
        let licenses = parse_modules(MODULES).unwrap();
        let ids: Vec<&str> = licenses.iter().map(OpsiLicense::id).collect();
        assert_eq!(ids, ["legacy-scalability1", "legacy-vpn"]);

        let vpn = &licenses[1];
        assert_eq!(vpn.client_number(), UNLIMITED_CLIENTS);
        assert_eq!(vpn.customer_name(), Some("uib GmbH"));
        assert_eq!(vpn.schema_version(), 1);
        assert_eq!(vpn.opsi_version(), LEGACY_OPSI_VERSION);
        assert_eq!(vpn.valid_from(), legacy_issue_date());
        assert_eq!(vpn.valid_until(), NaiveDate::from_ymd_opt(2031, 12, 31).unwrap());
        assert_eq!(vpn.signature(), [0x0a, 0x0b, 0x0c]);
        assert_eq!(licenses[0].client_number(), 500);
    }

    #[test]
    fn additional_data_is_normalized() {
        let licenses = parse_modules(MODULES).unwrap();
        assert_eq!(
            licenses[0].additional_data(),
            Some(
                "customer = uib GmbH\r\nexpires = 2031-12-31\r\nmacos_agent = 0\r\n\
                 scalability1 = 500\r\ntreeview = no\r\nvpn = yes\r\n"
            )
        );
    }

    #[test]
    fn never_expires_is_unlimited() {
        let licenses = parse_modules("customer = x\nexpires = never\nvpn = yes\n").unwrap();
        assert_eq!(licenses[0].valid_until(), unlimited_date());
        let licenses = parse_modules("customer = x\nvpn = yes\n").unwrap();
        assert_eq!(licenses[0].valid_until(), unlimited_date());
    }

    #[test]
    fn leading_byte_order_mark_is_ignored() {
        let licenses = parse_modules("\u{feff}customer = uib GmbH\r\nvpn = 10\r\n").unwrap();
        assert_eq!(licenses[0].customer_name(), Some("uib GmbH"));
        assert_eq!(
            licenses[0].additional_data(),
            Some("customer = uib GmbH\r\nvpn = 10\r\n")
        );
    }

    #[test]
    fn missing_signature_leaves_license_unsigned() {
        let licenses = parse_modules("customer = x\nvpn = 10\n").unwrap();
        assert!(licenses[0].signature().is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_modules("customer = x\nvpn\n"),
            Err(LicenseError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_modules("customer = x\nvpn = maybe\n"),
            Err(LicenseError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_modules("customer = x\nexpires = soon\nvpn = yes\n"),
            Err(LicenseError::Parse { line: 2, .. })
        ));
        assert!(matches!(
            parse_modules("signature = xyz\n"),
            Err(LicenseError::Parse { line: 1, .. })
        ));
    }
}
