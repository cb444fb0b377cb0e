//! The `.opsilic` license document format.
//!
//! A document holds one section per license, named by the license id:
//!
//! ```text
//! [c7a3c6ba3b084bd0a36b6edd5b33c2fd]
//! type = standard
//! module_id = scalability1
//! customer_name = "uib GmbH"
//! revoked_ids = 0a1b2c3d4e5f,6a7b8c9d0e1f
//! ...
//! ```
//!
//! Free-text fields are written as quoted literals (see
//! [`super::escape`]); every other value is written as is.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::escape::{quote, unquote};
use crate::error::{LicenseError, LicenseResult};
use crate::license::OpsiLicense;

/// File suffix of license documents.
pub const LICENSE_FILE_SUFFIX: &str = "opsilic";

/// Fields written as quoted literals.
const ESCAPED_FIELDS: &[&str] = &[
    "additional_data",
    "customer_address",
    "customer_name",
    "customer_unit",
    "note",
];

/// Parses a license document.
///
/// # Errors
///
/// Returns [`LicenseError::Parse`] for malformed lines and whatever
/// [`OpsiLicense::from_fields`] reports for invalid sections.
pub fn from_document(text: &str) -> LicenseResult<Vec<OpsiLicense>> {
    let mut sections: Vec<(String, BTreeMap<String, String>)> = Vec::new();

    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let id = header
                .strip_suffix(']')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| parse_error(line_no, format!("malformed section header '{line}'")))?;
            if sections.iter().any(|(existing, _)| existing == id) {
                return Err(parse_error(line_no, format!("duplicate section '{id}'")));
            }
            sections.push((id.to_string(), BTreeMap::new()));
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_error(line_no, "expected 'key = value'"))?;
        let key = key.trim();
        let value = value.trim();

        let (_, fields) = sections
            .last_mut()
            .ok_or_else(|| parse_error(line_no, format!("'{key}' outside of a license section")))?;

        let value = if ESCAPED_FIELDS.contains(&key) {
            unquote(value).map_err(|message| parse_error(line_no, message))?
        } else {
            value.to_string()
        };
        fields.insert(key.to_string(), value);
    }

    sections
        .into_iter()
        .map(|(id, mut fields)| {
            if fields.contains_key("id") {
                return Err(LicenseError::UnknownField("id".to_string()));
            }
            fields.insert("id".to_string(), id);
            OpsiLicense::from_fields(&fields)
        })
        .collect()
}

/// Renders licenses as a document, ordered by id.
///
/// # Errors
///
/// Returns [`LicenseError::EmptyDocument`] if `licenses` is empty.
pub fn to_document<'a, I>(licenses: I) -> LicenseResult<String>
where
    I: IntoIterator<Item = &'a OpsiLicense>,
{
    let mut licenses: Vec<&OpsiLicense> = licenses.into_iter().collect();
    if licenses.is_empty() {
        return Err(LicenseError::EmptyDocument);
    }
    licenses.sort_by(|a, b| a.id().cmp(b.id()));

    let mut out = String::new();
    for (index, license) in licenses.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{}]\n", license.id()));
        for (name, value) in license.to_fields() {
            if name == "id" {
                continue;
            }
            let value = if ESCAPED_FIELDS.contains(&name) && !value.is_empty() {
                quote(&value)
            } else {
                value
            };
            out.push_str(&format!("{name} = {value}\n"));
        }
    }
    Ok(out)
}

/// Reads all licenses from a `.opsilic` file.
///
/// # Errors
///
/// Returns [`LicenseError::Io`] if the file cannot be read, or any parse
/// error of [`from_document`].
pub fn read_license_file(path: &Path) -> LicenseResult<Vec<OpsiLicense>> {
    let text = fs::read_to_string(path).map_err(|e| LicenseError::io(path, e))?;
    from_document(&text)
}

/// Writes licenses to a `.opsilic` file, replacing its contents.
///
/// # Errors
///
/// Returns [`LicenseError::EmptyDocument`] without touching the file if
/// there is nothing to write, or [`LicenseError::Io`] on write failure.
pub fn write_license_file<'a, I>(path: &Path, licenses: I) -> LicenseResult<()>
where
    I: IntoIterator<Item = &'a OpsiLicense>,
{
    let document = to_document(licenses)?;
    fs::write(path, document).map_err(|e| LicenseError::io(path, e))
}

fn parse_error(line: usize, message: impl Into<String>) -> LicenseError {
    LicenseError::Parse {
        line,
        message: message.into(),
    }
}
