use opsi_license::LicenseError;
use std::error::Error;
use std::path::PathBuf;

#[test]
fn error_display_invalid_field() {
    let err = LicenseError::InvalidField {
        field: "client_number",
        reason: "must be between 1 and 999999999".into(),
    };
    let msg = format!("{err}");
    assert!(msg.contains("client_number"));
    assert!(msg.contains("must be between"));
}

#[test]
fn error_display_unknown_field() {
    let err = LicenseError::UnknownField("colour".into());
    assert!(format!("{err}").contains("unknown license field: colour"));
}

#[test]
fn error_display_unsupported_schema() {
    let err = LicenseError::UnsupportedSchema(1);
    assert!(format!("{err}").contains("schema version 1"));
}

#[test]
fn error_display_empty_document() {
    let err = LicenseError::EmptyDocument;
    assert!(format!("{err}").contains("without licenses"));
}

#[test]
fn error_display_parse() {
    let err = LicenseError::Parse {
        line: 7,
        message: "expected 'key = value'".into(),
    };
    let msg = format!("{err}");
    assert!(msg.contains("line 7"));
    assert!(msg.contains("key = value"));
}

#[test]
fn error_display_config() {
    let err = LicenseError::Config("bad percentage".into());
    assert!(format!("{err}").contains("configuration"));
}

#[test]
fn io_error_keeps_path_and_source() {
    let err = LicenseError::Io {
        path: PathBuf::from("/etc/opsi/licenses/a.opsilic"),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
    };
    assert!(format!("{err}").contains("/etc/opsi/licenses/a.opsilic"));
    assert!(err.source().is_some());
}

#[test]
fn error_is_debug() {
    let err = LicenseError::InvalidKey("truncated".into());
    let _ = format!("{err:?}");
}
