//! On-disk license formats.

pub mod document;
pub mod escape;
pub mod legacy;

pub use document::{
    LICENSE_FILE_SUFFIX, from_document, read_license_file, to_document, write_license_file,
};
pub use legacy::{parse_modules, read_modules_file};
