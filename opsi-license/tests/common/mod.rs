//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use md5::{Digest, Md5};
use opsi_license::{
    ClientNumbers, LicenseParams, LicensePool, LicenseType, OpsiLicense, PoolConfig, TrustAnchors,
    codec,
};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use std::sync::Arc;

/// Signing key for schema 2 test licenses (2048 bit).
pub fn current_signing_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(include_str!("../fixtures/current_signing_key.pem")).unwrap()
}

/// Signing key for legacy test modules files (1024 bit).
pub fn legacy_signing_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(include_str!("../fixtures/legacy_signing_key.pem")).unwrap()
}

/// Trust anchors matching the fixture signing keys.
pub fn test_anchors() -> TrustAnchors {
    TrustAnchors::new(
        legacy_signing_key().to_public_key(),
        current_signing_key().to_public_key(),
    )
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Standard license parameters valid from 2021-09-01 to 2023-12-31.
pub fn params(id: &str, module_id: &str) -> LicenseParams {
    LicenseParams {
        id: Some(id.to_string()),
        license_type: LicenseType::Standard,
        customer_id: Some("12345".to_string()),
        customer_name: Some("uib GmbH".to_string()),
        customer_address: Some("Bonifaziusplatz 1b\n55118 Mainz".to_string()),
        module_id: module_id.to_string(),
        client_number: 100,
        issued_at: Some(date(2021, 8, 5)),
        valid_from: Some(date(2021, 9, 1)),
        valid_until: Some(date(2023, 12, 31)),
        ..LicenseParams::default()
    }
}

/// Builds a license and signs it with the current fixture key.
pub fn signed(params: LicenseParams) -> OpsiLicense {
    let mut license = OpsiLicense::new(params).unwrap();
    license.sign(&current_signing_key()).unwrap();
    license
}

/// Appends a legacy signature line to modules file contents. The text must
/// grant at least one module.
pub fn sign_modules_file(text: &str) -> String {
    let licenses = codec::parse_modules(text).unwrap();
    let data = licenses[0].additional_data().unwrap_or_default().to_string();

    let key = legacy_signing_key();
    let digest = Md5::digest(data.as_bytes());
    let signature = BigUint::from_bytes_be(&digest).modpow(key.d(), key.n());
    format!("{text}signature = {}\n", hex::encode(signature.to_bytes_be()))
}

/// A pool trusting the fixture keys, with default configuration.
pub fn test_pool(clients: ClientNumbers) -> Arc<LicensePool> {
    test_pool_with(PoolConfig::default(), clients)
}

pub fn test_pool_with(config: PoolConfig, clients: ClientNumbers) -> Arc<LicensePool> {
    LicensePool::new(config, test_anchors(), Arc::new(clients))
}
