//! Embedded trust anchors.
//!
//! Two RSA public keys form the trust root of the licensing system. The
//! key is selected solely by a license's schema version: schema 1 licenses
//! (legacy modules files) verify against the legacy key, everything newer
//! against the current key. The legacy key is kept in its historical
//! OpenSSH encoding and decoded into its numeric components at startup.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs8::DecodePublicKey;
use rsa::{BigUint, RsaPublicKey};
use std::sync::OnceLock;

use crate::error::{LicenseError, LicenseResult};

const LEGACY_PUBLIC_KEY: &str = concat!(
    "ssh-rsa ",
    "AAAAB3NzaC1yc2EAAAADAQABAAABAQCUAzOub7sWLX0hAU0/AHsecgZ/1xcDvJfW",
    "qilDHMTLXLvv3O+xGQXOvStijJd/Hl0Uf1Mf1PfYZ4ElfFzkIrZ3KZVWenvKlIk0",
    "XK+v3wp7B/YPF0FFzjo5GgE5/yPdJi7JsiljE+PRvF0FcuWa0tvMH+lP0Qq6U0xc",
    "LJK+ujNxWmN9HNkuITVrxLvkrNRl2RWmwiHIuIoPnrK+r0+g+307i1O9F9hFwBwJ",
    "9In7hnn/V81y31NVSku4zDkIgqL9aNELPJ85NR3QwEO734s3q73DG72ayZKfbMzA",
    "cJplkrvNqQI9vwYJwHLRyPsMUzCeAGWkjpo3R+rVVfarY/yHESlX",
);

const CURRENT_PUBLIC_KEY: &str = "\
-----BEGIN PUBLIC KEY-----
MIICIjANBgkqhkiG9w0BAQEFAAOCAg8AMIICCgKCAgEAu4KJozPX45wqOdrtogkE
NnuRZ/RIBhOEM0k46gXK1dC9y2bINn6wsKyExyXWbEXNBUrt3bdj6PJ1A+YJjM5Z
KSx9MsjN/p9TGp37Axg5Fjf4SF215lOIOL6TFRHAfps8Dd6QeM/zJDlxoOWSsmnk
HuEZ2RiGOpU3TkV3kVB9bW0wuyoTjtdFzWs8y/WKjbiKwWCwCBlNTtQDYQO6kLQu
YtYp37/R0IwUDoZkMWOZMRnvJDjWUvaHpGNsygFsxqVWcTslPpCyuVq9KfrlHuUn
niAwX5THyUk0oB83uTjR0kmOHxFhFleATwzNbmsOdTyO5AF0uqiw0UpJT8Vw2lhP
4R0LuIh2yJHT+rGJIABAZdWzrX1WQBvQVj1N+uAQZxWkLoHYl+erVECaYa4To2nZ
H2ivPKf71vRV0ccSxjZ3dwyaM34aZETImhljrkNvjfNNtojcnnfXz+g+IeygwoXG
FNGerzsi2R8Dt4jdSwL9i5pzX402Xgqv2/rSKjnMiz2fouBxmZ6SUWW5CZ3qPUdL
kEztAMw5heDb2JLbV/8o3G5HN/+E+/4KMblK1pYTb8ZdMY5jL4lpQM9X1jfKc/6f
yLxMvT376KFtWVmNCIq+9WrY69MvVC7VAKo7pLU1p1P+eSo/9hleyFHtlPj2oJEJ
+UHq0ROHo9nwmemK6GJetL8CAwEAAQ==
-----END PUBLIC KEY-----
";

/// The pair of public keys licenses are verified against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    legacy: RsaPublicKey,
    current: RsaPublicKey,
}

impl TrustAnchors {
    /// Creates trust anchors from already decoded keys.
    #[must_use]
    pub fn new(legacy: RsaPublicKey, current: RsaPublicKey) -> Self {
        Self { legacy, current }
    }

    /// Decodes trust anchors from an OpenSSH `ssh-rsa` public key line and
    /// an SPKI PEM document.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKey`] if either key cannot be decoded.
    pub fn from_encoded(legacy_ssh: &str, current_pem: &str) -> LicenseResult<Self> {
        let legacy = decode_ssh_rsa(legacy_ssh)?;
        let current = RsaPublicKey::from_public_key_pem(current_pem)
            .map_err(|e| LicenseError::InvalidKey(format!("current public key: {e}")))?;
        Ok(Self::new(legacy, current))
    }

    /// Decodes the trust anchors compiled into this crate.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKey`] if the embedded keys are corrupt.
    pub fn embedded() -> LicenseResult<Self> {
        Self::from_encoded(LEGACY_PUBLIC_KEY, CURRENT_PUBLIC_KEY)
    }

    /// Returns the key licenses of the given schema version verify against.
    #[must_use]
    pub fn for_schema(&self, schema_version: u32) -> &RsaPublicKey {
        if schema_version < 2 {
            &self.legacy
        } else {
            &self.current
        }
    }

    /// Returns the legacy (schema 1) key.
    #[must_use]
    pub fn legacy(&self) -> &RsaPublicKey {
        &self.legacy
    }

    /// Returns the current (schema 2 and later) key.
    #[must_use]
    pub fn current(&self) -> &RsaPublicKey {
        &self.current
    }
}

/// Embedded anchors, decoded once. `None` only if the compiled-in keys are
/// unusable, in which case no detached license verifies.
pub(crate) fn embedded_anchors() -> Option<&'static TrustAnchors> {
    static EMBEDDED: OnceLock<Option<TrustAnchors>> = OnceLock::new();
    EMBEDDED
        .get_or_init(|| match TrustAnchors::embedded() {
            Ok(anchors) => Some(anchors),
            Err(e) => {
                tracing::error!(error = %e, "Embedded trust anchors could not be decoded");
                None
            }
        })
        .as_ref()
}

/// Decodes an OpenSSH `ssh-rsa` public key (`ssh-rsa <base64> [comment]`,
/// or the bare base64 blob) into an RSA public key.
///
/// The blob is the SSH wire encoding: a length-prefixed key type string
/// followed by the length-prefixed big-endian exponent and modulus.
pub fn decode_ssh_rsa(text: &str) -> LicenseResult<RsaPublicKey> {
    let mut parts = text.split_whitespace();
    let blob_b64 = match parts.next() {
        Some("ssh-rsa") => parts.next(),
        other => other,
    }
    .ok_or_else(|| LicenseError::InvalidKey("empty ssh public key".to_string()))?;

    let blob = BASE64
        .decode(blob_b64)
        .map_err(|e| LicenseError::InvalidKey(format!("invalid ssh key base64: {e}")))?;

    let mut reader = SshReader { data: &blob };
    let key_type = reader.read_string()?;
    if key_type != b"ssh-rsa" {
        return Err(LicenseError::InvalidKey(format!(
            "unsupported ssh key type '{}'",
            String::from_utf8_lossy(key_type)
        )));
    }
    let e = BigUint::from_bytes_be(reader.read_string()?);
    let n = BigUint::from_bytes_be(reader.read_string()?);

    RsaPublicKey::new(n, e).map_err(|e| LicenseError::InvalidKey(format!("legacy public key: {e}")))
}

struct SshReader<'a> {
    data: &'a [u8],
}

impl<'a> SshReader<'a> {
    fn read_string(&mut self) -> LicenseResult<&'a [u8]> {
        if self.data.len() < 4 {
            return Err(LicenseError::InvalidKey("truncated ssh key blob".to_string()));
        }
        let (len_bytes, rest) = self.data.split_at(4);
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if rest.len() < len {
            return Err(LicenseError::InvalidKey("truncated ssh key blob".to_string()));
        }
        let (value, rest) = rest.split_at(len);
        self.data = rest;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn embedded_keys_decode() {
        let anchors = TrustAnchors::embedded().unwrap();
        assert_eq!(anchors.legacy().size(), 256);
        assert_eq!(anchors.current().size(), 512);
        assert_eq!(anchors.legacy().e(), &BigUint::from(65_537u32));
    }

    #[test]
    fn schema_selects_key() {
        let anchors = TrustAnchors::embedded().unwrap();
        assert_eq!(anchors.for_schema(1), anchors.legacy());
        assert_eq!(anchors.for_schema(2), anchors.current());
        assert_eq!(anchors.for_schema(7), anchors.current());
    }

    #[test]
    fn bare_blob_is_accepted() {
        let blob = LEGACY_PUBLIC_KEY.trim_start_matches("ssh-rsa ");
        let key = decode_ssh_rsa(blob).unwrap();
        assert_eq!(&key, TrustAnchors::embedded().unwrap().legacy());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let truncated = BASE64.encode(b"\x00\x00\x00\x07ssh-rsa\x00\x00\x00\x03\x01");
        assert!(matches!(
            decode_ssh_rsa(&truncated),
            Err(LicenseError::InvalidKey(_))
        ));
    }

    #[test]
    fn wrong_key_type_is_rejected() {
        let blob = BASE64.encode(b"\x00\x00\x00\x0bssh-ed25519");
        let err = decode_ssh_rsa(&blob).unwrap_err();
        assert!(err.to_string().contains("ssh-ed25519"));
    }
}
