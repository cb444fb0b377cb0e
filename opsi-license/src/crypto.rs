//! Signature primitives.
//!
//! Current licenses (schema 2 and later) use RSA-PSS with MGF1/SHA3-512 and
//! a salt as long as the digest. Legacy licenses (schema 1) use a raw RSA
//! check that exists only for compatibility with historic modules files;
//! it must not be used for anything else.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pss, RsaPrivateKey, RsaPublicKey};
use sha3::Sha3_512;

use crate::error::{LicenseError, LicenseResult};

/// Signs a SHA3-512 digest with RSA-PSS.
pub(crate) fn sign_pss(private_key: &RsaPrivateKey, digest: &[u8]) -> LicenseResult<Vec<u8>> {
    private_key
        .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha3_512>(), digest)
        .map_err(|e| LicenseError::Signing(e.to_string()))
}

/// Verifies an RSA-PSS signature over a SHA3-512 digest.
pub(crate) fn verify_pss(public_key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    public_key
        .verify(Pss::new::<Sha3_512>(), digest, signature)
        .is_ok()
}

/// Legacy check: the signature, read as a big-endian integer and raised to
/// the public exponent modulo `n`, must equal the digest read as a
/// big-endian integer. No padding is involved.
pub(crate) fn verify_legacy(public_key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    let claimed = BigUint::from_bytes_be(signature);
    if &claimed >= public_key.n() {
        return false;
    }
    claimed.modpow(public_key.e(), public_key.n()) == BigUint::from_bytes_be(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::traits::PrivateKeyParts;
    use sha3::Digest;

    fn small_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(include_str!("../tests/fixtures/legacy_signing_key.pem"))
            .unwrap()
    }

    // PSS with a 64 byte digest and 64 byte salt needs more than 1024 bits.
    fn pss_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(include_str!("../tests/fixtures/current_signing_key.pem"))
            .unwrap()
    }

    #[test]
    fn pss_roundtrip() {
        let key = pss_key();
        let digest = Sha3_512::digest(b"module_id=vpn\n");
        let signature = sign_pss(&key, &digest).unwrap();
        assert!(verify_pss(&key.to_public_key(), &digest, &signature));
    }

    #[test]
    fn pss_rejects_other_digest() {
        let key = pss_key();
        let signature = sign_pss(&key, &Sha3_512::digest(b"a")).unwrap();
        assert!(!verify_pss(
            &key.to_public_key(),
            &Sha3_512::digest(b"b"),
            &signature
        ));
    }

    #[test]
    fn legacy_check_matches_raw_exponentiation() {
        let key = small_key();
        let digest = md5::Md5::digest(b"customer = uib\r\n");
        let signature = BigUint::from_bytes_be(&digest)
            .modpow(key.d(), key.n())
            .to_bytes_be();
        let public = key.to_public_key();
        assert!(verify_legacy(&public, &digest, &signature));
        assert!(!verify_legacy(&public, &md5::Md5::digest(b"other"), &signature));
    }

    #[test]
    fn legacy_check_rejects_out_of_range_signature() {
        let key = small_key().to_public_key();
        let too_big = (key.n() + &BigUint::from(1u8)).to_bytes_be();
        assert!(!verify_legacy(&key, &[0u8; 16], &too_big));
        assert!(!verify_legacy(&key, &[1u8; 16], &[]));
    }
}
