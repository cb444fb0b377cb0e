//! A single signed license grant.
//!
//! An [`OpsiLicense`] grants one module to a number of clients for a date
//! window. It is validated on construction, can be hashed and signed, and
//! evaluates its own [`LicenseState`] for a given date. Licenses that belong
//! to a [`LicensePool`] consult the pool for revocations and for standard
//! licenses that replace a core license.

use chrono::NaiveDate;
use md5::Md5;
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use serde::{Serialize, Serializer};
use sha3::{Digest, Sha3_512};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::anchors::{TrustAnchors, embedded_anchors};
use crate::crypto;
use crate::error::{LicenseError, LicenseResult};
use crate::pool::LicensePool;
use crate::types::{
    CURRENT_SCHEMA_VERSION, LicenseState, LicenseType, MAX_STATE_CACHE_ENTRIES,
    UNLIMITED_CLIENTS, today, unlimited_date,
};

/// Names of all fields a license document may carry.
pub const FIELD_NAMES: &[&str] = &[
    "additional_data",
    "client_number",
    "contract_id",
    "customer_address",
    "customer_id",
    "customer_name",
    "customer_unit",
    "id",
    "issued_at",
    "module_id",
    "note",
    "opsi_version",
    "revoked_ids",
    "schema_version",
    "service_id",
    "signature",
    "type",
    "valid_from",
    "valid_until",
];

/// Construction parameters for an [`OpsiLicense`].
///
/// Unset optional values take the documented defaults; empty strings are
/// treated as unset.
#[derive(Debug, Clone)]
pub struct LicenseParams {
    /// License id; a fresh UUID when `None`.
    pub id: Option<String>,
    /// License kind.
    pub license_type: LicenseType,
    /// Schema version, selects validation strictness and trust anchor.
    pub schema_version: u32,
    /// Product version the license targets (`MAJOR.MINOR`).
    pub opsi_version: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub customer_unit: Option<String>,
    pub contract_id: Option<String>,
    pub service_id: Option<String>,
    /// The licensed module.
    pub module_id: String,
    /// Number of clients, [`UNLIMITED_CLIENTS`] for no limit.
    pub client_number: u64,
    /// Defaults to today.
    pub issued_at: Option<NaiveDate>,
    /// Defaults to today.
    pub valid_from: Option<NaiveDate>,
    /// Defaults to the unlimited date.
    pub valid_until: Option<NaiveDate>,
    /// Ids of licenses this license revokes; stored sorted and
    /// deduplicated.
    pub revoked_ids: Vec<String>,
    pub note: Option<String>,
    /// Raw data covered by schema 1 signatures.
    pub additional_data: Option<String>,
    pub signature: Vec<u8>,
}

impl Default for LicenseParams {
    fn default() -> Self {
        Self {
            id: None,
            license_type: LicenseType::Standard,
            schema_version: CURRENT_SCHEMA_VERSION,
            opsi_version: "4.2".to_string(),
            customer_id: None,
            customer_name: None,
            customer_address: None,
            customer_unit: None,
            contract_id: None,
            service_id: None,
            module_id: String::new(),
            client_number: UNLIMITED_CLIENTS,
            issued_at: None,
            valid_from: None,
            valid_until: None,
            revoked_ids: Vec::new(),
            note: None,
            additional_data: None,
            signature: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct LicenseData {
    id: String,
    #[serde(rename = "type")]
    license_type: LicenseType,
    schema_version: u32,
    opsi_version: String,
    customer_id: Option<String>,
    customer_name: Option<String>,
    customer_address: Option<String>,
    customer_unit: Option<String>,
    contract_id: Option<String>,
    service_id: Option<String>,
    module_id: String,
    client_number: u64,
    issued_at: NaiveDate,
    valid_from: NaiveDate,
    valid_until: NaiveDate,
    revoked_ids: Vec<String>,
    note: Option<String>,
    additional_data: Option<String>,
    #[serde(serialize_with = "serialize_hex")]
    signature: Vec<u8>,
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheStamp {
    checksum: String,
    pool_generation: u64,
}

#[derive(Debug, Default)]
struct StateCache {
    stamp: Option<CacheStamp>,
    entries: HashMap<(bool, NaiveDate), LicenseState>,
}

/// One signed license grant.
pub struct OpsiLicense {
    data: LicenseData,
    pool: Weak<LicensePool>,
    /// `(with signature, without signature)`.
    checksums: OnceLock<(String, String)>,
    state_cache: Mutex<StateCache>,
}

impl OpsiLicense {
    /// Creates and validates a license.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidField`] if any field violates its rule.
    pub fn new(params: LicenseParams) -> LicenseResult<Self> {
        let today = today();
        let mut revoked_ids: Vec<String> = params
            .revoked_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        revoked_ids.sort();
        revoked_ids.dedup();

        let data = LicenseData {
            id: non_blank(params.id).unwrap_or_else(|| Uuid::new_v4().to_string()),
            license_type: params.license_type,
            schema_version: params.schema_version,
            opsi_version: params.opsi_version.trim().to_string(),
            customer_id: non_blank(params.customer_id).map(|v| v.trim().to_string()),
            customer_name: non_blank(params.customer_name),
            customer_address: non_blank(params.customer_address),
            customer_unit: non_blank(params.customer_unit),
            contract_id: non_blank(params.contract_id).map(|v| v.trim().to_string()),
            service_id: non_blank(params.service_id).map(|v| v.trim().to_string()),
            module_id: params.module_id.trim().to_string(),
            client_number: params.client_number,
            issued_at: params.issued_at.unwrap_or(today),
            valid_from: params.valid_from.unwrap_or(today),
            valid_until: params.valid_until.unwrap_or_else(unlimited_date),
            revoked_ids,
            note: non_blank(params.note),
            additional_data: non_blank(params.additional_data),
            signature: params.signature,
        };
        data.validate()?;
        Ok(Self::from_data(data))
    }

    /// Creates a license from a map of field names to their document
    /// representation. Empty values count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::UnknownField`] for names outside
    /// [`FIELD_NAMES`] and [`LicenseError::InvalidField`] for values that do
    /// not parse or validate.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> LicenseResult<Self> {
        let mut params = LicenseParams::default();
        for (name, value) in fields {
            if value.is_empty() {
                if !FIELD_NAMES.contains(&name.as_str()) {
                    return Err(LicenseError::UnknownField(name.clone()));
                }
                continue;
            }
            let value = value.clone();
            match name.as_str() {
                "id" => params.id = Some(value),
                "type" => params.license_type = value.trim().parse()?,
                "schema_version" => params.schema_version = parse_number("schema_version", &value)?,
                "opsi_version" => params.opsi_version = value,
                "customer_id" => params.customer_id = Some(value),
                "customer_name" => params.customer_name = Some(value),
                "customer_address" => params.customer_address = Some(value),
                "customer_unit" => params.customer_unit = Some(value),
                "contract_id" => params.contract_id = Some(value),
                "service_id" => params.service_id = Some(value),
                "module_id" => params.module_id = value,
                "client_number" => params.client_number = parse_number("client_number", &value)?,
                "issued_at" => params.issued_at = Some(parse_date("issued_at", &value)?),
                "valid_from" => params.valid_from = Some(parse_date("valid_from", &value)?),
                "valid_until" => params.valid_until = Some(parse_date("valid_until", &value)?),
                "revoked_ids" => {
                    params.revoked_ids = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect();
                }
                "note" => params.note = Some(value),
                "additional_data" => params.additional_data = Some(value),
                "signature" => {
                    params.signature = hex::decode(value.trim())
                        .map_err(|e| LicenseError::invalid("signature", e.to_string()))?;
                }
                _ => return Err(LicenseError::UnknownField(name.clone())),
            }
        }
        Self::new(params)
    }

    fn from_data(data: LicenseData) -> Self {
        Self {
            data,
            pool: Weak::new(),
            checksums: OnceLock::new(),
            state_cache: Mutex::new(StateCache::default()),
        }
    }

    /// Returns the license id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.data.id
    }

    /// Returns the license kind.
    #[must_use]
    pub fn license_type(&self) -> LicenseType {
        self.data.license_type
    }

    /// Returns the schema version.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.data.schema_version
    }

    /// Returns the opsi version the license was issued for.
    #[must_use]
    pub fn opsi_version(&self) -> &str {
        &self.data.opsi_version
    }

    /// Returns the customer id.
    #[must_use]
    pub fn customer_id(&self) -> Option<&str> {
        self.data.customer_id.as_deref()
    }

    /// Returns the customer name.
    #[must_use]
    pub fn customer_name(&self) -> Option<&str> {
        self.data.customer_name.as_deref()
    }

    /// Returns the customer address.
    #[must_use]
    pub fn customer_address(&self) -> Option<&str> {
        self.data.customer_address.as_deref()
    }

    /// Returns the customer unit.
    #[must_use]
    pub fn customer_unit(&self) -> Option<&str> {
        self.data.customer_unit.as_deref()
    }

    /// Returns the contract id.
    #[must_use]
    pub fn contract_id(&self) -> Option<&str> {
        self.data.contract_id.as_deref()
    }

    /// Returns the service id.
    #[must_use]
    pub fn service_id(&self) -> Option<&str> {
        self.data.service_id.as_deref()
    }

    /// Returns the licensed module id.
    #[must_use]
    pub fn module_id(&self) -> &str {
        &self.data.module_id
    }

    /// Returns the licensed client number.
    #[must_use]
    pub fn client_number(&self) -> u64 {
        self.data.client_number
    }

    /// Returns the issue date.
    #[must_use]
    pub fn issued_at(&self) -> NaiveDate {
        self.data.issued_at
    }

    /// Returns the first day the license is valid.
    #[must_use]
    pub fn valid_from(&self) -> NaiveDate {
        self.data.valid_from
    }

    /// Returns the last day the license is valid.
    #[must_use]
    pub fn valid_until(&self) -> NaiveDate {
        self.data.valid_until
    }

    /// Returns the ids this license revokes.
    #[must_use]
    pub fn revoked_ids(&self) -> &[String] {
        &self.data.revoked_ids
    }

    /// Returns the free-text note.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.data.note.as_deref()
    }

    /// Returns the additional data a legacy signature covers.
    #[must_use]
    pub fn additional_data(&self) -> Option<&str> {
        self.data.additional_data.as_deref()
    }

    /// Returns the signature bytes (empty when unsigned).
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.data.signature
    }

    /// Returns the pool this license belongs to, if it is still alive.
    #[must_use]
    pub fn pool(&self) -> Option<Arc<LicensePool>> {
        self.pool.upgrade()
    }

    pub(crate) fn attach(&mut self, pool: Weak<LicensePool>) {
        self.pool = pool;
        self.state_cache.get_mut().entries.clear();
    }

    /// Replaces the signature.
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.data.signature = signature;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.checksums = OnceLock::new();
        let cache = self.state_cache.get_mut();
        cache.stamp = None;
        cache.entries.clear();
    }

    /// Returns the primitive representation of every field, keyed and
    /// ordered by field name.
    #[must_use]
    pub fn to_fields(&self) -> BTreeMap<&'static str, String> {
        let d = &self.data;
        let text = |v: &Option<String>| v.clone().unwrap_or_default();

        BTreeMap::from([
            ("additional_data", text(&d.additional_data)),
            ("client_number", d.client_number.to_string()),
            ("contract_id", text(&d.contract_id)),
            ("customer_address", text(&d.customer_address)),
            ("customer_id", text(&d.customer_id)),
            ("customer_name", text(&d.customer_name)),
            ("customer_unit", text(&d.customer_unit)),
            ("id", d.id.clone()),
            ("issued_at", d.issued_at.to_string()),
            ("module_id", d.module_id.clone()),
            ("note", text(&d.note)),
            ("opsi_version", d.opsi_version.clone()),
            ("revoked_ids", d.revoked_ids.join(",")),
            ("schema_version", d.schema_version.to_string()),
            ("service_id", text(&d.service_id)),
            ("signature", hex::encode(&d.signature)),
            ("type", d.license_type.to_string()),
            ("valid_from", d.valid_from.to_string()),
            ("valid_until", d.valid_until.to_string()),
        ])
    }

    /// Returns the canonical byte string checksums and hashes are computed
    /// over: `name=value\n` for every field in name order.
    #[must_use]
    pub fn hash_base(&self, with_signature: bool) -> Vec<u8> {
        let mut base = String::new();
        for (name, value) in self.to_fields() {
            if !with_signature && name == "signature" {
                continue;
            }
            base.push_str(name);
            base.push('=');
            base.push_str(&value);
            base.push('\n');
        }
        base.into_bytes()
    }

    /// Returns the CRC-32 of the hash base as lowercase hex.
    #[must_use]
    pub fn get_checksum(&self, with_signature: bool) -> String {
        let (with, without) = self.checksums.get_or_init(|| {
            (
                format!("{:x}", crc32fast::hash(&self.hash_base(true))),
                format!("{:x}", crc32fast::hash(&self.hash_base(false))),
            )
        });
        if with_signature {
            with.clone()
        } else {
            without.clone()
        }
    }

    /// Returns the digest that is signed: MD5 of the additional data for
    /// schema 1, SHA3-512 of the signature-free hash base otherwise.
    #[must_use]
    pub fn get_hash(&self) -> Vec<u8> {
        if self.data.schema_version == 1 {
            let data = self.data.additional_data.as_deref().unwrap_or_default();
            Md5::digest(data.as_bytes()).to_vec()
        } else {
            Sha3_512::digest(self.hash_base(false)).to_vec()
        }
    }

    /// Signs the license with RSA-PSS and stores the signature.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::UnsupportedSchema`] for schema versions below 2
    /// and [`LicenseError::Signing`] if the key cannot produce a signature.
    pub fn sign(&mut self, private_key: &RsaPrivateKey) -> LicenseResult<()> {
        if self.data.schema_version < 2 {
            return Err(LicenseError::UnsupportedSchema(self.data.schema_version));
        }
        let signature = crypto::sign_pss(private_key, &self.get_hash())?;
        self.set_signature(signature);
        Ok(())
    }

    /// Checks the signature against the trust anchor for this schema.
    #[must_use]
    pub fn verify_signature(&self, anchors: &TrustAnchors) -> bool {
        let key = anchors.for_schema(self.data.schema_version);
        if self.data.signature.is_empty() {
            return false;
        }
        if self.data.schema_version == 1 {
            crypto::verify_legacy(key, &self.get_hash(), &self.data.signature)
        } else {
            crypto::verify_pss(key, &self.get_hash(), &self.data.signature)
        }
    }

    /// Returns the state of this license at `at_date` (default today).
    ///
    /// The signature is checked first; an invalid signature overrides every
    /// other condition. Revocation is only considered when `test_revoked` is
    /// set and the license belongs to a pool.
    pub fn get_state(&self, test_revoked: bool, at_date: Option<NaiveDate>) -> LicenseState {
        let at_date = at_date.unwrap_or_else(today);
        let stamp = CacheStamp {
            checksum: self.get_checksum(true),
            pool_generation: self.pool.upgrade().map_or(0, |pool| pool.generation()),
        };

        {
            let mut cache = self.state_cache.lock();
            if cache.stamp.as_ref() != Some(&stamp)
                || cache.entries.len() > MAX_STATE_CACHE_ENTRIES
            {
                cache.entries.clear();
                cache.stamp = Some(stamp.clone());
            }
            if let Some(state) = cache.entries.get(&(test_revoked, at_date)) {
                return *state;
            }
        }

        // The cache lock is released here: evaluation may ask the pool for
        // the state of other licenses.
        let state = self.evaluate_state(test_revoked, at_date);

        let mut cache = self.state_cache.lock();
        if cache.stamp.as_ref() == Some(&stamp) {
            cache.entries.insert((test_revoked, at_date), state);
        }
        state
    }

    fn evaluate_state(&self, test_revoked: bool, at_date: NaiveDate) -> LicenseState {
        let pool = self.pool.upgrade();
        let anchors = match pool.as_deref() {
            Some(pool) => Some(pool.trust_anchors()),
            None => embedded_anchors(),
        };

        if !anchors.is_some_and(|anchors| self.verify_signature(anchors)) {
            debug!(license_id = %self.data.id, "License signature does not verify");
            return LicenseState::InvalidSignature;
        }

        if let Some(pool) = pool.as_deref() {
            if self.data.license_type == LicenseType::Core
                && self.is_replaced_by_non_core(pool, at_date)
            {
                return LicenseState::ReplacedByNonCore;
            }
            if test_revoked
                && pool
                    .get_revoked_license_ids(Some(at_date))
                    .contains(&self.data.id)
            {
                return LicenseState::Revoked;
            }
        }

        if self.data.valid_from > at_date {
            LicenseState::NotYetValid
        } else if self.data.valid_until < at_date {
            LicenseState::Expired
        } else {
            LicenseState::Valid
        }
    }

    fn is_replaced_by_non_core(&self, pool: &LicensePool, at_date: NaiveDate) -> bool {
        pool.snapshot().iter().any(|other| {
            other.id() != self.id()
                && other.license_type() == LicenseType::Standard
                && other.module_id() == self.module_id()
                && other.get_state(false, Some(at_date)) == LicenseState::Valid
        })
    }
}

impl Clone for OpsiLicense {
    /// Clones the license data. The clone belongs to no pool.
    fn clone(&self) -> Self {
        Self::from_data(self.data.clone())
    }
}

impl PartialEq for OpsiLicense {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for OpsiLicense {}

impl fmt::Debug for OpsiLicense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.data, f)
    }
}

impl Serialize for OpsiLicense {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl LicenseData {
    fn validate(&self) -> LicenseResult<()> {
        if !is_valid_license_id(&self.id) {
            return Err(LicenseError::invalid(
                "id",
                format!("'{}' must be at least 10 characters of [A-Za-z0-9_-]", self.id),
            ));
        }
        if self.schema_version == 0 {
            return Err(LicenseError::invalid("schema_version", "must be at least 1"));
        }
        if !is_valid_opsi_version(&self.opsi_version) {
            return Err(LicenseError::invalid(
                "opsi_version",
                format!("'{}' is not of the form MAJOR.MINOR", self.opsi_version),
            ));
        }
        if !is_valid_module_id(&self.module_id) {
            return Err(LicenseError::invalid(
                "module_id",
                format!("'{}' must be non-empty [a-z0-9_-]", self.module_id),
            ));
        }
        if self.client_number == 0 || self.client_number > UNLIMITED_CLIENTS {
            return Err(LicenseError::invalid(
                "client_number",
                format!("must be between 1 and {UNLIMITED_CLIENTS}"),
            ));
        }

        let standard = self.license_type == LicenseType::Standard;
        if (standard || self.schema_version <= 1) && self.customer_name.is_none() {
            return Err(LicenseError::invalid("customer_name", "must not be blank"));
        }
        if standard && self.schema_version >= 2 {
            if self.customer_id.is_none() {
                return Err(LicenseError::invalid("customer_id", "must not be blank"));
            }
            if self.customer_address.is_none() {
                return Err(LicenseError::invalid("customer_address", "must not be blank"));
            }
        }

        for (field, value) in [
            ("customer_id", &self.customer_id),
            ("contract_id", &self.contract_id),
            ("service_id", &self.service_id),
        ] {
            if value.as_deref().is_some_and(|v| v.contains(['\n', '\r'])) {
                return Err(LicenseError::invalid(field, "must be a single line"));
            }
        }

        if let Some(bad) = self.revoked_ids.iter().find(|id| !is_valid_license_id(id)) {
            return Err(LicenseError::invalid(
                "revoked_ids",
                format!("'{bad}' is not a valid license id"),
            ));
        }
        Ok(())
    }
}

/// Returns true if `id` is usable as a license id.
#[must_use]
pub fn is_valid_license_id(id: &str) -> bool {
    id.len() >= 10
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_valid_module_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn is_valid_opsi_version(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => [major, minor]
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> LicenseResult<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| LicenseError::invalid(field, format!("'{value}': {e}")))
}

fn parse_date(field: &'static str, value: &str) -> LicenseResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| LicenseError::invalid(field, format!("'{value}': {e}")))
}
