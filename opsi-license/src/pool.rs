//! The license pool.
//!
//! A [`LicensePool`] owns every license known to the service, keyed by id.
//! It reads them from the configured sources, answers validity queries and
//! aggregates per-module availability. The pool always lives in an [`Arc`];
//! every record it holds keeps a weak back-reference so that it can ask the
//! pool about revocations and replacements.
//!
//! Queries never hold the pool lock while a record evaluates its state:
//! they work on a snapshot of the record handles taken at call time.

use chrono::{Days, NaiveDate};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::anchors::TrustAnchors;
use crate::clients::{ClientInfo, ClientNumbers};
use crate::codec::{self, LICENSE_FILE_SUFFIX};
use crate::config::PoolConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::license::OpsiLicense;
use crate::modules::{self, ModuleInfo};
use crate::types::{LicenseState, LicenseType, today, unlimited_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Document,
    ModulesFile,
}

#[derive(Default)]
struct PoolInner {
    licenses: HashMap<String, Arc<OpsiLicense>>,
    modification_times: HashMap<PathBuf, SystemTime>,
}

/// Selects licenses in [`LicensePool::get_licenses`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseFilter {
    /// Licenses with these ids are skipped.
    pub exclude_ids: BTreeSet<String>,
    /// Only licenses of these kinds; all kinds when `None`.
    pub types: Option<Vec<LicenseType>>,
    /// Only licenses for these modules; all modules when `None`.
    pub module_ids: Option<BTreeSet<String>>,
    /// Only licenses of these schema versions; all versions when `None`.
    pub schema_versions: Option<BTreeSet<u32>>,
    /// Only licenses whose state is [`LicenseState::Valid`].
    pub valid_only: bool,
    /// Whether revocation counts when `valid_only` is set.
    pub test_revoked: bool,
    /// Evaluation date, today when `None`.
    pub at_date: Option<NaiveDate>,
}

impl Default for LicenseFilter {
    fn default() -> Self {
        Self {
            exclude_ids: BTreeSet::new(),
            types: None,
            module_ids: None,
            schema_versions: None,
            valid_only: false,
            test_revoked: true,
            at_date: None,
        }
    }
}

impl LicenseFilter {
    /// A filter that matches every license.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exclude_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn types(mut self, types: impl IntoIterator<Item = LicenseType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    #[must_use]
    pub fn module_ids<I, S>(mut self, module_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module_ids = Some(module_ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn schema_versions(mut self, versions: impl IntoIterator<Item = u32>) -> Self {
        self.schema_versions = Some(versions.into_iter().collect());
        self
    }

    #[must_use]
    pub fn valid_only(mut self, valid_only: bool) -> Self {
        self.valid_only = valid_only;
        self
    }

    #[must_use]
    pub fn test_revoked(mut self, test_revoked: bool) -> Self {
        self.test_revoked = test_revoked;
        self
    }

    #[must_use]
    pub fn at_date(mut self, at_date: NaiveDate) -> Self {
        self.at_date = Some(at_date);
        self
    }

    /// Returns true if `license` passes the filter. State is evaluated
    /// last and only when needed.
    #[must_use]
    pub fn matches(&self, license: &OpsiLicense) -> bool {
        if self.exclude_ids.contains(license.id()) {
            return false;
        }
        if self
            .types
            .as_ref()
            .is_some_and(|types| !types.contains(&license.license_type()))
        {
            return false;
        }
        if self
            .module_ids
            .as_ref()
            .is_some_and(|ids| !ids.contains(license.module_id()))
        {
            return false;
        }
        if self
            .schema_versions
            .as_ref()
            .is_some_and(|versions| !versions.contains(&license.schema_version()))
        {
            return false;
        }
        !self.valid_only
            || license.get_state(self.test_revoked, self.at_date) == LicenseState::Valid
    }
}

/// The set of licenses known to the service.
pub struct LicensePool {
    this: Weak<LicensePool>,
    config: PoolConfig,
    anchors: TrustAnchors,
    client_info: Arc<dyn ClientInfo>,
    inner: RwLock<PoolInner>,
    generation: AtomicU64,
}

impl LicensePool {
    /// Creates an empty pool. Call [`load`](Self::load) to read the
    /// configured sources.
    #[must_use]
    pub fn new(
        config: PoolConfig,
        anchors: TrustAnchors,
        client_info: Arc<dyn ClientInfo>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            anchors,
            client_info,
            inner: RwLock::new(PoolInner::default()),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the keys the pool's licenses verify against.
    #[must_use]
    pub fn trust_anchors(&self) -> &TrustAnchors {
        &self.anchors
    }

    /// Returns the current client numbers.
    #[must_use]
    pub fn client_numbers(&self) -> ClientNumbers {
        self.client_info.client_numbers()
    }

    /// Returns a counter that changes on every mutation of the pool.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of licenses in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().licenses.len()
    }

    /// Returns true if the pool holds no licenses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().licenses.is_empty()
    }

    /// Returns handles to all licenses, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<OpsiLicense>> {
        let mut licenses: Vec<Arc<OpsiLicense>> =
            self.inner.read().licenses.values().cloned().collect();
        licenses.sort_by(|a, b| a.id().cmp(b.id()));
        licenses
    }

    /// Returns the license with the given id.
    #[must_use]
    pub fn get_license(&self, id: &str) -> Option<Arc<OpsiLicense>> {
        self.inner.read().licenses.get(id).cloned()
    }

    /// Adds a license, replacing any license with the same id.
    pub fn add_license(&self, mut license: OpsiLicense) -> Arc<OpsiLicense> {
        license.attach(self.this.clone());
        let license = Arc::new(license);
        let replaced = self
            .inner
            .write()
            .licenses
            .insert(license.id().to_string(), Arc::clone(&license))
            .is_some();
        self.bump_generation();
        debug!(license_id = %license.id(), replaced, "Added license");
        license
    }

    /// Adds several licenses at once.
    pub fn add_licenses(&self, licenses: impl IntoIterator<Item = OpsiLicense>) {
        let mut added = 0usize;
        {
            let mut inner = self.inner.write();
            for mut license in licenses {
                license.attach(self.this.clone());
                inner
                    .licenses
                    .insert(license.id().to_string(), Arc::new(license));
                added += 1;
            }
        }
        self.bump_generation();
        debug!(count = added, "Added licenses");
    }

    /// Removes a license. The removed record keeps its reference to the
    /// pool.
    pub fn remove_license(&self, id: &str) -> Option<Arc<OpsiLicense>> {
        let removed = self.inner.write().licenses.remove(id);
        if removed.is_some() {
            self.bump_generation();
            debug!(license_id = %id, "Removed license");
        }
        removed
    }

    /// Drops every license. Recorded source modification times are kept,
    /// so [`modified`](Self::modified) is unaffected.
    pub fn clear(&self) {
        self.inner.write().licenses.clear();
        self.bump_generation();
    }

    fn sources(&self) -> LicenseResult<Vec<(PathBuf, SourceKind)>> {
        let mut sources = Vec::new();

        if let Some(path) = &self.config.license_file_path {
            if path.is_dir() {
                let entries = fs::read_dir(path).map_err(|e| LicenseError::io(path, e))?;
                let mut files = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| LicenseError::io(path, e))?;
                    let file = entry.path();
                    if file.is_file()
                        && file
                            .extension()
                            .is_some_and(|ext| ext == LICENSE_FILE_SUFFIX)
                    {
                        files.push(file);
                    }
                }
                files.sort();
                sources.extend(files.into_iter().map(|file| (file, SourceKind::Document)));
            } else if path.is_file() {
                sources.push((path.clone(), SourceKind::Document));
            } else {
                debug!(path = %path.display(), "License file path does not exist");
            }
        }

        if let Some(path) = &self.config.modules_file_path {
            if path.is_file() {
                sources.push((path.clone(), SourceKind::ModulesFile));
            } else {
                debug!(path = %path.display(), "Modules file does not exist");
            }
        }

        Ok(sources)
    }

    /// Returns true if the sources changed since the last [`load`](Self::load):
    /// a source appeared or vanished, or a modification time differs.
    #[must_use]
    pub fn modified(&self) -> bool {
        let sources = match self.sources() {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Failed to list license sources");
                return true;
            }
        };
        let inner = self.inner.read();
        if sources.len() != inner.modification_times.len() {
            return true;
        }
        sources.iter().any(|(path, _)| {
            match (inner.modification_times.get(path), modification_time(path)) {
                (Some(recorded), Ok(current)) => *recorded != current,
                _ => true,
            }
        })
    }

    /// Replaces the pool contents with the licenses read from the
    /// configured sources.
    ///
    /// # Errors
    ///
    /// Returns the first read or parse error. The pool keeps its previous
    /// contents in that case.
    pub fn load(&self) -> LicenseResult<()> {
        let mut licenses = HashMap::new();
        let mut modification_times = HashMap::new();

        for (path, kind) in self.sources()? {
            let mtime = modification_time(&path)?;
            let loaded = match kind {
                SourceKind::Document => codec::read_license_file(&path),
                SourceKind::ModulesFile => codec::read_modules_file(&path),
            }
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "Rejected license source"))?;

            debug!(path = %path.display(), count = loaded.len(), "Read license source");
            for mut license in loaded {
                license.attach(self.this.clone());
                licenses.insert(license.id().to_string(), Arc::new(license));
            }
            modification_times.insert(path, mtime);
        }

        let count = licenses.len();
        let sources = modification_times.len();
        {
            let mut inner = self.inner.write();
            inner.licenses = licenses;
            inner.modification_times = modification_times;
        }
        self.bump_generation();
        info!(count, sources, "Loaded licenses");
        Ok(())
    }

    /// Returns the ids revoked by licenses that are valid at `at_date`
    /// (today when `None`). Revocation of the revoking licenses themselves
    /// is not considered.
    #[must_use]
    pub fn get_revoked_license_ids(&self, at_date: Option<NaiveDate>) -> BTreeSet<String> {
        let at_date = at_date.unwrap_or_else(today);
        self.snapshot()
            .iter()
            .filter(|license| license.get_state(false, Some(at_date)) == LicenseState::Valid)
            .flat_map(|license| license.revoked_ids().iter().cloned())
            .collect()
    }

    /// Returns the licenses matching `filter`, ordered by id.
    pub fn get_licenses(
        &self,
        filter: LicenseFilter,
    ) -> impl Iterator<Item = Arc<OpsiLicense>> + use<> {
        self.snapshot()
            .into_iter()
            .filter(move |license| filter.matches(license))
    }

    /// Returns the licensing summary of every known module at `at_date`
    /// (today when `None`).
    #[must_use]
    pub fn get_modules(&self, at_date: Option<NaiveDate>) -> BTreeMap<String, ModuleInfo> {
        modules::aggregate(
            self.snapshot(),
            at_date.unwrap_or_else(today),
            self.client_numbers(),
            &self.config,
        )
    }

    /// Returns the contents of the first valid legacy modules file as a
    /// key-value map including its hex signature.
    #[must_use]
    pub fn get_legacy_modules(&self) -> Option<BTreeMap<String, String>> {
        let filter = LicenseFilter::new().schema_versions([1]).valid_only(true);
        let license = self.get_licenses(filter).next()?;

        let mut modules: BTreeMap<String, String> = license
            .additional_data()
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        modules.insert("signature".to_string(), hex::encode(license.signature()));
        Some(modules)
    }

    /// Returns a checksum over all licenses valid at `at_date` (today when
    /// `None`). It is independent of the order sources were read in.
    #[must_use]
    pub fn get_licenses_checksum(&self, at_date: Option<NaiveDate>) -> String {
        let filter = LicenseFilter {
            at_date,
            ..LicenseFilter::new().valid_only(true)
        };
        let mut checksums: Vec<String> = self
            .get_licenses(filter)
            .map(|license| license.get_checksum(false))
            .collect();
        checksums.sort();
        format!("{:x}", crc32fast::hash(checksums.concat().as_bytes()))
    }

    /// Returns the dates on which the set of valid licenses may change:
    /// every `valid_from` and the day after every `valid_until` of the
    /// licenses whose signature verifies.
    #[must_use]
    pub fn get_relevant_dates(&self) -> Vec<NaiveDate> {
        let mut dates = BTreeSet::new();
        for license in self.snapshot() {
            if !license.verify_signature(&self.anchors) {
                continue;
            }
            dates.insert(license.valid_from());
            if license.valid_until() < unlimited_date() {
                if let Some(next) = license.valid_until().checked_add_days(Days::new(1)) {
                    dates.insert(next);
                }
            }
        }
        dates.into_iter().collect()
    }

    /// Writes all current-format licenses (schema 2 and later) to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::EmptyDocument`] if there are none, or
    /// [`LicenseError::Io`] if the file cannot be written.
    pub fn write_license_file(&self, path: &Path) -> LicenseResult<()> {
        let licenses: Vec<Arc<OpsiLicense>> = self
            .snapshot()
            .into_iter()
            .filter(|license| license.schema_version() >= 2)
            .collect();
        codec::write_license_file(path, licenses.iter().map(|license| &**license))?;
        info!(path = %path.display(), count = licenses.len(), "Wrote license file");
        Ok(())
    }
}

fn modification_time(path: &Path) -> LicenseResult<SystemTime> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|e| LicenseError::io(path, e))
}
