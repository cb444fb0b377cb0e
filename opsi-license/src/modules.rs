//! Per-module aggregation of valid licenses against live client counts.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clients::{ClientNumbers, Platform};
use crate::config::PoolConfig;
use crate::license::OpsiLicense;
use crate::types::{FREE_MODULE_IDS, LicenseState, MODULE_IDS, ModuleState, UNLIMITED_CLIENTS};

/// Licensing summary of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Module this summary is for.
    pub module_id: String,
    /// Whether the module may be used.
    pub available: bool,
    /// Licensing state of the module.
    pub state: ModuleState,
    /// Ids of the valid licenses for this module, sorted.
    pub license_ids: Vec<String>,
    /// Sum of the licensed client numbers, capped at unlimited.
    pub client_number: u64,
    /// Client count the usage ratio was computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_count: Option<u64>,
}

impl ModuleInfo {
    fn unlicensed(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            available: false,
            state: ModuleState::Unlicensed,
            license_ids: Vec::new(),
            client_number: 0,
            client_count: None,
        }
    }

    fn free(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            available: true,
            state: ModuleState::Free,
            license_ids: Vec::new(),
            client_number: UNLIMITED_CLIENTS,
            client_count: None,
        }
    }
}

/// Platform whose clients count against a module's client number.
#[must_use]
pub fn counted_platform(module_id: &str) -> Platform {
    match module_id {
        "linux_agent" => Platform::Linux,
        "macos_agent" => Platform::MacOS,
        _ => Platform::All,
    }
}

/// Builds the module map from `licenses` as of `at_date`.
pub(crate) fn aggregate<I>(
    licenses: I,
    at_date: NaiveDate,
    clients: ClientNumbers,
    config: &PoolConfig,
) -> BTreeMap<String, ModuleInfo>
where
    I: IntoIterator<Item = Arc<OpsiLicense>>,
{
    let mut modules: BTreeMap<String, ModuleInfo> = MODULE_IDS
        .iter()
        .map(|id| ((*id).to_string(), ModuleInfo::unlicensed(id)))
        .chain(
            FREE_MODULE_IDS
                .iter()
                .map(|id| ((*id).to_string(), ModuleInfo::free(id))),
        )
        .collect();

    for license in licenses {
        let module_id = license.module_id();
        if FREE_MODULE_IDS.contains(&module_id) {
            continue;
        }
        if license.get_state(true, Some(at_date)) != LicenseState::Valid {
            continue;
        }
        let info = modules
            .entry(module_id.to_string())
            .or_insert_with(|| ModuleInfo::unlicensed(module_id));
        info.available = true;
        info.state = ModuleState::Licensed;
        info.license_ids.push(license.id().to_string());
        info.client_number = info
            .client_number
            .saturating_add(license.client_number())
            .min(UNLIMITED_CLIENTS);
    }

    for info in modules.values_mut() {
        info.license_ids.sort();
        if info.state != ModuleState::Licensed || info.client_number >= UNLIMITED_CLIENTS {
            continue;
        }
        let count = clients.for_platform(counted_platform(&info.module_id));
        info.client_count = Some(count);
        let (state, available) = grade(
            count,
            info.client_number,
            config.warning_percent,
            config.over_limit_percent,
        );
        info.state = state;
        info.available = available;
    }

    modules
}

/// Grades `count` clients against a licensed `limit`.
///
/// Compares `count * 100` with `percent * limit` so no rounding is involved.
/// Percentages above 100 are treated as 100.
fn grade(count: u64, limit: u64, warning_percent: u32, over_limit_percent: u32) -> (ModuleState, bool) {
    let used = u128::from(count) * 100;
    let at = |percent: u32| u128::from(percent) * u128::from(limit);
    let warning_percent = warning_percent.min(100);
    let over_limit_percent = over_limit_percent.min(100);

    if used >= at(100u32.saturating_add(over_limit_percent)) {
        (ModuleState::OverLimit, false)
    } else if used > at(100) {
        (ModuleState::OverLimit, true)
    } else if used >= at(100 - warning_percent) {
        (ModuleState::CloseToLimit, true)
    } else {
        (ModuleState::Licensed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_with_default_percentages() {
        let cases = [
            (94, ModuleState::Licensed, true),
            (95, ModuleState::CloseToLimit, true),
            (100, ModuleState::CloseToLimit, true),
            (101, ModuleState::OverLimit, true),
            (104, ModuleState::OverLimit, true),
            (105, ModuleState::OverLimit, false),
            (300, ModuleState::OverLimit, false),
        ];
        for (count, state, available) in cases {
            assert_eq!(grade(count, 100, 5, 5), (state, available), "{count} clients");
        }
    }

    #[test]
    fn grading_is_exact() {
        // 29 of 30 is 96.67 %, just inside the warning band.
        assert_eq!(grade(29, 30, 4, 5).0, ModuleState::CloseToLimit);
        assert_eq!(grade(28, 30, 4, 5).0, ModuleState::Licensed);
    }

    #[test]
    fn zero_percent_bands() {
        assert_eq!(grade(99, 100, 0, 0), (ModuleState::Licensed, true));
        assert_eq!(grade(100, 100, 0, 5), (ModuleState::CloseToLimit, true));
        assert_eq!(grade(101, 100, 0, 0), (ModuleState::OverLimit, false));
    }

    #[test]
    fn out_of_range_percentages_are_capped() {
        assert_eq!(grade(50, 100, 5, u32::MAX), (ModuleState::Licensed, true));
        assert_eq!(grade(150, 100, 5, u32::MAX), (ModuleState::OverLimit, true));
        assert_eq!(grade(200, 100, 5, u32::MAX), (ModuleState::OverLimit, false));
        for count in [0, 1, 99, 101] {
            assert_eq!(grade(count, 100, 250, 5), grade(count, 100, 100, 5));
        }
    }

    #[test]
    fn agents_count_their_platform() {
        assert_eq!(counted_platform("linux_agent"), Platform::Linux);
        assert_eq!(counted_platform("macos_agent"), Platform::MacOS);
        assert_eq!(counted_platform("scalability1"), Platform::All);
    }

    #[test]
    fn empty_input_lists_known_modules() {
        let modules = aggregate(
            Vec::new(),
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            ClientNumbers::default(),
            &PoolConfig::default(),
        );
        assert_eq!(modules.len(), MODULE_IDS.len() + FREE_MODULE_IDS.len());
        assert_eq!(modules["vpn"], ModuleInfo::unlicensed("vpn"));
        assert_eq!(modules["treeview"].state, ModuleState::Free);
        assert!(modules["treeview"].available);
    }
}
