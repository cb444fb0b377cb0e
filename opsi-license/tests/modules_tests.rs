mod common;

use common::{date, params, signed, test_pool, test_pool_with};
use opsi_license::{
    ClientNumbers, LicenseParams, ModuleInfo, ModuleState, PoolConfig, UNLIMITED_CLIENTS,
};
use pretty_assertions::assert_eq;

fn module_with_clients(clients: ClientNumbers, module_id: &str) -> ModuleInfo {
    let pool = test_pool(clients);
    pool.add_license(signed(params("license-a-01", module_id)));
    pool.get_modules(Some(date(2022, 6, 1)))
        .remove(module_id)
        .unwrap()
}

#[test]
fn usage_bands() {
    let cases = [
        (50, ModuleState::Licensed, true),
        (94, ModuleState::Licensed, true),
        (95, ModuleState::CloseToLimit, true),
        (100, ModuleState::CloseToLimit, true),
        (101, ModuleState::OverLimit, true),
        (104, ModuleState::OverLimit, true),
        (105, ModuleState::OverLimit, false),
    ];
    for (count, state, available) in cases {
        let info = module_with_clients(ClientNumbers::new(count, 0, 0), "scalability1");
        assert_eq!((info.state, info.available), (state, available), "{count} clients");
        assert_eq!(info.client_count, Some(count));
        assert_eq!(info.client_number, 100);
    }
}

#[test]
fn configurable_bands() {
    let config = PoolConfig {
        warning_percent: 20,
        over_limit_percent: 10,
        ..PoolConfig::default()
    };
    let grade = |count: u64| {
        let pool = test_pool_with(config.clone(), ClientNumbers::new(count, 0, 0));
        pool.add_license(signed(params("license-a-01", "vpn")));
        let info = pool.get_modules(Some(date(2022, 6, 1))).remove("vpn").unwrap();
        (info.state, info.available)
    };
    assert_eq!(grade(79), (ModuleState::Licensed, true));
    assert_eq!(grade(80), (ModuleState::CloseToLimit, true));
    assert_eq!(grade(109), (ModuleState::OverLimit, true));
    assert_eq!(grade(110), (ModuleState::OverLimit, false));
}

#[test]
fn unvalidated_percentages_do_not_overflow() {
    let config = PoolConfig {
        over_limit_percent: u32::MAX,
        ..PoolConfig::default()
    };
    let pool = test_pool_with(config, ClientNumbers::new(50, 0, 0));
    pool.add_license(signed(params("license-a-01", "vpn")));
    let info = pool.get_modules(Some(date(2022, 6, 1))).remove("vpn").unwrap();
    assert_eq!((info.state, info.available), (ModuleState::Licensed, true));
}

#[test]
fn agents_count_their_platform() {
    let clients = ClientNumbers::new(1000, 10, 200);

    let linux = module_with_clients(clients, "linux_agent");
    assert_eq!(linux.client_count, Some(10));
    assert_eq!(linux.state, ModuleState::Licensed);

    let macos = module_with_clients(clients, "macos_agent");
    assert_eq!(macos.client_count, Some(200));
    assert_eq!(macos.state, ModuleState::OverLimit);
    assert!(!macos.available);

    let other = module_with_clients(clients, "vpn");
    assert_eq!(other.client_count, Some(1210));
}

#[test]
fn unlimited_licenses_are_not_graded() {
    let pool = test_pool(ClientNumbers::new(5_000_000, 0, 0));
    pool.add_license(signed(LicenseParams {
        client_number: UNLIMITED_CLIENTS,
        ..params("license-a-01", "vpn")
    }));
    let info = pool.get_modules(Some(date(2022, 6, 1))).remove("vpn").unwrap();
    assert_eq!(info.state, ModuleState::Licensed);
    assert!(info.available);
    assert_eq!(info.client_count, None);
}

#[test]
fn client_numbers_add_up_and_cap() {
    let pool = test_pool(ClientNumbers::new(150, 0, 0));
    pool.add_license(signed(params("license-b-01", "vpn")));
    pool.add_license(signed(params("license-a-01", "vpn")));
    let at = Some(date(2022, 6, 1));

    let info = pool.get_modules(at).remove("vpn").unwrap();
    assert_eq!(info.client_number, 200);
    assert_eq!(info.license_ids, ["license-a-01", "license-b-01"]);
    assert_eq!(info.state, ModuleState::Licensed);

    pool.add_license(signed(LicenseParams {
        client_number: UNLIMITED_CLIENTS,
        ..params("license-c-01", "vpn")
    }));
    let info = pool.get_modules(at).remove("vpn").unwrap();
    assert_eq!(info.client_number, UNLIMITED_CLIENTS);
    assert_eq!(info.client_count, None);
}

#[test]
fn invalid_licenses_do_not_count() {
    let pool = test_pool(ClientNumbers::default());
    pool.add_license(signed(params("license-a-01", "vpn")));
    pool.add_license(signed(LicenseParams {
        revoked_ids: vec!["license-a-01".to_string()],
        ..params("license-b-01", "monitoring")
    }));

    let modules = pool.get_modules(Some(date(2022, 6, 1)));
    assert_eq!(modules["vpn"].state, ModuleState::Unlicensed);
    assert!(!modules["vpn"].available);
    assert!(modules["vpn"].license_ids.is_empty());

    let modules = pool.get_modules(Some(date(2024, 6, 1)));
    assert_eq!(modules["monitoring"].state, ModuleState::Unlicensed);
}

#[test]
fn free_modules_ignore_licenses() {
    let pool = test_pool(ClientNumbers::new(1000, 0, 0));
    pool.add_license(signed(params("license-a-01", "treeview")));
    let info = pool.get_modules(Some(date(2022, 6, 1))).remove("treeview").unwrap();
    assert_eq!(
        info,
        ModuleInfo {
            module_id: "treeview".to_string(),
            available: true,
            state: ModuleState::Free,
            license_ids: Vec::new(),
            client_number: UNLIMITED_CLIENTS,
            client_count: None,
        }
    );
}

#[test]
fn unknown_modules_are_added() {
    let pool = test_pool(ClientNumbers::new(3, 0, 0));
    pool.add_license(signed(params("license-a-01", "new_module")));
    let modules = pool.get_modules(Some(date(2022, 6, 1)));
    assert_eq!(modules["new_module"].state, ModuleState::Licensed);
    assert_eq!(modules["new_module"].client_count, Some(3));
}

#[test]
fn module_info_json() {
    let info = module_with_clients(ClientNumbers::new(96, 0, 0), "vpn");
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["state"], "close_to_limit");
    assert_eq!(json["client_count"], 96);
    assert_eq!(json["license_ids"][0], "license-a-01");

    let pool = test_pool(ClientNumbers::default());
    let json = serde_json::to_value(pool.get_modules(None)).unwrap();
    assert!(json["vpn"].get("client_count").is_none());
    assert_eq!(json["vpn"]["available"], false);
}
