use skyfs_core::config::{load_json, save_json, ProviderConfig, RenterConfig, DEFAULT_MAX_ACTIVITY};
use skyfs_core::keys::Identity;
use skyfs_core::placement::PlacementPolicy;
use skyfs_core::transfer::TransferConfig;
use skyfs_core::version::RedundancyPolicy;

#[test]
fn minimal_configs_fill_defaults() {
    let p: ProviderConfig =
        serde_json::from_str(r#"{"providerId":"p1","apiAddress":"local://p1","totalStorage":1024}"#).unwrap();
    assert_eq!(p.max_activity, DEFAULT_MAX_ACTIVITY);
    assert_eq!(p.storage_rate, 0);

    let r: RenterConfig = serde_json::from_str(r#"{"renterId":"r1","alias":"me"}"#).unwrap();
    assert_eq!(r.redundancy, RedundancyPolicy::default());
    assert_eq!(r.placement, PlacementPolicy::DistinctProviders);
    assert_eq!(r.transfer, TransferConfig::default());
}

#[test]
fn redundancy_policy_is_tagged_by_mode() {
    let r: RenterConfig = serde_json::from_str(
        r#"{"renterId":"r1","alias":"me","placement":"spread",
            "redundancy":{"mode":"fixed","dataBlocks":4,"parityBlocks":2},
            "transfer":{"workers":2,"maxAttempts":5,"backoffBaseMs":10}}"#,
    )
    .unwrap();
    assert_eq!(r.redundancy, RedundancyPolicy::fixed(4, 2));
    assert_eq!(r.placement, PlacementPolicy::Spread);
    assert_eq!(r.transfer.max_attempts, 5);
}

#[test]
fn save_replaces_whole_file() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("nested").join("provider.json");
    save_json(&path, &ProviderConfig::new("p1", "a", 10)).unwrap();
    save_json(&path, &ProviderConfig::new("p1", "b", 20)).unwrap();
    let back: ProviderConfig = load_json(&path).unwrap();
    assert_eq!((back.api_address.as_str(), back.total_storage), ("b", 20));
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn identity_key_file_round_trips() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("key.json");
    let id = Identity::generate("alice");
    id.save(&path).unwrap();
    let back = Identity::load(&path).unwrap();
    assert_eq!(back.id, "alice");
    assert_eq!(back.public(), id.public());
}
