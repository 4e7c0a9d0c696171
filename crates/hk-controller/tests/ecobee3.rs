//! Regression tests for an Ecobee 3 thermostat with remote sensors

mod common;

use common::*;
use hk_controller::testing::FakeTransport;
use hk_controller::{ReconcileError, ReconcilerState, SessionError, SetupResult};
use hk_core::ConfigNumber;
use hk_registry::DeviceIdentifier;
use std::time::Duration;

const CLIMATE_SID: u64 = 16;
const OCCUPANCY_SID: u64 = 56;

fn expected_entities() -> Vec<(&'static str, String)> {
    vec![
        ("climate.homew", unique_id("123456789012", CLIMATE_SID).to_string()),
        ("binary_sensor.kitchen", unique_id("AB1C", OCCUPANCY_SID).to_string()),
        ("binary_sensor.porch", unique_id("AB2C", OCCUPANCY_SID).to_string()),
        ("binary_sensor.basement", unique_id("AB3C", OCCUPANCY_SID).to_string()),
    ]
}

fn assert_full_entity_set(harness: &TestHarness) {
    for (entity_id, unique_id) in expected_entities() {
        assert_eq!(
            harness.materializer.unique_id_of(entity_id).as_deref(),
            Some(unique_id.as_str()),
            "{entity_id}"
        );
    }
    assert_eq!(harness.materializer.registries.entities.len(), 4);
}

#[tokio::test]
async fn test_ecobee3_setup() {
    let harness = TestHarness::new().await;
    let transport = FakeTransport::new(load_accessories("ecobee3.json"));
    let mut reconciler = harness.live_reconciler(transport);

    let result = reconciler.setup().await.unwrap();

    assert_eq!(result, SetupResult::Ready);
    assert_eq!(reconciler.state(), ReconcilerState::LiveSynced);
    assert_full_entity_set(&harness);

    let devices = &harness.materializer.registries.devices;
    let root = devices
        .get_by_identifier(&DeviceIdentifier::accessory(&pairing_id(), 1))
        .unwrap();
    assert_eq!(root.name, "HomeW");
    assert_eq!(root.model, "ecobee3");
    assert_eq!(root.manufacturer, "ecobee Inc.");
    assert_eq!(root.sw_version, "4.2.394");
    assert_eq!(root.serial_number, "123456789012");

    let sensors = devices.get_children(&root.id);
    assert_eq!(sensors.len(), 3);
    for sensor in sensors {
        assert_eq!(sensor.model, "REMOTE SENSOR");
        assert_eq!(sensor.sw_version, "1.0.0");
    }

    assert_eq!(harness.cached_config_num(), Some(ConfigNumber(1)));
}

#[tokio::test]
async fn test_ecobee3_setup_from_cache() {
    let accessories = load_accessories("ecobee3.json");
    let harness = TestHarness::with_cache(&accessories, 1).await;
    let transport = FakeTransport::new(accessories);
    let mut reconciler = harness.live_reconciler(transport);

    reconciler.setup().await.unwrap();

    assert_full_entity_set(&harness);
    // Every create came from the cache; the unchanged live config number
    // touched nothing
    assert_eq!(harness.materializer.created().len(), 4);
    assert!(harness.materializer.removed().is_empty());
    assert_eq!(reconciler.state(), ReconcilerState::LiveSynced);
}

#[tokio::test]
async fn test_unchanged_config_number_makes_no_changes() {
    let accessories = load_accessories("ecobee3.json");
    let harness = TestHarness::with_cache(&accessories, 7).await;
    let transport = FakeTransport::with_config_num(accessories, ConfigNumber(7));
    let mut reconciler = harness.live_reconciler(transport.clone());

    reconciler.setup().await.unwrap();
    let from_cache = harness.materializer.take_calls();
    assert_eq!(from_cache.len(), 4);

    // Reconnect after an outage with the same topology
    transport.fail_list(Some(SessionError::Disconnected("reset".into())));
    reconciler
        .on_config_changed(ConfigNumber(8))
        .await
        .unwrap();
    assert_eq!(reconciler.state(), ReconcilerState::RetryScheduled);
    transport.fail_list(None);
    reconciler.on_timer_fire().await.unwrap();

    assert_eq!(reconciler.state(), ReconcilerState::LiveSynced);
    assert!(harness.materializer.calls().is_empty());
}

#[tokio::test]
async fn test_ecobee3_setup_connection_failure() {
    let harness = TestHarness::new().await;
    let transport = FakeTransport::new(load_accessories("ecobee3.json"));
    let mut reconciler = harness.live_reconciler(transport.clone());

    // No cache and the accessory is failing: setup cannot complete
    transport.fail_list(Some(SessionError::Disconnected("Connection failed".into())));
    let result = reconciler.setup().await.unwrap();

    assert!(matches!(result, SetupResult::NotReady { .. }));
    assert_eq!(reconciler.state(), ReconcilerState::FailedTerminal);
    assert!(harness.materializer.calls().is_empty());
    assert_eq!(harness.materializer.unique_id_of("climate.homew"), None);
    assert_eq!(harness.hooks.not_ready_count(), 1);
    assert!(harness.hooks.retry_delays().is_empty());
    assert!(!transport.is_open());

    // The host retries later and nothing from the failed attempt gets in
    // the way
    transport.fail_list(None);
    let result = reconciler.setup().await.unwrap();

    assert_eq!(result, SetupResult::Ready);
    assert_full_entity_set(&harness);
    assert_eq!(harness.materializer.created().len(), 4);
}

#[tokio::test]
async fn test_ecobee3_add_sensors_at_runtime() {
    let harness = TestHarness::new().await;
    let transport = FakeTransport::new(load_accessories("ecobee3_no_sensors.json"));
    let mut reconciler = harness.live_reconciler(transport.clone());

    reconciler.setup().await.unwrap();
    let climate = harness.materializer.unique_id_of("climate.homew").unwrap();
    assert_eq!(harness.materializer.unique_id_of("binary_sensor.kitchen"), None);
    harness.materializer.take_calls();

    let config_num = transport.update_accessories(load_accessories("ecobee3.json"));
    let outcome = reconciler
        .on_config_changed(config_num)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.created.len(), 3);
    assert!(outcome.removed.is_empty());
    assert_eq!(harness.materializer.created().len(), 3);
    assert!(harness.materializer.removed().is_empty());
    assert_eq!(
        harness.materializer.unique_id_of("climate.homew"),
        Some(climate)
    );
    assert_full_entity_set(&harness);
    assert_eq!(harness.cached_config_num(), Some(config_num));
}

#[tokio::test]
async fn test_cached_without_sensors_live_adds_sensors() {
    let harness = TestHarness::with_cache(&load_accessories("ecobee3_no_sensors.json"), 1).await;
    let transport =
        FakeTransport::with_config_num(load_accessories("ecobee3.json"), ConfigNumber(2));
    let mut reconciler = harness.live_reconciler(transport);

    reconciler.setup().await.unwrap();

    let created = harness.materializer.created();
    assert_eq!(created.len(), 4);
    assert_eq!(created[0], unique_id("123456789012", CLIMATE_SID));
    assert_eq!(created[1..].len(), 3);
    assert!(harness.materializer.removed().is_empty());
    assert_full_entity_set(&harness);
    assert_eq!(harness.cached_config_num(), Some(ConfigNumber(2)));
}

#[tokio::test]
async fn test_cache_with_connection_failure_keeps_entities() {
    let accessories = load_accessories("ecobee3.json");
    let harness = TestHarness::with_cache(&accessories, 1).await;
    let transport = FakeTransport::new(accessories);
    let mut reconciler = harness.live_reconciler(transport.clone());

    transport.fail_connect(Some(SessionError::Connection("timed out".into())));
    let result = reconciler.setup().await.unwrap();

    assert_eq!(result, SetupResult::RetryAfter(Duration::from_secs(5)));
    assert_eq!(reconciler.state(), ReconcilerState::RetryScheduled);
    assert_full_entity_set(&harness);
    assert_eq!(harness.hooks.not_ready_count(), 0);

    // Still down: the delay backs off
    let result = reconciler.on_timer_fire().await.unwrap();
    assert_eq!(result, SetupResult::RetryAfter(Duration::from_secs(10)));
    assert_eq!(
        harness.hooks.retry_delays(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );

    transport.fail_connect(None);
    let result = reconciler.on_timer_fire().await.unwrap();

    assert_eq!(result, SetupResult::Ready);
    assert_eq!(reconciler.retry_tries(), 0);
    assert_full_entity_set(&harness);
    assert_eq!(harness.materializer.created().len(), 4);
    assert!(harness.materializer.removed().is_empty());
}

#[tokio::test]
async fn test_removing_sensor_removes_one_entity() {
    let harness = TestHarness::new().await;
    let accessories = load_accessories("ecobee3.json");
    let transport = FakeTransport::new(accessories.clone());
    let mut reconciler = harness.live_reconciler(transport.clone());
    reconciler.setup().await.unwrap();
    harness.materializer.take_calls();

    let without_porch = accessories
        .into_iter()
        .filter(|a| a.serial_number != "AB2C")
        .collect();
    let config_num = transport.update_accessories(without_porch);
    reconciler.on_config_changed(config_num).await.unwrap();

    assert_eq!(
        harness.materializer.calls(),
        vec![MaterializerCall::Remove(unique_id("AB2C", OCCUPANCY_SID))]
    );
    let registries = &harness.materializer.registries;
    assert!(registries.entities.get("binary_sensor.porch").is_none());
    assert!(registries
        .devices
        .get_by_identifier(&DeviceIdentifier::accessory(&pairing_id(), 3))
        .is_none());
    assert_eq!(registries.devices.len(), 3);
}

#[tokio::test]
async fn test_auth_failure_is_terminal() {
    let accessories = load_accessories("ecobee3.json");
    let harness = TestHarness::with_cache(&accessories, 1).await;
    let transport = FakeTransport::new(accessories);
    let mut reconciler = harness.live_reconciler(transport.clone());

    transport.fail_connect(Some(SessionError::Auth("pairing removed".into())));
    let err = reconciler.setup().await.unwrap_err();

    assert!(matches!(err, ReconcileError::Auth { .. }));
    assert_eq!(reconciler.state(), ReconcilerState::FailedTerminal);
    assert_eq!(harness.hooks.not_ready_count(), 1);
    assert!(harness.hooks.retry_delays().is_empty());
    // Cached entities are left alone
    assert_full_entity_set(&harness);
    assert!(harness.materializer.removed().is_empty());

    // Timers never retry an authentication failure
    let result = reconciler.on_timer_fire().await.unwrap();
    assert!(matches!(result, SetupResult::NotReady { reason } if reason.contains("pairing removed")));
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test]
async fn test_saved_topology_survives_restart() {
    let harness = TestHarness::new().await;
    let transport = FakeTransport::new(load_accessories("ecobee3.json"));
    let mut reconciler = harness.live_reconciler(transport);
    reconciler.setup().await.unwrap();
    let saved = reconciler.active_snapshot().unwrap().clone();
    drop(reconciler);

    let harness = harness.restart().await;

    assert_eq!(harness.store.load(&pairing_id()).as_deref(), Some(&*saved));
}

#[tokio::test]
async fn test_store_write_failure_is_retried_on_next_cycle() {
    let harness = TestHarness::new().await;
    // A file where the storage directory should be makes every write fail
    let storage_dir = harness.storage.storage_dir().to_path_buf();
    std::fs::write(&storage_dir, b"blocked").unwrap();

    let transport = FakeTransport::new(load_accessories("ecobee3.json"));
    let mut reconciler = harness.live_reconciler(transport.clone());

    let result = reconciler.setup().await.unwrap();
    assert_eq!(result, SetupResult::Ready);
    assert_full_entity_set(&harness);

    // Drop the connection, then recover with the same config number
    std::fs::remove_file(&storage_dir).unwrap();
    transport.fail_list(Some(SessionError::Disconnected("reset".into())));
    reconciler
        .on_config_changed(ConfigNumber(2))
        .await
        .unwrap();
    transport.fail_list(None);
    reconciler.on_timer_fire().await.unwrap();

    let harness = harness.restart().await;
    assert_eq!(harness.cached_config_num(), Some(ConfigNumber(1)));
}
