//! Node tree synchronizer against a standalone opc ua address space.

mod common;

use std::sync::Arc;

use common::{address_space, slot_names, slot_value, subtree_names, synchronizer, FlakyServer};
use sensor_ua_bridge::{Field, NameStyle, NamingRule, Reading, SensorIdentity, SlotValue};

const MAC: &str = "AA:BB:CC:DD:EE:FF";
const NAME: &str = "RuuviTag AABBCCDDEEFF";

fn all_slot_names() -> Vec<String> {
    let mut names: Vec<String> = Field::ALL.iter().map(|f| f.browse_name().to_string()).collect();
    names.sort();
    names
}

fn full_reading(base: f64) -> Reading {
    Reading {
        temperature: Some(base),
        humidity: Some(base + 1.0),
        pressure: Some(base + 2.0),
        acceleration_x: Some(base + 3.0),
        acceleration_y: Some(base + 4.0),
        acceleration_z: Some(base + 5.0),
        battery_voltage: Some(base + 6.0),
    }
}

#[tokio::test]
async fn test_first_sighting_creates_one_subtree_with_default_slots() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;

    let report = sync.dispatch(&MAC.into(), &Reading::default()).await;
    assert!(report.subtree_created);
    assert_eq!(report.slots_created, 7);
    assert!(report.is_clean());

    assert_eq!(subtree_names(&space).await, vec![NAME]);
    assert_eq!(slot_names(&space, NAME).await, all_slot_names());
    for field in Field::ALL {
        assert_eq!(slot_value(&space, NAME, field).await, Some(field.initial_value()));
    }
}

#[tokio::test]
async fn test_repeated_sightings_keep_one_subtree() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    for i in 0..5 {
        let report = sync.dispatch(&id, &full_reading(i as f64)).await;
        assert_eq!(report.subtree_created, i == 0);
        assert_eq!(report.slots_created, if i == 0 { 7 } else { 0 });
    }

    assert_eq!(subtree_names(&space).await, vec![NAME]);
    assert_eq!(slot_names(&space, NAME).await, all_slot_names());
    assert_eq!(sync.registry().len(), 1);
    assert_eq!(sync.stats().snapshot().subtrees_created, 1);
}

#[tokio::test]
async fn test_absent_fields_keep_previous_values() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    sync.dispatch(&id, &full_reading(10.0)).await;
    let partial = Reading {
        humidity: Some(55.0),
        ..Reading::default()
    };
    let report = sync.dispatch(&id, &partial).await;
    assert_eq!(report.written, vec![Field::Humidity]);

    assert_eq!(slot_value(&space, NAME, Field::Temperature).await, Some(SlotValue::Double(10.0)));
    assert_eq!(slot_value(&space, NAME, Field::Humidity).await, Some(SlotValue::Double(55.0)));
    assert_eq!(slot_value(&space, NAME, Field::Pressure).await, Some(SlotValue::Double(12.0)));
    assert_eq!(slot_value(&space, NAME, Field::BatteryVoltage).await, Some(SlotValue::Int64(16)));
}

#[tokio::test]
async fn test_later_reading_wins() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    sync.dispatch(&id, &full_reading(1.0)).await;
    sync.dispatch(&id, &full_reading(100.0)).await;

    for field in Field::ALL {
        let expected = field.convert(full_reading(100.0).get(field).unwrap()).unwrap();
        assert_eq!(slot_value(&space, NAME, field).await, Some(expected), "{field}");
    }
}

#[tokio::test]
async fn test_dispatch_is_idempotent() {
    let once = address_space();
    let twice = address_space();
    let mut sync_once = synchronizer(Arc::new(once.clone()), NamingRule::default()).await;
    let mut sync_twice = synchronizer(Arc::new(twice.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();
    let reading = full_reading(7.5);

    sync_once.dispatch(&id, &reading).await;
    sync_twice.dispatch(&id, &reading).await;
    sync_twice.dispatch(&id, &reading).await;

    assert_eq!(subtree_names(&once).await, subtree_names(&twice).await);
    for field in Field::ALL {
        assert_eq!(
            slot_value(&once, NAME, field).await,
            slot_value(&twice, NAME, field).await
        );
    }
}

#[tokio::test]
async fn test_end_to_end_example() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    sync.dispatch(
        &id,
        &Reading {
            temperature: Some(21.5),
            humidity: Some(40.0),
            ..Reading::default()
        },
    )
    .await;

    assert_eq!(slot_value(&space, NAME, Field::Temperature).await, Some(SlotValue::Double(21.5)));
    assert_eq!(slot_value(&space, NAME, Field::Humidity).await, Some(SlotValue::Double(40.0)));
    assert_eq!(slot_value(&space, NAME, Field::Pressure).await, Some(SlotValue::Double(0.0)));
    assert_eq!(slot_value(&space, NAME, Field::AccelerationX).await, Some(SlotValue::Int64(0)));
    assert_eq!(slot_value(&space, NAME, Field::BatteryVoltage).await, Some(SlotValue::Int64(0)));

    sync.dispatch(
        &id,
        &Reading {
            pressure: Some(1013.2),
            acceleration_x: Some(120.0),
            ..Reading::default()
        },
    )
    .await;

    assert_eq!(slot_value(&space, NAME, Field::Temperature).await, Some(SlotValue::Double(21.5)));
    assert_eq!(slot_value(&space, NAME, Field::Humidity).await, Some(SlotValue::Double(40.0)));
    assert_eq!(slot_value(&space, NAME, Field::Pressure).await, Some(SlotValue::Double(1013.2)));
    assert_eq!(slot_value(&space, NAME, Field::AccelerationX).await, Some(SlotValue::Int64(120)));

    // fractional acceleration is rounded, not truncated
    sync.dispatch(
        &id,
        &Reading {
            acceleration_x: Some(120.6),
            acceleration_y: Some(-0.5),
            ..Reading::default()
        },
    )
    .await;
    assert_eq!(slot_value(&space, NAME, Field::AccelerationX).await, Some(SlotValue::Int64(121)));
    assert_eq!(slot_value(&space, NAME, Field::AccelerationY).await, Some(SlotValue::Int64(-1)));
}

#[tokio::test]
async fn test_short_names_merge_colliding_identities() {
    let space = address_space();
    let rule = NamingRule {
        style: NameStyle::Short,
        prefix: "RuuviTag ".to_string(),
        short_length: 6,
    };
    let mut sync = synchronizer(Arc::new(space.clone()), rule).await;
    let first: SensorIdentity = "AA:BB:CC:00:00:01".into();
    let second: SensorIdentity = "AA:BB:CC:00:00:02".into();

    sync.dispatch(&first, &Reading { temperature: Some(20.0), ..Reading::default() }).await;
    let report = sync
        .dispatch(&second, &Reading { temperature: Some(30.0), ..Reading::default() })
        .await;

    assert!(!report.subtree_created);
    assert_eq!(subtree_names(&space).await, vec!["RuuviTag AABBCC"]);
    assert_eq!(
        slot_value(&space, "RuuviTag AABBCC", Field::Temperature).await,
        Some(SlotValue::Double(30.0))
    );
    let stats = sync.stats().snapshot();
    assert_eq!(stats.name_collisions, 1);
    assert_eq!(sync.registry().identity_count(), 2);

    // reported once per colliding identity
    sync.dispatch(&second, &Reading::default()).await;
    assert_eq!(sync.stats().snapshot().name_collisions, 1);
}

#[tokio::test]
async fn test_collision_counted_when_first_creation_failed() {
    let space = address_space();
    let flaky = Arc::new(FlakyServer::new(space.clone()));
    let rule = NamingRule {
        style: NameStyle::Short,
        prefix: "RuuviTag ".to_string(),
        short_length: 6,
    };
    let first: SensorIdentity = "AA:BB:CC:00:00:01".into();
    let second: SensorIdentity = "AA:BB:CC:00:00:02".into();
    let name = rule.derive_display_name(&second);
    let mut sync = synchronizer(flaky.clone(), rule).await;

    flaky.fail_objects(1);
    let report = sync.dispatch(&first, &Reading::default()).await;
    assert!(report.subtree.is_none());
    assert_eq!(sync.registry().identity_count(), 0);

    // the second identity creates the subtree and owns the name
    let report = sync.dispatch(&second, &Reading::default()).await;
    assert!(report.subtree_created);
    assert_eq!(sync.registry().subtree(&name).unwrap().owner, second);

    // the first identity returns and is merged as a collision
    sync.dispatch(&first, &Reading { temperature: Some(12.0), ..Reading::default() }).await;
    sync.dispatch(&first, &Reading::default()).await;
    assert_eq!(sync.stats().snapshot().name_collisions, 1);
    assert_eq!(sync.registry().identity_count(), 2);
    assert_eq!(subtree_names(&space).await, vec!["RuuviTag AABBCC"]);
    assert_eq!(
        slot_value(&space, "RuuviTag AABBCC", Field::Temperature).await,
        Some(SlotValue::Double(12.0))
    );
}

#[tokio::test]
async fn test_full_names_keep_shared_prefix_identities_apart() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;

    sync.dispatch(&"AA:BB:CC:00:00:01".into(), &Reading::default()).await;
    sync.dispatch(&"AA:BB:CC:00:00:02".into(), &Reading::default()).await;

    assert_eq!(
        subtree_names(&space).await,
        vec!["RuuviTag AABBCC000001", "RuuviTag AABBCC000002"]
    );
    assert_eq!(sync.stats().snapshot().name_collisions, 0);
}

#[tokio::test]
async fn test_partial_subtree_is_completed_slot_by_slot() {
    let space = address_space();
    let flaky = Arc::new(FlakyServer::new(space.clone()));
    let mut sync = synchronizer(flaky.clone(), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    flaky.fail_attribute("Pressure", true);
    let report = sync.dispatch(&id, &full_reading(5.0)).await;
    assert!(report.subtree_created);
    assert_eq!(report.slots_created, 6);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Field::Pressure);
    assert_eq!(report.written.len(), 6);
    assert!(!slot_names(&space, NAME).await.contains(&"Pressure".to_string()));

    flaky.fail_attribute("Pressure", false);
    let report = sync.dispatch(&id, &full_reading(6.0)).await;
    assert!(!report.subtree_created);
    assert_eq!(report.slots_created, 1);
    assert!(report.is_clean());

    assert_eq!(subtree_names(&space).await, vec![NAME]);
    assert_eq!(slot_names(&space, NAME).await, all_slot_names());
    assert_eq!(slot_value(&space, NAME, Field::Pressure).await, Some(SlotValue::Double(8.0)));
}

#[tokio::test]
async fn test_write_failure_does_not_abort_other_fields() {
    let space = address_space();
    let flaky = Arc::new(FlakyServer::new(space.clone()));
    let mut sync = synchronizer(flaky.clone(), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    flaky.fail_write("Humidity", true);
    flaky.fail_write("AccelerationZ", true);
    let report = sync.dispatch(&id, &full_reading(1.0)).await;

    let failed: Vec<Field> = report.failed.iter().map(|(f, _)| *f).collect();
    assert_eq!(failed, vec![Field::Humidity, Field::AccelerationZ]);
    assert_eq!(report.written.len(), 5);
    assert_eq!(slot_value(&space, NAME, Field::Humidity).await, Some(SlotValue::Double(0.0)));
    assert_eq!(slot_value(&space, NAME, Field::BatteryVoltage).await, Some(SlotValue::Int64(7)));

    // next cycle proceeds normally
    flaky.fail_write("Humidity", false);
    flaky.fail_write("AccelerationZ", false);
    let report = sync.dispatch(&id, &full_reading(2.0)).await;
    assert!(report.is_clean());
    assert_eq!(sync.stats().snapshot().write_failures, 2);
}

#[tokio::test]
async fn test_non_finite_integer_value_fails_only_that_field() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;

    let report = sync
        .dispatch(
            &MAC.into(),
            &Reading {
                temperature: Some(19.0),
                acceleration_x: Some(f64::NAN),
                ..Reading::default()
            },
        )
        .await;

    assert_eq!(report.written, vec![Field::Temperature]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Field::AccelerationX);
    assert_eq!(slot_value(&space, NAME, Field::AccelerationX).await, Some(SlotValue::Int64(0)));
}

#[tokio::test]
async fn test_cached_slots_skip_lookups() {
    let space = address_space();
    let flaky = Arc::new(FlakyServer::new(space.clone()));
    let mut sync = synchronizer(flaky.clone(), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    sync.dispatch(&id, &full_reading(1.0)).await;
    let after_first = flaky.lookups();
    for i in 0..10 {
        sync.dispatch(&id, &full_reading(i as f64)).await;
    }
    assert_eq!(flaky.lookups(), after_first);
}

#[tokio::test]
async fn test_existing_subtree_is_found_not_recreated() {
    use sensor_ua_bridge::address_space::OBJECTS_FOLDER;
    use sensor_ua_bridge::PublishingServer;

    let space = address_space();
    let root = space.create_object(OBJECTS_FOLDER, "Sensors").await.unwrap();
    let existing = space.create_object(root, NAME).await.unwrap();
    let temperature = space
        .create_attribute(
            existing,
            "Temperature",
            Field::Temperature.initial_value(),
            Field::Temperature.value_type(),
        )
        .await
        .unwrap();

    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    assert_eq!(sync.root(), root);

    let report = sync.dispatch(&MAC.into(), &full_reading(3.0)).await;
    assert!(!report.subtree_created);
    assert_eq!(report.subtree, Some(existing));
    assert_eq!(report.slots_created, 6);
    assert_eq!(space.read(temperature).unwrap(), SlotValue::Double(3.0));
    assert_eq!(subtree_names(&space).await, vec![NAME]);
}

#[tokio::test]
async fn test_writes_are_historized() {
    let space = address_space();
    let mut sync = synchronizer(Arc::new(space.clone()), NamingRule::default()).await;
    let id: SensorIdentity = MAC.into();

    for t in [20.0, 21.0, 22.0] {
        sync.dispatch(&id, &Reading { temperature: Some(t), ..Reading::default() }).await;
    }

    let node = space
        .resolve_path(
            sensor_ua_bridge::address_space::OBJECTS_FOLDER,
            &["Sensors", NAME, "Temperature"],
        )
        .unwrap()
        .unwrap();
    let history = space.history(node).await.unwrap().unwrap();
    let values: Vec<SlotValue> = history.into_iter().map(|s| s.value).collect();
    assert_eq!(
        values,
        vec![SlotValue::Double(20.0), SlotValue::Double(21.0), SlotValue::Double(22.0)]
    );
}
