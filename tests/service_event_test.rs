/*!
 * Event Service Lifecycle Tests
 * Builder state machine: open, create, open-or-create, destruction
 */

use pretty_assertions::assert_eq;
use std::time::Duration;
use tempfile::TempDir;
use zerobus::service::builder::event::{
    EventCreateError, EventOpenError, EventOpenOrCreateError,
};
use zerobus::service::{ipc, local, registry, Service};
use zerobus::{
    AttributeSpecifier, AttributeVerifier, Config, EventId, MessagingPattern, Node, NodeBuilder,
    ServiceName,
};

fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.global.root_path = root.path().join("zerobus");
    config
}

fn node(config: &Config) -> Node<ipc::Service> {
    NodeBuilder::new().config(config).create().unwrap()
}

fn service_name(tag: &str) -> ServiceName {
    ServiceName::new(&format!("{tag}_{}", uuid::Uuid::new_v4().simple())).unwrap()
}

#[test]
fn create_then_exists_then_drop() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("lifecycle");

    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );

    let service = node.service_builder(&name).event().create().unwrap();
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );
    // Existence is pattern-scoped.
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::PublishSubscribe),
        Ok(false)
    );

    drop(service);
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
}

#[test]
fn second_create_fails_with_already_exists() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("duplicate");

    let _service = node.service_builder(&name).event().create().unwrap();
    let result = node.service_builder(&name).event().create();
    assert_eq!(result.err(), Some(EventCreateError::AlreadyExists));
}

#[test]
fn open_nonexistent_fails() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);

    let result = node.service_builder(&service_name("ghost")).event().open();
    assert_eq!(result.err(), Some(EventOpenError::DoesNotExist));
}

#[test]
fn open_enforces_requested_minimums() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("minimums");

    let _service = creator
        .service_builder(&name)
        .event()
        .max_notifiers(5)
        .max_listeners(7)
        .max_nodes(4)
        .event_id_max_value(31)
        .create()
        .unwrap();

    assert_eq!(
        opener
            .service_builder(&name)
            .event()
            .max_notifiers(6)
            .open()
            .err(),
        Some(EventOpenError::DoesNotSupportRequestedAmountOfNotifiers)
    );
    assert_eq!(
        opener
            .service_builder(&name)
            .event()
            .max_listeners(8)
            .open()
            .err(),
        Some(EventOpenError::DoesNotSupportRequestedAmountOfListeners)
    );
    assert_eq!(
        opener
            .service_builder(&name)
            .event()
            .max_nodes(5)
            .open()
            .err(),
        Some(EventOpenError::DoesNotSupportRequestedAmountOfNodes)
    );
    assert_eq!(
        opener
            .service_builder(&name)
            .event()
            .event_id_max_value(32)
            .open()
            .err(),
        Some(EventOpenError::DoesNotSupportRequestedMaxEventId)
    );

    // Requesting no more than recorded succeeds.
    assert!(opener
        .service_builder(&name)
        .event()
        .max_notifiers(5)
        .max_listeners(7)
        .event_id_max_value(31)
        .open()
        .is_ok());
}

#[test]
fn static_config_round_trips_through_open() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("roundtrip");

    let created = creator
        .service_builder(&name)
        .event()
        .max_notifiers(5)
        .max_listeners(7)
        .notifier_created_event(EventId::new(12))
        .notifier_dropped_event(EventId::new(13))
        .notifier_dead_event(EventId::new(14))
        .deadline(Duration::from_millis(250))
        .create()
        .unwrap();

    let opened = opener.service_builder(&name).event().open().unwrap();
    let recorded = opened.static_config();
    assert_eq!(recorded.max_notifiers(), 5);
    assert_eq!(recorded.max_listeners(), 7);
    assert_eq!(recorded.notifier_created_event(), Some(12));
    assert_eq!(recorded.notifier_dropped_event(), Some(13));
    assert_eq!(recorded.notifier_dead_event(), Some(14));
    assert_eq!(recorded.deadline(), Some(Duration::from_millis(250)));
    assert_eq!(recorded, created.static_config());
}

#[test]
fn attributes_round_trip_in_order() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("attributes");

    let _service = creator
        .service_builder(&name)
        .event()
        .create_with_attributes(
            &AttributeSpecifier::new()
                .define("k1", "v1")
                .define("k2", "v2")
                .define("k1", "v3"),
        )
        .unwrap();

    let opened = opener.service_builder(&name).event().open().unwrap();
    let pairs: Vec<(String, String)> = opened
        .attributes()
        .iter()
        .map(|a| (a.key().to_string(), a.value().to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("k1".to_string(), "v1".to_string()),
            ("k2".to_string(), "v2".to_string()),
            ("k1".to_string(), "v3".to_string()),
        ]
    );
}

#[test]
fn attribute_mismatch_fails_the_open() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("attr_mismatch");

    let _service = creator
        .service_builder(&name)
        .event()
        .create_with_attributes(&AttributeSpecifier::new().define("k1", "v1"))
        .unwrap();

    let result = opener
        .service_builder(&name)
        .event()
        .open_with_attributes(&AttributeVerifier::new().require_key("k2"));
    assert!(matches!(
        result.err(),
        Some(EventOpenError::IncompatibleAttributes(_))
    ));

    let result = opener
        .service_builder(&name)
        .event()
        .open_with_attributes(&AttributeVerifier::new().require("k1", "other"));
    assert!(matches!(
        result.err(),
        Some(EventOpenError::IncompatibleAttributes(_))
    ));

    assert!(opener
        .service_builder(&name)
        .event()
        .open_with_attributes(&AttributeVerifier::new().require("k1", "v1").require_key("k1"))
        .is_ok());
}

#[test]
fn open_or_create_covers_both_paths() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("open_or_create");

    let first = node.service_builder(&name).event().open_or_create().unwrap();
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );
    let second = node.service_builder(&name).event().open_or_create().unwrap();
    assert_eq!(first.service_id(), second.service_id());
}

#[test]
fn node_table_capacity_is_enforced() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let late = node(&config);
    let name = service_name("node_capacity");

    let _service = creator
        .service_builder(&name)
        .event()
        .max_nodes(1)
        .create()
        .unwrap();

    let result = late.service_builder(&name).event().open();
    assert_eq!(result.err(), Some(EventOpenError::ExceedsMaxNumberOfNodes));
}

#[test]
fn marked_for_destruction_blocks_new_opens() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("marked");

    let service = creator.service_builder(&name).event().create().unwrap();
    let notifier = service.notifier_builder().create().unwrap();

    registry::mark_for_destruction::<ipc::Service>(&config, service.service_id()).unwrap();

    assert_eq!(
        opener.service_builder(&name).event().open().err(),
        Some(EventOpenError::IsMarkedForDestruction)
    );
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
    // Attached holders keep working.
    assert!(notifier.notify().is_ok());

    // Removal happens when the roster empties; the name is free again.
    drop(notifier);
    drop(service);
    assert!(creator.service_builder(&name).event().create().is_ok());
}

#[test]
fn stale_creation_marker_is_reclaimed() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.global.service.creation_timeout = Duration::from_millis(50);
    let node = node(&config);
    let name = service_name("stale_marker");

    // A crashed creator left its marker behind.
    let id = zerobus::ServiceId::new(&config.global.prefix, &name, MessagingPattern::Event);
    std::fs::create_dir_all(config.service_dir()).unwrap();
    std::fs::write(config.creating_marker_path(&id), b"").unwrap();

    // While fresh it blocks creation and hangs opens.
    assert_eq!(
        node.service_builder(&name).event().create().err(),
        Some(EventCreateError::IsBeingCreatedByAnotherInstance)
    );
    assert_eq!(
        node.service_builder(&name).event().open().err(),
        Some(EventOpenError::HangsInCreation)
    );

    // Once stale it is reclaimed and creation proceeds.
    std::thread::sleep(Duration::from_millis(80));
    assert!(node.service_builder(&name).event().create().is_ok());
}

#[test]
fn foreign_schema_version_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("version");

    let service = node.service_builder(&name).event().create().unwrap();
    let path = config.static_config_path(service.service_id());

    let mut blob = std::fs::read(&path).unwrap();
    blob[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    std::fs::write(&path, &blob).unwrap();

    assert_eq!(
        node.service_builder(&name).event().open().err(),
        Some(EventOpenError::VersionMismatch)
    );
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Err(zerobus::service::ServiceDetailsError::VersionMismatch)
    );
}

#[test]
fn open_or_create_error_carries_its_origin() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let creator = node(&config);
    let opener = node(&config);
    let name = service_name("origin");

    let _service = creator
        .service_builder(&name)
        .event()
        .max_nodes(1)
        .create()
        .unwrap();

    let result = opener.service_builder(&name).event().open_or_create();
    assert_eq!(
        result.err(),
        Some(EventOpenOrCreateError::OpenError(
            EventOpenError::ExceedsMaxNumberOfNodes
        ))
    );
}

#[test]
fn local_variant_covers_the_same_lifecycle() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node: Node<local::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let name = service_name("local_lifecycle");

    assert_eq!(
        local::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
    let service = node.service_builder(&name).event().create().unwrap();
    assert_eq!(
        local::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );
    // The variants do not see each other.
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
    assert_eq!(
        node.service_builder(&name).event().create().err(),
        Some(EventCreateError::AlreadyExists)
    );
    drop(service);
    assert_eq!(
        local::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
}
