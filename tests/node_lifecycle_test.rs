/*!
 * Node Lifecycle Tests
 * Identity, enumeration, liveness and dead-node reclamation
 */

use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;
use zerobus::service::ipc;
use zerobus::{
    CallbackProgression, Config, MessagingPattern, Node, NodeBuilder, NodeName, NodeState,
    ServiceName,
};

fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default();
    config.global.root_path = root.path().join("zerobus");
    config
}

fn service_name(tag: &str) -> ServiceName {
    ServiceName::new(&format!("{tag}_{}", uuid::Uuid::new_v4().simple())).unwrap()
}

/// A node that died without cleanup leaves an unheld monitor token behind.
fn plant_dead_node(config: &Config, value: u128) -> String {
    let stem = format!("{value:032x}");
    std::fs::create_dir_all(config.node_dir()).unwrap();
    std::fs::write(config.node_monitor_path(&stem), b"").unwrap();
    stem
}

#[test]
fn node_ids_are_unique_and_names_are_kept() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let anonymous: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let named: Node<ipc::Service> = NodeBuilder::new()
        .name(NodeName::new("observer").unwrap())
        .config(&config)
        .create()
        .unwrap();

    assert_ne!(anonymous.id().value(), named.id().value());
    assert_eq!(anonymous.name(), None);
    assert_eq!(named.name().unwrap().as_str(), "observer");
    assert_eq!(named.id().pid(), std::process::id());
}

#[test]
fn list_enumerates_alive_nodes() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let _a: Node<ipc::Service> = NodeBuilder::new()
        .name(NodeName::new("a").unwrap())
        .config(&config)
        .create()
        .unwrap();
    let _b: Node<ipc::Service> = NodeBuilder::new()
        .name(NodeName::new("b").unwrap())
        .config(&config)
        .create()
        .unwrap();

    let mut alive_names = Vec::new();
    Node::<ipc::Service>::list(&config, |state| {
        if let NodeState::Alive(view) = state {
            alive_names.push(
                view.details()
                    .name()
                    .map(|n| n.as_str().to_string())
                    .unwrap_or_default(),
            );
        }
        CallbackProgression::Continue
    })
    .unwrap();

    alive_names.sort();
    assert_eq!(alive_names, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn list_respects_stop_progression() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let _a: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let _b: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();

    let mut seen = 0;
    Node::<ipc::Service>::list(&config, |_| {
        seen += 1;
        CallbackProgression::Stop
    })
    .unwrap();
    assert_eq!(seen, 1);
}

#[test]
fn node_files_disappear_with_the_node() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let node: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let stem = node.id().file_stem();
    assert!(config.node_monitor_path(&stem).exists());
    assert!(config.node_details_path(&stem).exists());

    drop(node);
    assert!(!config.node_monitor_path(&stem).exists());
    assert!(!config.node_details_path(&stem).exists());
}

#[test]
#[serial]
fn dead_node_is_listed_and_explicitly_reclaimable() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    // Keep the opportunistic reaper out of this test.
    config.global.node.cleanup_dead_nodes_on_creation = false;
    config.global.node.cleanup_dead_nodes_on_destruction = false;

    let _observer: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let stem = plant_dead_node(&config, 0xDEAD_BEEF_DEAD_BEEF_DEAD_BEEF_DEAD_BEEF);

    let mut dead_views = Vec::new();
    let mut alive = 0;
    Node::<ipc::Service>::list(&config, |state| {
        match state {
            NodeState::Dead(view) => dead_views.push(view),
            NodeState::Alive(_) => alive += 1,
            NodeState::Undefined(_) => {}
        }
        CallbackProgression::Continue
    })
    .unwrap();
    assert_eq!(alive, 1);
    assert_eq!(dead_views.len(), 1);

    let removed = dead_views.pop().unwrap().remove_stale_resources().unwrap();
    assert!(removed);
    assert!(!config.node_monitor_path(&stem).exists());

    // Nothing dead remains.
    Node::<ipc::Service>::list(&config, |state| {
        assert!(matches!(state, NodeState::Alive(_)));
        CallbackProgression::Continue
    })
    .unwrap();
}

#[test]
#[serial]
fn node_creation_reaps_dead_nodes() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let stem = plant_dead_node(&config, 0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);

    // cleanup_dead_nodes_on_creation defaults to on.
    let _node: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    assert!(!config.node_monitor_path(&stem).exists());
}

#[test]
#[serial]
fn node_destruction_reaps_dead_nodes() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.global.node.cleanup_dead_nodes_on_creation = false;

    let node: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let stem = plant_dead_node(&config, 0xFEED_FACE_FEED_FACE_FEED_FACE_FEED_FACE);
    assert!(config.node_monitor_path(&stem).exists());

    // cleanup_dead_nodes_on_destruction defaults to on.
    drop(node);
    assert!(!config.node_monitor_path(&stem).exists());
}

#[test]
#[serial]
fn dead_service_creator_leaves_a_reclaimable_service() {
    use zerobus::service::Service as _;

    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.global.node.cleanup_dead_nodes_on_creation = false;
    config.global.node.cleanup_dead_nodes_on_destruction = false;

    let name = service_name("orphaned");
    let node: Node<ipc::Service> = NodeBuilder::new().config(&config).create().unwrap();
    let service = node.service_builder(&name).event().create().unwrap();
    let stem = node.id().file_stem();

    // Simulate the creator's crash: leak its handles so no cleanup runs,
    // then replace the token file so probes observe an abandoned token.
    let monitor = config.node_monitor_path(&stem);
    std::mem::forget(service);
    std::mem::forget(node);
    std::fs::remove_file(&monitor).unwrap();
    std::fs::write(&monitor, b"").unwrap();

    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );

    // A new node with cleanup-on-creation reaps the dead creator and,
    // with it, the service nobody participates in anymore.
    let mut reaper_config = config.clone();
    reaper_config.global.node.cleanup_dead_nodes_on_creation = true;
    let _reaper_node: Node<ipc::Service> =
        NodeBuilder::new().config(&reaper_config).create().unwrap();

    assert!(!config.node_monitor_path(&stem).exists());
    assert!(!config.node_details_path(&stem).exists());
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(false)
    );
}
