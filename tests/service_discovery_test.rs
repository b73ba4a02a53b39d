/*!
 * Service Discovery Tests
 * does_exist, list and details without attaching
 */

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use zerobus::service::{ipc, registry, Service};
use zerobus::{
    AttributeSpecifier, CallbackProgression, Config, MessagingPattern, Node, NodeBuilder,
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
fn list_enumerates_all_ready_services() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);

    let name_a = service_name("list_a");
    let name_b = service_name("list_b");
    let _a = node.service_builder(&name_a).event().create().unwrap();
    let _b = node.service_builder(&name_b).event().create().unwrap();

    let mut listed = Vec::new();
    ipc::Service::list(&config, |details| {
        listed.push(details.name().as_str().to_string());
        CallbackProgression::Continue
    })
    .unwrap();

    listed.sort();
    let mut expected = vec![name_a.as_str().to_string(), name_b.as_str().to_string()];
    expected.sort();
    assert_eq!(listed, expected);
}

#[test]
fn list_respects_stop_progression() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);

    let _a = node.service_builder(&service_name("stop_a")).event().create().unwrap();
    let _b = node.service_builder(&service_name("stop_b")).event().create().unwrap();

    let mut seen = 0;
    ipc::Service::list(&config, |_| {
        seen += 1;
        CallbackProgression::Stop
    })
    .unwrap();
    assert_eq!(seen, 1);
}

#[test]
fn details_carry_config_and_attributes() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("details");

    let _service = node
        .service_builder(&name)
        .event()
        .max_notifiers(3)
        .create_with_attributes(&AttributeSpecifier::new().define("owner", "discovery"))
        .unwrap();

    let details = ipc::Service::details(&name, &config, MessagingPattern::Event)
        .unwrap()
        .unwrap();
    assert_eq!(details.name(), &name);
    assert_eq!(details.messaging_pattern(), MessagingPattern::Event);
    assert_eq!(
        details.static_details().event().unwrap().max_notifiers(),
        3
    );
    assert_eq!(details.attributes().key_values("owner"), vec!["discovery"]);

    assert_eq!(
        ipc::Service::details(&name, &config, MessagingPattern::RequestResponse).unwrap(),
        None
    );
}

#[test]
fn discovery_does_not_attach() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("no_attach");

    let service = node
        .service_builder(&name)
        .event()
        .max_nodes(1)
        .create()
        .unwrap();

    // The single node slot is taken; discovery still works because it
    // never joins the roster.
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );
    assert!(ipc::Service::details(&name, &config, MessagingPattern::Event)
        .unwrap()
        .is_some());
    assert_eq!(service.number_of_nodes(), 1);
}

#[test]
fn empty_registry_lists_nothing() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let mut seen = 0;
    ipc::Service::list(&config, |_| {
        seen += 1;
        CallbackProgression::Continue
    })
    .unwrap();
    assert_eq!(seen, 0);
}

#[test]
fn marked_services_are_not_listed() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("marked_listing");

    let service = node.service_builder(&name).event().create().unwrap();
    registry::mark_for_destruction::<ipc::Service>(&config, service.service_id()).unwrap();

    let mut seen = 0;
    ipc::Service::list(&config, |_| {
        seen += 1;
        CallbackProgression::Continue
    })
    .unwrap();
    assert_eq!(seen, 0);
}

#[test]
fn destroy_if_orphaned_spares_live_services() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let node = node(&config);
    let name = service_name("guarded");

    let service = node.service_builder(&name).event().create().unwrap();
    let id = service.service_id().clone();

    // A live participant holds the service.
    assert_eq!(
        registry::destroy_if_orphaned::<ipc::Service>(&config, &id),
        Ok(false)
    );
    assert_eq!(
        ipc::Service::does_exist(&name, &config, MessagingPattern::Event),
        Ok(true)
    );
}
