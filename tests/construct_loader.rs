//! Loading construct graphs from documents on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use infragraph::graph::{load_construct_graph, ConstructDocument, ConstructKind, DocumentFormat};
use infragraph::{Error, ResourceId};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn construct_id(kind: ConstructKind, name: &str) -> ResourceId {
    ResourceId::new("klotho", kind.as_str(), name)
}

#[test]
fn test_load_web_app() {
    let graph = load_construct_graph(&fixture("web_app.yaml")).unwrap();
    assert_eq!(graph.len(), 9);
    assert_eq!(graph.dependency_count(), 8);
    assert_eq!(graph.execution_units().len(), 2);
    assert_eq!(graph.constructs_with_capability("persist").len(), 5);

    let roots: Vec<String> = graph.roots().iter().map(|c| c.name().to_string()).collect();
    assert_eq!(roots, vec!["worker", "public"]);
}

#[test]
fn test_topological_order_respects_edges() {
    let graph = load_construct_graph(&fixture("web_app.yaml")).unwrap();
    let order = graph.topological_sort().unwrap();
    let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    for edge in graph.list_dependencies() {
        let src = edge.source.id().to_string();
        let dst = edge.destination.id().to_string();
        assert!(position[src.as_str()] < position[dst.as_str()], "{} before {}", src, dst);
    }

    // stable across loads
    let again = load_construct_graph(&fixture("web_app.yaml")).unwrap();
    assert_eq!(again.topological_sort().unwrap(), order);
}

#[test]
fn test_upstream_gateways() {
    let graph = load_construct_graph(&fixture("web_app.yaml")).unwrap();
    let units = graph.execution_units();
    let api = units.iter().find(|u| u.key.id == "api").unwrap();
    let worker = units.iter().find(|u| u.key.id == "worker").unwrap();

    let gateways = graph.find_upstream_gateways(api);
    assert_eq!(gateways.len(), 1);
    assert_eq!(gateways[0].key.id, "public");
    assert!(graph.find_upstream_gateways(worker).is_empty());
}

#[test]
fn test_unknown_kinds_all_reported() {
    let err = load_construct_graph(&fixture("unknown_kind.yaml")).unwrap_err();
    match &err {
        Error::Multi(errors) => {
            assert_eq!(errors.len(), 2);
            let kinds: Vec<String> = errors
                .errors()
                .iter()
                .filter_map(|e| match e {
                    Error::UnknownKind(kind) => Some(kind.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(kinds, vec!["memcached", "message_queue"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().starts_with("2 errors occurred:"));
}

#[test]
fn test_cycle_loads_but_cannot_be_ordered() {
    let graph = load_construct_graph(&fixture("cycle.json")).unwrap();
    assert_eq!(graph.dependency_count(), 2);
    match graph.topological_sort() {
        Err(Error::Cycle { remaining }) => assert_eq!(remaining.len(), 2),
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_invalid_name_rejected() {
    let text = "resources:\n  \"bad name\": { kind: kv }\n";
    let err = infragraph::graph::parse_construct_graph(text, DocumentFormat::Yaml).unwrap_err();
    assert!(matches!(err, Error::InvalidId { .. }));
}

#[test]
fn test_render_and_reload() {
    let graph = load_construct_graph(&fixture("web_app.yaml")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web_app.json");
    let json = ConstructDocument::from_graph(&graph).render(DocumentFormat::Json).unwrap();
    std::fs::write(&path, json).unwrap();

    let reloaded = load_construct_graph(&path).unwrap();
    assert_eq!(reloaded.list_constructs(), graph.list_constructs());
    assert!(reloaded
        .get_construct(&construct_id(ConstructKind::Secret, "api-key"))
        .is_some());
}
