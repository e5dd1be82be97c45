//! Knowledge-base edge expansion over a live resource graph.

use std::sync::Arc;

use infragraph::graph::resource::{read_as, same_resource, write_as};
use infragraph::graph::{BaseConstructSet, Resource, ResourceGraph, ResourceHandle};
use infragraph::knowledge_base::{
    configure_from_edge_data, expand_edges, find_paths, type_of, EdgeConstraint, EdgeData, EdgeDetails,
    KnowledgeBase,
};
use infragraph::{Error, ResourceId, ResourceType};

macro_rules! fixture {
    ($($ty:ident => $kind:literal),* $(,)?) => {$(
        #[derive(Debug, Default)]
        struct $ty {
            name: String,
            touched: bool,
            base: BaseConstructSet,
        }

        impl $ty {
            fn named(name: &str) -> Self {
                Self { name: name.to_string(), ..Default::default() }
            }
        }

        impl Resource for $ty {
            fn id(&self) -> ResourceId {
                ResourceId::new("test", $kind, self.name.clone())
            }

            fn base_constructs(&self) -> &BaseConstructSet {
                &self.base
            }
        }
    )*};
}

fixture! {
    A => "a",
    B => "b",
    C => "c",
    D => "d",
    E => "e",
}

/// Expansion that wires the hop it is called for
fn link() -> EdgeDetails {
    EdgeDetails::new().with_expand(|from, to, graph, _| {
        graph.add_dependency(from, to)?;
        Ok(())
    })
}

fn id(kind: &str, name: &str) -> ResourceId {
    ResourceId::new("test", kind, name)
}

/// a -> b -> d and a -> c -> d
fn diamond() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, B>(link()).unwrap();
    kb.add_edge::<B, D>(link()).unwrap();
    kb.add_edge::<A, C>(link()).unwrap();
    kb.add_edge::<C, D>(link()).unwrap();
    kb
}

fn graph_with_edge(data: Option<EdgeData>) -> (ResourceGraph, ResourceHandle, ResourceHandle) {
    let mut graph = ResourceGraph::new();
    let a = graph.add(A::named("x"));
    let d = graph.add(D::named("y"));
    match data {
        Some(data) => graph.add_dependency_with_data(&a, &d, data).unwrap(),
        None => graph.add_dependency(&a, &d).unwrap(),
    }
    (graph, a, d)
}

#[test]
fn test_paths_through_diamond() {
    let kb = diamond();
    let mut paths = find_paths(&kb, &type_of::<A>(), &type_of::<D>());
    paths.sort();
    assert_eq!(
        paths,
        vec![
            vec![type_of::<A>(), type_of::<B>(), type_of::<D>()],
            vec![type_of::<A>(), type_of::<C>(), type_of::<D>()],
        ]
    );
}

#[test]
fn test_ambiguous_edge_left_untouched() {
    let kb = diamond();
    let (mut graph, _, _) = graph_with_edge(None);

    match expand_edges(&kb, &mut graph) {
        Err(Error::AmbiguousPath { from, to, paths }) => {
            assert_eq!(from, "test:a:x");
            assert_eq!(to, "test:d:y");
            assert_eq!(paths.len(), 2);
        }
        other => panic!("expected ambiguity, got {:?}", other.err()),
    }
    assert_eq!(graph.len(), 2);
    assert!(graph.get_dependency(&id("a", "x"), &id("d", "y")).is_some());
}

#[test]
fn test_ambiguity_message_lists_paths() {
    let kb = diamond();
    let (mut graph, _, _) = graph_with_edge(None);
    let message = expand_edges(&kb, &mut graph).unwrap_err().to_string();
    assert!(message.contains("found multiple paths"));
    assert!(message.contains("test:a -> test:b -> test:d"));
    assert!(message.contains("test:a -> test:c -> test:d"));
}

#[test]
fn test_must_exist_constraint_selects_path() {
    let kb = diamond();
    let data = EdgeData::new("shop").with_constraint(EdgeConstraint {
        node_must_exist: vec![type_of::<B>()],
        ..Default::default()
    });
    let (mut graph, _, _) = graph_with_edge(Some(data));

    expand_edges(&kb, &mut graph).unwrap();

    assert!(graph.get_dependency(&id("a", "x"), &id("d", "y")).is_none());
    assert!(graph.get_dependency(&id("a", "x"), &id("b", "")).is_some());
    assert!(graph.get_dependency(&id("b", ""), &id("d", "y")).is_some());
    assert!(graph.resources_of::<C>().is_empty());
}

#[test]
fn test_must_not_exist_constraint_selects_path() {
    let kb = diamond();
    let data = EdgeData::new("shop").with_constraint(EdgeConstraint {
        node_must_not_exist: vec![type_of::<B>()],
        ..Default::default()
    });
    let (mut graph, _, _) = graph_with_edge(Some(data));

    expand_edges(&kb, &mut graph).unwrap();
    assert_eq!(graph.resources_of::<C>().len(), 1);
    assert!(graph.resources_of::<B>().is_empty());
}

#[test]
fn test_unsatisfiable_constraints() {
    let kb = diamond();
    let data = EdgeData::new("shop").with_constraint(EdgeConstraint {
        node_must_not_exist: vec![type_of::<B>(), type_of::<C>()],
        ..Default::default()
    });
    let (mut graph, _, _) = graph_with_edge(Some(data));

    let err = expand_edges(&kb, &mut graph).unwrap_err();
    assert!(matches!(err, Error::UnsatisfiableConstraints { candidates: 2, .. }));
    assert!(graph.get_dependency(&id("a", "x"), &id("d", "y")).is_some());
}

#[test]
fn test_combined_constraints_leave_one_path() {
    // diamond plus a -> b -> e -> d
    let mut kb = diamond();
    kb.add_edge::<B, E>(link()).unwrap();
    kb.add_edge::<E, D>(link()).unwrap();
    assert_eq!(find_paths(&kb, &type_of::<A>(), &type_of::<D>()).len(), 3);

    let only_through_b = EdgeConstraint {
        node_must_exist: vec![type_of::<B>()],
        ..Default::default()
    };
    let (mut graph, _, _) = graph_with_edge(Some(EdgeData::new("shop").with_constraint(only_through_b.clone())));
    assert!(matches!(expand_edges(&kb, &mut graph), Err(Error::AmbiguousPath { .. })));

    let data = EdgeData::new("shop").with_constraint(EdgeConstraint {
        node_must_not_exist: vec![type_of::<E>()],
        ..only_through_b
    });
    let (mut graph, _, _) = graph_with_edge(Some(data));
    expand_edges(&kb, &mut graph).unwrap();

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.dependency_count(), 2);
    assert!(graph.get_dependency(&id("a", "x"), &id("b", "")).is_some());
    assert!(graph.get_dependency(&id("b", ""), &id("d", "y")).is_some());
    assert!(graph.resources_of::<C>().is_empty());
    assert!(graph.resources_of::<E>().is_empty());
}

#[test]
fn test_missing_intermediate_factory_keeps_edge() {
    let hub = ResourceType::new("test", "hub");
    let mut kb = KnowledgeBase::new();
    kb.add_edge_by_type(type_of::<A>(), hub.clone(), link()).unwrap();
    kb.add_edge_by_type(hub.clone(), type_of::<D>(), link()).unwrap();
    let (mut graph, _, _) = graph_with_edge(None);

    match expand_edges(&kb, &mut graph) {
        Err(Error::MissingFactory(missing)) => assert_eq!(missing, hub),
        other => panic!("expected missing factory, got {:?}", other.err()),
    }
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.dependency_count(), 1);
    assert!(graph.get_dependency(&id("a", "x"), &id("d", "y")).is_some());
}

#[test]
fn test_unknown_pair_is_skipped() {
    let kb = diamond();
    let mut graph = ResourceGraph::new();
    let a = graph.add(A::named("x"));
    let e = graph.add(E::named("z"));
    graph.add_dependency(&a, &e).unwrap();

    expand_edges(&kb, &mut graph).unwrap();
    assert_eq!(graph.dependency_count(), 1);
}

#[test]
fn test_long_path_rewrites_edge_and_keeps_identity() {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, B>(link()).unwrap();
    kb.add_edge::<B, C>(link()).unwrap();
    kb.add_edge::<C, E>(link()).unwrap();
    kb.add_edge::<E, D>(link()).unwrap();

    let (mut graph, a, d) = graph_with_edge(None);
    expand_edges(&kb, &mut graph).unwrap();

    assert_eq!(graph.len(), 5);
    assert_eq!(graph.dependency_count(), 4);
    assert!(graph.get_dependency(&id("a", "x"), &id("d", "y")).is_none());
    assert!(graph.get_dependency(&id("a", "x"), &id("b", "")).is_some());
    assert!(graph.get_dependency(&id("b", ""), &id("c", "")).is_some());
    assert!(graph.get_dependency(&id("c", ""), &id("e", "")).is_some());
    assert!(graph.get_dependency(&id("e", ""), &id("d", "y")).is_some());

    let stored_a = graph.get_resource(&id("a", "x")).unwrap();
    let stored_d = graph.get_resource(&id("d", "y")).unwrap();
    assert!(same_resource(&stored_a, &a));
    assert!(same_resource(&stored_d, &d));

    let order: Vec<String> = graph
        .reverse_topological_sort()
        .unwrap()
        .iter()
        .map(|r| r.read().id().to_string())
        .collect();
    assert_eq!(order, vec!["test:d:y", "test:e", "test:c", "test:b", "test:a:x"]);
}

#[test]
fn test_hops_continue_from_graph_instance() {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, B>(link()).unwrap();
    kb.add_edge::<B, D>(EdgeDetails::new().with_expand(|from, to, graph, _| {
        if let Some(mut b) = write_as::<B>(from) {
            b.touched = true;
        }
        graph.add_dependency(from, to)?;
        Ok(())
    }))
    .unwrap();

    let (mut graph, _, _) = graph_with_edge(None);
    let existing = graph.add(B::default());

    expand_edges(&kb, &mut graph).unwrap();

    let stored = graph.get_resource(&id("b", "")).unwrap();
    assert!(same_resource(&stored, &existing));
    assert!(read_as::<B>(&existing).unwrap().touched);
}

#[test]
fn test_expansion_failure_is_wrapped() {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, D>(
        EdgeDetails::new().with_expand(|_, _, _, _| Err(anyhow::anyhow!("quota exceeded"))),
    )
    .unwrap();

    let (mut graph, _, _) = graph_with_edge(None);
    let err = expand_edges(&kb, &mut graph).unwrap_err();
    match &err {
        Error::Expansion { from, to, .. } => {
            assert_eq!(from, "test:a:x");
            assert_eq!(to, "test:d:y");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("quota exceeded"));
}

#[test]
fn test_configure_runs_per_edge() {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, D>(link().with_configure(|from, to, data| {
        assert_eq!(data.app_name, "shop");
        write_as::<D>(to).unwrap().touched = true;
        assert!(read_as::<A>(from).is_some());
        Ok(())
    }))
    .unwrap();

    let (mut graph, _, d) = graph_with_edge(Some(EdgeData::new("shop")));
    expand_edges(&kb, &mut graph).unwrap();
    assert_eq!(graph.dependency_count(), 1);

    configure_from_edge_data(&kb, &graph).unwrap();
    assert!(read_as::<D>(&d).unwrap().touched);
}

#[test]
fn test_configure_failure_is_wrapped() {
    let mut kb = KnowledgeBase::new();
    kb.add_edge::<A, D>(EdgeDetails::new().with_configure(|_, _, _| Err(anyhow::anyhow!("bad port"))))
        .unwrap();

    let (graph, _, _) = graph_with_edge(None);
    let err = configure_from_edge_data(&kb, &graph).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_shared_knowledge_base_across_threads() {
    let kb = Arc::new(diamond());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kb = Arc::clone(&kb);
            std::thread::spawn(move || find_paths(&kb, &type_of::<A>(), &type_of::<D>()).len())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), 2);
    }
}
