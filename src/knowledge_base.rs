//! Knowledge Base & Edge Expansion
//!
//! The knowledge base is a table of legal concrete links between resource
//! types, keyed by an ordered `(from, to)` pair of [`ResourceType`] tags.
//! Each entry may carry:
//!
//! - an **expand** behaviour, which materializes the link in a
//!   [`ResourceGraph`] (creating intermediate resources, wiring edges)
//! - a **configure** behaviour, which adjusts fields of two already-wired
//!   resources and never sees the graph
//! - a list of **valid destinations** restricting which overall path
//!   destinations the entry may be used towards
//!
//! [`expand_edges`] rewrites every abstract edge of a resource graph into the
//! single chain of concrete hops the table allows. When several chains
//! satisfy the edge's constraints the edge is left alone and reported, never
//! guessed. Per-edge failures are collected and returned together.
//!
//! Behaviours receive [`ResourceHandle`]s. Release any write guard on a handle
//! before passing it back to the graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, MultiError, Result};
use crate::graph::{EdgeProperties, ResourceGraph, ResourceHandle, Vertex};
use crate::graph::resource::{handle, Resource};
use crate::id::{ResourceId, ResourceType};

/// Expansion behaviour: `(from, to, graph, edge data)`
pub type ExpandFn =
    Arc<dyn Fn(&ResourceHandle, &ResourceHandle, &mut ResourceGraph, &EdgeData) -> anyhow::Result<()> + Send + Sync>;

/// Configuration behaviour: `(from, to, edge data)`
pub type ConfigureFn = Arc<dyn Fn(&ResourceHandle, &ResourceHandle, &EdgeData) -> anyhow::Result<()> + Send + Sync>;

/// Builds the zero value of a resource type
pub type ResourceFactory = fn() -> ResourceHandle;

// =============================================================================
// Edge data
// =============================================================================

/// Structural constraints on the chain an edge may expand into
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConstraint {
    /// Every listed type must appear on the chosen path
    #[serde(default)]
    pub node_must_exist: Vec<ResourceType>,
    /// No listed type may appear on the chosen path
    #[serde(default)]
    pub node_must_not_exist: Vec<ResourceType>,
}

impl EdgeConstraint {
    pub fn is_empty(&self) -> bool {
        self.node_must_exist.is_empty() && self.node_must_not_exist.is_empty()
    }

    pub fn permits(&self, path: &[ResourceType]) -> bool {
        self.node_must_exist.iter().all(|t| path.contains(t))
            && !self.node_must_not_exist.iter().any(|t| path.contains(t))
    }
}

/// An environment variable a construct needs wired during expansion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub construct: ResourceId,
    pub value: String,
}

/// Context attached to an abstract edge and handed to every behaviour
#[derive(Debug, Clone, Default)]
pub struct EdgeData {
    pub app_name: String,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub constraint: EdgeConstraint,
    /// Original source of the edge being expanded
    pub source: Option<ResourceHandle>,
    /// Original destination of the edge being expanded
    pub destination: Option<ResourceHandle>,
}

impl EdgeData {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    pub fn with_constraint(mut self, constraint: EdgeConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Edge data stored on `properties`; an absent payload reads as the
    /// default value, a payload of another type is an error.
    pub fn from_properties(properties: &EdgeProperties, from: &str, to: &str) -> Result<EdgeData> {
        Self::from_properties_or(properties, &EdgeData::default(), from, to)
    }

    /// Like [`EdgeData::from_properties`], with `defaults` standing in for
    /// an absent payload
    pub fn from_properties_or(
        properties: &EdgeProperties,
        defaults: &EdgeData,
        from: &str,
        to: &str,
    ) -> Result<EdgeData> {
        match &properties.data {
            None => Ok(defaults.clone()),
            Some(_) => properties
                .data::<EdgeData>()
                .cloned()
                .ok_or_else(|| Error::EdgeDataShape {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
        }
    }
}

// =============================================================================
// Knowledge base
// =============================================================================

/// Behaviours for one `(from, to)` entry
#[derive(Clone, Default)]
pub struct EdgeDetails {
    pub expand: Option<ExpandFn>,
    pub configure: Option<ConfigureFn>,
    pub valid_destinations: Vec<ResourceType>,
}

impl EdgeDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expand<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceHandle, &ResourceHandle, &mut ResourceGraph, &EdgeData) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.expand = Some(Arc::new(f));
        self
    }

    pub fn with_configure<F>(mut self, f: F) -> Self
    where
        F: Fn(&ResourceHandle, &ResourceHandle, &EdgeData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.configure = Some(Arc::new(f));
        self
    }

    pub fn with_valid_destinations(mut self, destinations: Vec<ResourceType>) -> Self {
        self.valid_destinations = destinations;
        self
    }

    /// Whether a path heading to `destination` may use this entry.
    /// Only entries with an expansion behaviour are restricted.
    pub fn valid_for(&self, destination: &ResourceType) -> bool {
        self.expand.is_none() || self.valid_destinations.is_empty() || self.valid_destinations.contains(destination)
    }
}

impl fmt::Debug for EdgeDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeDetails")
            .field("expand", &self.expand.is_some())
            .field("configure", &self.configure.is_some())
            .field("valid_destinations", &self.valid_destinations)
            .finish()
    }
}

/// Type tag of `T`, read from its zero value
pub fn type_of<T: Resource + Default>() -> ResourceType {
    T::default().id().resource_type()
}

fn factory<T: Resource + Default + 'static>() -> ResourceHandle {
    handle(T::default())
}

/// Lookup table of legal type-to-type links
#[derive(Clone, Default)]
pub struct KnowledgeBase {
    edges: BTreeMap<(ResourceType, ResourceType), EdgeDetails>,
    factories: HashMap<ResourceType, ResourceFactory>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `Src -> Dst` link. Both types become constructible as
    /// intermediate hops.
    pub fn add_edge<Src, Dst>(&mut self, details: EdgeDetails) -> Result<()>
    where
        Src: Resource + Default + 'static,
        Dst: Resource + Default + 'static,
    {
        let from = type_of::<Src>();
        let to = type_of::<Dst>();
        self.register_factory(from.clone(), factory::<Src>);
        self.register_factory(to.clone(), factory::<Dst>);
        self.add_edge_by_type(from, to, details)
    }

    /// Register a link between two type tags without factories
    pub fn add_edge_by_type(&mut self, from: ResourceType, to: ResourceType, details: EdgeDetails) -> Result<()> {
        let key = (from, to);
        if self.edges.contains_key(&key) {
            let (from, to) = key;
            return Err(Error::DuplicateEdge { from, to });
        }
        debug!(from = %key.0, to = %key.1, "registering knowledge base edge");
        self.edges.insert(key, details);
        Ok(())
    }

    pub fn register_factory(&mut self, resource_type: ResourceType, factory: ResourceFactory) {
        self.factories.insert(resource_type, factory);
    }

    /// Fold another provider's table into this one. Every duplicate key is
    /// reported; non-conflicting entries are still added.
    pub fn merge(&mut self, other: KnowledgeBase) -> Result<()> {
        let mut errors = MultiError::new();
        for ((from, to), details) in other.edges {
            errors.push_result(self.add_edge_by_type(from, to, details));
        }
        for (resource_type, factory) in other.factories {
            self.factories.entry(resource_type).or_insert(factory);
        }
        errors.into_result()
    }

    pub fn get_edge(&self, from: &ResourceType, to: &ResourceType) -> Option<&EdgeDetails> {
        self.edges.get(&(from.clone(), to.clone()))
    }

    pub fn has_edge(&self, from: &ResourceType, to: &ResourceType) -> bool {
        self.get_edge(from, to).is_some()
    }

    pub fn edges_with_source<'a>(&'a self, from: &'a ResourceType) -> impl Iterator<Item = (&'a ResourceType, &'a EdgeDetails)> + 'a {
        self.edges
            .iter()
            .filter(move |((f, _), _)| f == from)
            .map(|((_, t), details)| (t, details))
    }

    pub fn edges_with_target<'a>(&'a self, to: &'a ResourceType) -> impl Iterator<Item = (&'a ResourceType, &'a EdgeDetails)> + 'a {
        self.edges
            .iter()
            .filter(move |((_, t), _)| t == to)
            .map(|((f, _), details)| (f, details))
    }

    /// Every registered `(from, to)` pair
    pub fn edge_types(&self) -> impl Iterator<Item = &(ResourceType, ResourceType)> {
        self.edges.keys()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Zero value of `resource_type`
    pub fn create(&self, resource_type: &ResourceType) -> Result<ResourceHandle> {
        self.factories
            .get(resource_type)
            .map(|factory| factory())
            .ok_or_else(|| Error::MissingFactory(resource_type.clone()))
    }

    /// GraphViz DOT rendering of the type graph
    pub fn to_dot(&self) -> String {
        let mut output = String::from("digraph KnowledgeBase {\n  rankdir=LR;\n  node [shape=box];\n");
        for ((from, to), details) in &self.edges {
            let mut label = Vec::new();
            if details.expand.is_some() {
                label.push("expand");
            }
            if details.configure.is_some() {
                label.push("configure");
            }
            output.push_str(&format!("  \"{}\" -> \"{}\" [label=\"{}\"];\n", from, to, label.join(",")));
        }
        output.push_str("}\n");
        output
    }
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.edges.iter()).finish()
    }
}

// =============================================================================
// Path finding
// =============================================================================

/// Every simple path of types from `source` to `destination` through the
/// knowledge base. Each path includes both endpoints, so a direct link has
/// length two. A type never repeats within one path but may appear on many.
pub fn find_paths(kb: &KnowledgeBase, source: &ResourceType, destination: &ResourceType) -> Vec<Vec<ResourceType>> {
    debug!(source = %source, destination = %destination, "finding paths");
    let mut result = Vec::new();
    let mut stack = vec![source.clone()];
    walk_paths(kb, source, destination, &mut stack, &mut result);
    result
}

fn walk_paths(
    kb: &KnowledgeBase,
    current: &ResourceType,
    destination: &ResourceType,
    stack: &mut Vec<ResourceType>,
    result: &mut Vec<Vec<ResourceType>>,
) {
    if current == destination {
        result.push(stack.clone());
        return;
    }
    for (next, details) in kb.edges_with_source(current) {
        if stack.contains(next) || !details.valid_for(destination) {
            continue;
        }
        stack.push(next.clone());
        walk_paths(kb, next, destination, stack, result);
        stack.pop();
    }
}

// =============================================================================
// Expansion & configuration
// =============================================================================

/// Rewrite every edge of `graph` into the concrete chain the knowledge base
/// allows for it.
///
/// Edges are processed from a snapshot taken up front, so edges created by
/// behaviours are not themselves expanded. All per-edge failures are
/// returned together once every edge has been processed.
pub fn expand_edges(kb: &KnowledgeBase, graph: &mut ResourceGraph) -> Result<()> {
    expand_edges_with(kb, graph, &EdgeData::default())
}

/// [`expand_edges`], using `defaults` for edges that carry no data
pub fn expand_edges_with(kb: &KnowledgeBase, graph: &mut ResourceGraph, defaults: &EdgeData) -> Result<()> {
    let dependencies = graph.list_dependencies();
    info!(edges = dependencies.len(), "expanding edges");
    let mut errors = MultiError::new();

    for dep in dependencies {
        let src_id = dep.source.read().id();
        let dst_id = dep.destination.read().id();
        let (from, to) = (src_id.to_string(), dst_id.to_string());
        debug!(source = %from, destination = %to, "expanding edge");

        let mut data = EdgeData::from_properties_or(&dep.properties, defaults, &from, &to).unwrap_or_else(|e| {
            errors.push(e);
            defaults.clone()
        });
        data.source.get_or_insert_with(|| dep.source.clone());
        data.destination.get_or_insert_with(|| dep.destination.clone());

        let paths = find_paths(kb, &src_id.resource_type(), &dst_id.resource_type());
        if paths.is_empty() {
            debug!(source = %from, destination = %to, "no knowledge base path, leaving edge as is");
            continue;
        }
        let candidates = paths.len();
        let mut valid: Vec<Vec<ResourceType>> = paths.into_iter().filter(|p| data.constraint.permits(p)).collect();
        debug!(source = %from, destination = %to, valid = valid.len(), candidates, "filtered paths");

        if valid.len() > 1 {
            warn!(source = %from, destination = %to, "ambiguous expansion, edge left untouched");
            errors.push(Error::AmbiguousPath { from, to, paths: valid });
            continue;
        }
        let Some(path) = valid.pop() else {
            warn!(source = %from, destination = %to, "constraints rejected every path");
            errors.push(Error::UnsatisfiableConstraints { from, to, candidates });
            continue;
        };

        // every intermediate must exist before the direct edge goes away
        let intermediates = match path
            .iter()
            .skip(1)
            .take(path.len().saturating_sub(2))
            .map(|t| kb.create(t))
            .collect::<Result<Vec<_>>>()
        {
            Ok(created) => created,
            Err(e) => {
                warn!(source = %from, destination = %to, "cannot build path, edge left untouched");
                errors.push(e);
                continue;
            }
        };

        if !intermediates.is_empty() {
            debug!(source = %from, destination = %to, "removing direct dependency");
            if let Err(e) = graph.remove_dependency(&src_id, &dst_id) {
                errors.push(e);
                continue;
            }
        }

        let mut chain = Vec::with_capacity(path.len().max(2));
        chain.push(dep.source.clone());
        chain.extend(intermediates);
        chain.push(dep.destination.clone());
        expand_path(kb, graph, &path, chain, &data, &mut errors);
    }

    errors.into_result()
}

fn expand_path(
    kb: &KnowledgeBase,
    graph: &mut ResourceGraph,
    path: &[ResourceType],
    chain: Vec<ResourceHandle>,
    data: &EdgeData,
    errors: &mut MultiError,
) {
    let mut chain = chain.into_iter();
    let Some(mut previous) = chain.next() else {
        return;
    };
    for (hop, next) in path.windows(2).zip(chain) {
        let (from_type, to_type) = (&hop[0], &hop[1]);

        match kb.get_edge(from_type, to_type) {
            Some(details) => {
                if let Some(expand) = &details.expand {
                    if let Err(e) = expand(&previous, &next, &mut *graph, data) {
                        errors.push(Error::Expansion {
                            from: previous.vertex_id(),
                            to: next.vertex_id(),
                            source: e,
                        });
                    }
                }
            }
            None => debug!(from = %from_type, to = %to_type, "no knowledge base entry for hop, skipping"),
        }

        // continue from whatever instance the graph holds for this id
        let next_id = next.read().id();
        previous = graph.get_resource(&next_id).unwrap_or(next);
    }
}

/// Run the configure behaviour of every edge in `graph`.
///
/// The entry is looked up by `(source type, destination type)`, the same
/// order expansion uses. Configuration never changes topology, so the graph
/// is only borrowed immutably.
pub fn configure_from_edge_data(kb: &KnowledgeBase, graph: &ResourceGraph) -> Result<()> {
    configure_from_edge_data_with(kb, graph, &EdgeData::default())
}

/// [`configure_from_edge_data`], using `defaults` for edges that carry no data
pub fn configure_from_edge_data_with(kb: &KnowledgeBase, graph: &ResourceGraph, defaults: &EdgeData) -> Result<()> {
    let dependencies = graph.list_dependencies();
    info!(edges = dependencies.len(), "configuring edges");
    let mut errors = MultiError::new();

    for dep in dependencies {
        let src_id = dep.source.read().id();
        let dst_id = dep.destination.read().id();
        let (from, to) = (src_id.to_string(), dst_id.to_string());
        debug!(source = %from, destination = %to, "configuring edge");

        let data = EdgeData::from_properties_or(&dep.properties, defaults, &from, &to).unwrap_or_else(|e| {
            errors.push(e);
            defaults.clone()
        });

        let Some(configure) = kb
            .get_edge(&src_id.resource_type(), &dst_id.resource_type())
            .and_then(|details| details.configure.as_ref())
        else {
            continue;
        };
        if let Err(e) = configure(&dep.source, &dep.destination, &data) {
            errors.push(Error::Configuration { from, to, source: e });
        }
    }

    errors.into_result()
}
