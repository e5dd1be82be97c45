//! Identifier-keyed directed graph
//!
//! [`Directed`] is the generic graph both the construct graph and the
//! resource graph are built on. It uses petgraph's `StableDiGraph` so node
//! indices survive edge and vertex removal, and keeps a `HashMap` from vertex
//! id to `NodeIndex` for O(1) lookup.
//!
//! - At most one edge per ordered (source, destination) pair
//! - Each edge carries [`EdgeProperties`]: a string attribute bag plus an
//!   optional opaque payload (edge data)
//! - Topological order is stable: ties are broken by vertex id
//! - Mutation points notify an optional injected [`GraphObserver`]

pub mod construct;
pub mod loader;
pub mod resource;

pub use construct::{AnnotationKey, Construct, ConstructGraph, ConstructKind};
pub use loader::{load_construct_graph, parse_construct_graph, ConstructDocument, DocumentFormat};
pub use resource::{AsAny, BaseConstructSet, Resource, ResourceGraph, ResourceHandle, ResourceRef};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Anything that can live in a [`Directed`] graph
pub trait Vertex {
    /// Stable string form of the vertex identity
    fn vertex_id(&self) -> String;
}

/// Opaque per-edge payload
pub type EdgePayload = Arc<dyn Any + Send + Sync>;

/// Side data attached to an edge
#[derive(Clone, Default)]
pub struct EdgeProperties {
    pub attributes: BTreeMap<String, String>,
    pub data: Option<EdgePayload>,
}

impl EdgeProperties {
    pub fn with_data<T: Any + Send + Sync>(data: T) -> Self {
        Self {
            attributes: BTreeMap::new(),
            data: Some(Arc::new(data)),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Typed view of the payload; `None` when absent or of another type
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for EdgeProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeProperties")
            .field("attributes", &self.attributes)
            .field("data", &self.data.as_ref().map(|_| "<payload>"))
            .finish()
    }
}

/// An edge materialized with its endpoint values
#[derive(Debug, Clone)]
pub struct Edge<V> {
    pub source: V,
    pub destination: V,
    pub properties: EdgeProperties,
}

/// Observability hook for graph mutations
pub trait GraphObserver: Send + Sync {
    fn vertex_added(&self, _id: &str) {}
    fn edge_added(&self, _source: &str, _destination: &str) {}
    fn edge_removed(&self, _source: &str, _destination: &str) {}
    fn vertex_removed(&self, _id: &str) {}
}

#[derive(Clone)]
struct Slot<V> {
    id: String,
    value: V,
}

/// Generic directed graph keyed by [`Vertex::vertex_id`]
#[derive(Clone)]
pub struct Directed<V> {
    graph: StableDiGraph<Slot<V>, EdgeProperties>,
    index: HashMap<String, NodeIndex>,
    observer: Option<Arc<dyn GraphObserver>>,
}

impl<V> Default for Directed<V> {
    fn default() -> Self {
        Self {
            graph: StableDiGraph::default(),
            index: HashMap::new(),
            observer: None,
        }
    }
}

impl<V> fmt::Debug for Directed<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directed")
            .field("vertices", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl<V: Vertex + Clone> Directed<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn GraphObserver>) -> Self {
        Self {
            observer: Some(observer),
            ..Self::default()
        }
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn GraphObserver>>) {
        self.observer = observer;
    }

    // ========== Vertices ==========

    /// Insert `value`, or overwrite the stored value when its id is already
    /// present. Existing edges are kept.
    pub fn add_vertex(&mut self, value: V) {
        let id = value.vertex_id();
        if let Some(&idx) = self.index.get(&id) {
            self.graph[idx].value = value;
            debug!(vertex = %id, "replaced vertex");
            return;
        }
        let idx = self.graph.add_node(Slot { id: id.clone(), value });
        self.index.insert(id.clone(), idx);
        debug!(vertex = %id, "added vertex");
        if let Some(observer) = &self.observer {
            observer.vertex_added(&id);
        }
    }

    /// Remove a vertex and every edge touching it
    /// Removes the vertex and every edge touching it
    pub fn remove_vertex(&mut self, id: &str) -> Option<V> {
        let idx = self.index.remove(id)?;
        let incident: Vec<(String, String)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .filter(|e| e.source() != idx),
            )
            .filter_map(|e| {
                let src = self.graph.node_weight(e.source())?;
                let dst = self.graph.node_weight(e.target())?;
                Some((src.id.clone(), dst.id.clone()))
            })
            .collect();
        let slot = self.graph.remove_node(idx)?;
        debug!(vertex = %id, edges = incident.len(), "removed vertex");
        if let Some(observer) = &self.observer {
            for (source, destination) in &incident {
                observer.edge_removed(source, destination);
            }
            observer.vertex_removed(id);
        }
        Some(slot.value)
    }

    pub fn get_vertex(&self, id: &str) -> Option<&V> {
        let idx = self.index.get(id)?;
        self.graph.node_weight(*idx).map(|slot| &slot.value)
    }

    pub fn contains_vertex(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All vertices, sorted by id
    pub fn all_vertices(&self) -> Vec<V> {
        self.sorted_slots().into_iter().map(|slot| slot.value.clone()).collect()
    }

    /// All vertex ids, sorted
    pub fn vertex_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Vertices with no incoming edges, sorted by id
    pub fn roots(&self) -> Vec<V> {
        let mut roots: Vec<&Slot<V>> = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).next().is_none())
            .map(|idx| &self.graph[idx])
            .collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));
        roots.into_iter().map(|slot| slot.value.clone()).collect()
    }

    // ========== Edges ==========

    /// Wire `source -> destination` with empty properties.
    ///
    /// Returns `false` without touching the graph when either endpoint is
    /// absent.
    pub fn add_edge(&mut self, source: &str, destination: &str) -> bool {
        self.add_edge_with_properties(source, destination, EdgeProperties::default())
    }

    /// Wire `source -> destination` with `properties`. Re-adding an existing
    /// edge merges attributes and replaces the payload only when one is given.
    pub fn add_edge_with_properties(&mut self, source: &str, destination: &str, properties: EdgeProperties) -> bool {
        let (Some(&src), Some(&dst)) = (self.index.get(source), self.index.get(destination)) else {
            warn!(source, destination, "not adding edge: endpoint missing from graph");
            return false;
        };

        if let Some(existing) = self.graph.find_edge(src, dst) {
            let current = &mut self.graph[existing];
            current.attributes.extend(properties.attributes);
            if properties.data.is_some() {
                current.data = properties.data;
            }
            return true;
        }

        self.graph.add_edge(src, dst, properties);
        debug!(source, destination, "added edge");
        if let Some(observer) = &self.observer {
            observer.edge_added(source, destination);
        }
        true
    }

    pub fn remove_edge(&mut self, source: &str, destination: &str) -> Result<EdgeProperties> {
        let not_found = || Error::EdgeNotFound {
            from: source.to_string(),
            to: destination.to_string(),
        };
        let src = *self.index.get(source).ok_or_else(not_found)?;
        let dst = *self.index.get(destination).ok_or_else(not_found)?;
        let edge = self.graph.find_edge(src, dst).ok_or_else(not_found)?;
        let properties = self.graph.remove_edge(edge).ok_or_else(not_found)?;
        debug!(source, destination, "removed edge");
        if let Some(observer) = &self.observer {
            observer.edge_removed(source, destination);
        }
        Ok(properties)
    }

    pub fn get_edge(&self, source: &str, destination: &str) -> Option<Edge<V>> {
        let edge = self.find_edge(source, destination)?;
        self.materialize(edge)
    }

    pub fn has_edge(&self, source: &str, destination: &str) -> bool {
        self.find_edge(source, destination).is_some()
    }

    pub fn edge_properties(&self, source: &str, destination: &str) -> Option<&EdgeProperties> {
        let edge = self.find_edge(source, destination)?;
        self.graph.edge_weight(edge)
    }

    pub fn edge_properties_mut(&mut self, source: &str, destination: &str) -> Option<&mut EdgeProperties> {
        let edge = self.find_edge(source, destination)?;
        self.graph.edge_weight_mut(edge)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every edge, in edge-index order. Indices of removed edges are reused,
    /// so this is not insertion order.
    pub fn all_edges(&self) -> Vec<Edge<V>> {
        self.graph
            .edge_indices()
            .filter_map(|edge| self.materialize(edge))
            .collect()
    }

    // ========== Adjacency ==========

    pub fn outgoing_edges(&self, vertex: &V) -> Vec<Edge<V>> {
        self.edges_of(&vertex.vertex_id(), Direction::Outgoing)
    }

    pub fn incoming_edges(&self, vertex: &V) -> Vec<Edge<V>> {
        self.edges_of(&vertex.vertex_id(), Direction::Incoming)
    }

    pub fn outgoing_vertices(&self, vertex: &V) -> Vec<V> {
        self.neighbors_of(&vertex.vertex_id(), Direction::Outgoing)
    }

    pub fn incoming_vertices(&self, vertex: &V) -> Vec<V> {
        self.neighbors_of(&vertex.vertex_id(), Direction::Incoming)
    }

    /// Edges leaving (`Outgoing`) or entering (`Incoming`) the vertex `id`
    pub fn edges_of(&self, id: &str, direction: Direction) -> Vec<Edge<V>> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .filter_map(|e| self.materialize(e.id()))
            .collect()
    }

    /// Direct neighbours of `id` in `direction`
    pub fn neighbors_of(&self, id: &str, direction: Direction) -> Vec<V> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .map(|e| match direction {
                Direction::Outgoing => e.target(),
                Direction::Incoming => e.source(),
            })
            .map(|n| self.graph[n].value.clone())
            .collect()
    }

    /// Every vertex reachable from `id` in `direction`, excluding `id` itself,
    /// in breadth-first order.
    pub fn reachable_from(&self, id: &str, direction: Direction) -> Vec<V> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![start];
        let mut queue = VecDeque::from([start]);
        let mut result = Vec::new();
        while let Some(node) = queue.pop_front() {
            for next in self.graph.neighbors_directed(node, direction) {
                if seen.contains(&next) {
                    continue;
                }
                seen.push(next);
                result.push(self.graph[next].value.clone());
                queue.push_back(next);
            }
        }
        result
    }

    // ========== Algorithms ==========

    /// Vertex ids ordered so every edge's source precedes its destination.
    ///
    /// Kahn's algorithm with ready vertices taken in id order, so the result
    /// is identical across runs for the same graph.
    pub fn vertex_ids_in_topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, self.graph.edges_directed(idx, Direction::Incoming).count()))
            .collect();

        let mut ready: BTreeMap<&str, NodeIndex> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&idx, _)| (self.graph[idx].id.as_str(), idx))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((id, idx)) = ready.pop_first() {
            order.push(id.to_string());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let Some(degree) = in_degree.get_mut(&next) else {
                    continue;
                };
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(self.graph[next].id.as_str(), next);
                }
            }
        }

        if order.len() != self.graph.node_count() {
            let mut remaining: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(idx, _)| self.graph[idx].id.clone())
                .collect();
            remaining.sort();
            return Err(Error::Cycle { remaining });
        }
        Ok(order)
    }

    /// Whether adding `source -> destination` would close a cycle
    pub fn creates_cycle(&self, source: &str, destination: &str) -> bool {
        if source == destination {
            return true;
        }
        let (Some(&src), Some(&dst)) = (self.index.get(source), self.index.get(destination)) else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, dst, src, None)
    }

    /// Fewest-hop vertex id path from `source` to `destination`, inclusive
    pub fn shortest_path(&self, source: &str, destination: &str) -> Option<Vec<String>> {
        let &src = self.index.get(source)?;
        let &dst = self.index.get(destination)?;

        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([src]);
        while let Some(node) = queue.pop_front() {
            if node == dst {
                let mut path = vec![self.graph[dst].id.clone()];
                let mut cursor = dst;
                while let Some(&prev) = previous.get(&cursor) {
                    path.push(self.graph[prev].id.clone());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if next != src && !previous.contains_key(&next) {
                    previous.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    // ========== Export ==========

    /// GraphViz DOT rendering, vertices labelled by id
    pub fn to_dot(&self, name: &str) -> String {
        self.to_dot_with(name, |_| String::new())
    }

    /// GraphViz DOT rendering; `node_attrs` supplies extra attributes per vertex
    pub fn to_dot_with<F: Fn(&V) -> String>(&self, name: &str, node_attrs: F) -> String {
        let mut output = String::new();
        output.push_str(&format!("digraph {} {{\n", dot_escape(name)));
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push('\n');

        for slot in self.sorted_slots() {
            let extra = node_attrs(&slot.value);
            let sep = if extra.is_empty() { "" } else { ", " };
            output.push_str(&format!(
                "  {} [label={}{}{}];\n",
                dot_escape(&slot.id),
                dot_escape(&slot.id),
                sep,
                extra
            ));
        }

        output.push('\n');
        for edge in self.graph.edge_indices() {
            let Some((src, dst)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            output.push_str(&format!(
                "  {} -> {};\n",
                dot_escape(&self.graph[src].id),
                dot_escape(&self.graph[dst].id)
            ));
        }

        output.push_str("}\n");
        output
    }

    // ========== Internals ==========

    fn sorted_slots(&self) -> Vec<&Slot<V>> {
        let mut slots: Vec<&Slot<V>> = self.graph.node_indices().map(|idx| &self.graph[idx]).collect();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots
    }

    fn find_edge(&self, source: &str, destination: &str) -> Option<EdgeIndex> {
        let &src = self.index.get(source)?;
        let &dst = self.index.get(destination)?;
        self.graph.find_edge(src, dst)
    }

    fn materialize(&self, edge: EdgeIndex) -> Option<Edge<V>> {
        let (src, dst) = self.graph.edge_endpoints(edge)?;
        Some(Edge {
            source: self.graph.node_weight(src)?.value.clone(),
            destination: self.graph.node_weight(dst)?.value.clone(),
            properties: self.graph.edge_weight(edge)?.clone(),
        })
    }
}

fn dot_escape(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}
