//! Construct Graph
//!
//! Abstract, provider-agnostic application constructs (execution units,
//! gateways, data stores, ...) and the dependencies between them.
//!
//! [`Construct`] is a closed sum type: adding a kind means adding a variant,
//! and every exhaustive `match` below points at the places that need it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use petgraph::Direction;

use super::{Directed, Edge, Vertex};
use crate::error::{Error, Result};
use crate::id::{ResourceId, ABSTRACT_PROVIDER};

/// Annotation capability names
pub mod capability {
    pub const EXECUTION_UNIT: &str = "execution_unit";
    pub const STATIC_UNIT: &str = "static_unit";
    pub const PERSIST: &str = "persist";
    pub const EXPOSE: &str = "expose";
}

// =============================================================================
// Kinds
// =============================================================================

/// Every construct kind the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    ExecutionUnit,
    StaticUnit,
    Orm,
    Kv,
    RedisNode,
    Fs,
    Secret,
    #[serde(rename = "expose")]
    Gateway,
}

impl ConstructKind {
    pub const ALL: [ConstructKind; 8] = [
        ConstructKind::ExecutionUnit,
        ConstructKind::StaticUnit,
        ConstructKind::Orm,
        ConstructKind::Kv,
        ConstructKind::RedisNode,
        ConstructKind::Fs,
        ConstructKind::Secret,
        ConstructKind::Gateway,
    ];

    /// Kind tag used in ids and documents
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::ExecutionUnit => "execution_unit",
            ConstructKind::StaticUnit => "static_unit",
            ConstructKind::Orm => "orm",
            ConstructKind::Kv => "kv",
            ConstructKind::RedisNode => "redis_node",
            ConstructKind::Fs => "fs",
            ConstructKind::Secret => "secret",
            ConstructKind::Gateway => "expose",
        }
    }

    /// Annotation capability that produces this kind
    pub fn capability(&self) -> &'static str {
        match self {
            ConstructKind::ExecutionUnit => capability::EXECUTION_UNIT,
            ConstructKind::StaticUnit => capability::STATIC_UNIT,
            ConstructKind::Orm
            | ConstructKind::Kv
            | ConstructKind::RedisNode
            | ConstructKind::Fs
            | ConstructKind::Secret => capability::PERSIST,
            ConstructKind::Gateway => capability::EXPOSE,
        }
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstructKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConstructKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

// =============================================================================
// Constructs
// =============================================================================

/// Provenance: the annotation a construct was produced from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationKey {
    pub id: String,
    pub capability: String,
}

impl AnnotationKey {
    pub fn new(capability: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub key: AnnotationKey,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub dockerfile_path: Option<String>,
}

/// A route exposed by a gateway, served by an execution unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub verb: String,
    pub exec_unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub key: AnnotationKey,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticUnit {
    pub key: AnnotationKey,
    #[serde(default)]
    pub index_document: Option<String>,
}

/// An abstract application construct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    ExecutionUnit(ExecutionUnit),
    StaticUnit(StaticUnit),
    Gateway(Gateway),
    Orm(AnnotationKey),
    Kv(AnnotationKey),
    RedisNode(AnnotationKey),
    Fs(AnnotationKey),
    Secret(AnnotationKey),
}

impl Construct {
    /// Zero-value construct of `kind` named `name`
    pub fn new(kind: ConstructKind, name: impl Into<String>) -> Self {
        let key = AnnotationKey::new(kind.capability(), name);
        match kind {
            ConstructKind::ExecutionUnit => Construct::ExecutionUnit(ExecutionUnit {
                key,
                environment_variables: BTreeMap::new(),
                dockerfile_path: None,
            }),
            ConstructKind::StaticUnit => Construct::StaticUnit(StaticUnit { key, index_document: None }),
            ConstructKind::Gateway => Construct::Gateway(Gateway { key, routes: Vec::new() }),
            ConstructKind::Orm => Construct::Orm(key),
            ConstructKind::Kv => Construct::Kv(key),
            ConstructKind::RedisNode => Construct::RedisNode(key),
            ConstructKind::Fs => Construct::Fs(key),
            ConstructKind::Secret => Construct::Secret(key),
        }
    }

    pub fn kind(&self) -> ConstructKind {
        match self {
            Construct::ExecutionUnit(_) => ConstructKind::ExecutionUnit,
            Construct::StaticUnit(_) => ConstructKind::StaticUnit,
            Construct::Gateway(_) => ConstructKind::Gateway,
            Construct::Orm(_) => ConstructKind::Orm,
            Construct::Kv(_) => ConstructKind::Kv,
            Construct::RedisNode(_) => ConstructKind::RedisNode,
            Construct::Fs(_) => ConstructKind::Fs,
            Construct::Secret(_) => ConstructKind::Secret,
        }
    }

    pub fn provenance(&self) -> &AnnotationKey {
        match self {
            Construct::ExecutionUnit(unit) => &unit.key,
            Construct::StaticUnit(unit) => &unit.key,
            Construct::Gateway(gateway) => &gateway.key,
            Construct::Orm(key)
            | Construct::Kv(key)
            | Construct::RedisNode(key)
            | Construct::Fs(key)
            | Construct::Secret(key) => key,
        }
    }

    pub fn name(&self) -> &str {
        &self.provenance().id
    }

    pub fn annotation_capability(&self) -> &str {
        &self.provenance().capability
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(ABSTRACT_PROVIDER, self.kind().as_str(), self.name())
    }

    pub fn as_execution_unit(&self) -> Option<&ExecutionUnit> {
        match self {
            Construct::ExecutionUnit(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn as_gateway(&self) -> Option<&Gateway> {
        match self {
            Construct::Gateway(gateway) => Some(gateway),
            _ => None,
        }
    }

    pub fn as_static_unit(&self) -> Option<&StaticUnit> {
        match self {
            Construct::StaticUnit(unit) => Some(unit),
            _ => None,
        }
    }
}

impl Vertex for Construct {
    fn vertex_id(&self) -> String {
        self.id().to_string()
    }
}

impl From<ExecutionUnit> for Construct {
    fn from(unit: ExecutionUnit) -> Self {
        Construct::ExecutionUnit(unit)
    }
}

impl From<Gateway> for Construct {
    fn from(gateway: Gateway) -> Self {
        Construct::Gateway(gateway)
    }
}

impl From<StaticUnit> for Construct {
    fn from(unit: StaticUnit) -> Self {
        Construct::StaticUnit(unit)
    }
}

// =============================================================================
// Construct Graph
// =============================================================================

/// Graph of abstract constructs
#[derive(Debug, Clone, Default)]
pub struct ConstructGraph {
    underlying: Directed<Construct>,
}

impl ConstructGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_directed(underlying: Directed<Construct>) -> Self {
        Self { underlying }
    }

    pub fn add_construct(&mut self, construct: impl Into<Construct>) {
        self.underlying.add_vertex(construct.into());
    }

    /// No-op (returns `false`) when either construct is absent
    pub fn add_dependency(&mut self, source: &ResourceId, destination: &ResourceId) -> bool {
        self.underlying.add_edge(&source.to_string(), &destination.to_string())
    }

    pub fn get_construct(&self, id: &ResourceId) -> Option<&Construct> {
        self.underlying.get_vertex(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.underlying.vertex_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dependency_count(&self) -> usize {
        self.underlying.edge_count()
    }

    /// All constructs, sorted by id
    pub fn list_constructs(&self) -> Vec<Construct> {
        self.underlying.all_vertices()
    }

    pub fn list_dependencies(&self) -> Vec<Edge<Construct>> {
        self.underlying.all_edges()
    }

    pub fn downstream_dependencies(&self, source: &Construct) -> Vec<Edge<Construct>> {
        self.underlying.outgoing_edges(source)
    }

    pub fn downstream_constructs(&self, source: &Construct) -> Vec<Construct> {
        self.underlying.outgoing_vertices(source)
    }

    pub fn upstream_dependencies(&self, source: &Construct) -> Vec<Edge<Construct>> {
        self.underlying.incoming_edges(source)
    }

    pub fn upstream_constructs(&self, source: &Construct) -> Vec<Construct> {
        self.underlying.incoming_vertices(source)
    }

    /// Everything `source` transitively depends on
    pub fn transitive_downstream(&self, source: &Construct) -> Vec<Construct> {
        self.underlying.reachable_from(&source.vertex_id(), Direction::Outgoing)
    }

    pub fn shortest_path(&self, source: &ResourceId, destination: &ResourceId) -> Option<Vec<Construct>> {
        let ids = self.underlying.shortest_path(&source.to_string(), &destination.to_string())?;
        ids.iter().map(|id| self.underlying.get_vertex(id).cloned()).collect()
    }

    pub fn roots(&self) -> Vec<Construct> {
        self.underlying.roots()
    }

    pub fn topological_sort(&self) -> Result<Vec<String>> {
        self.underlying.vertex_ids_in_topological_order()
    }

    pub fn constructs_with_capability(&self, capability: &str) -> Vec<Construct> {
        self.underlying
            .all_vertices()
            .into_iter()
            .filter(|c| c.annotation_capability() == capability)
            .collect()
    }

    pub fn constructs_of_kind(&self, kind: ConstructKind) -> Vec<Construct> {
        self.underlying
            .all_vertices()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect()
    }

    pub fn execution_units(&self) -> Vec<ExecutionUnit> {
        self.underlying
            .all_vertices()
            .into_iter()
            .filter_map(|c| match c {
                Construct::ExecutionUnit(unit) => Some(unit),
                _ => None,
            })
            .collect()
    }

    /// Gateways with an edge directly into `unit`
    pub fn find_upstream_gateways(&self, unit: &ExecutionUnit) -> Vec<Gateway> {
        let id = ResourceId::new(ABSTRACT_PROVIDER, ConstructKind::ExecutionUnit.as_str(), &unit.key.id);
        self.underlying
            .neighbors_of(&id.to_string(), Direction::Incoming)
            .into_iter()
            .filter_map(|c| match c {
                Construct::Gateway(gateway) => Some(gateway),
                _ => None,
            })
            .collect()
    }

    /// GraphViz DOT export, coloured by construct kind
    pub fn to_dot(&self) -> String {
        self.underlying.to_dot_with("ConstructGraph", |c| {
            let color = match c.kind() {
                ConstructKind::ExecutionUnit => "#FF9800",
                ConstructKind::StaticUnit => "#795548",
                ConstructKind::Gateway => "#2196F3",
                ConstructKind::Orm | ConstructKind::RedisNode => "#4CAF50",
                ConstructKind::Kv | ConstructKind::Fs => "#00BCD4",
                ConstructKind::Secret => "#9C27B0",
            };
            format!("fillcolor=\"{}\"", color)
        })
    }

    pub fn underlying(&self) -> &Directed<Construct> {
        &self.underlying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> Construct {
        Construct::new(ConstructKind::ExecutionUnit, name)
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("expose".parse::<ConstructKind>().unwrap(), ConstructKind::Gateway);
        assert_eq!("redis_node".parse::<ConstructKind>().unwrap(), ConstructKind::RedisNode);
        match "lambda".parse::<ConstructKind>() {
            Err(Error::UnknownKind(kind)) => assert_eq!(kind, "lambda"),
            other => panic!("expected unknown kind, got {:?}", other),
        }
    }

    #[test]
    fn test_construct_identity() {
        let c = Construct::new(ConstructKind::Kv, "sessions");
        assert_eq!(c.id().to_string(), "klotho:kv:sessions");
        assert_eq!(c.annotation_capability(), capability::PERSIST);
        assert_eq!(c.kind(), ConstructKind::Kv);
    }

    #[test]
    fn test_duplicate_adds_do_not_duplicate() {
        let mut g = ConstructGraph::new();
        g.add_construct(unit("api"));
        g.add_construct(unit("api"));
        assert_eq!(g.list_constructs().len(), 1);
    }

    #[test]
    fn test_add_dependency_is_noop_for_missing_endpoint() {
        let mut g = ConstructGraph::new();
        g.add_construct(unit("api"));
        let missing = ResourceId::new(ABSTRACT_PROVIDER, "kv", "nope");
        assert!(!g.add_dependency(&unit("api").id(), &missing));
        assert_eq!(g.dependency_count(), 0);
    }

    #[test]
    fn test_capability_and_kind_filters() {
        let mut g = ConstructGraph::new();
        g.add_construct(unit("api"));
        g.add_construct(Construct::new(ConstructKind::Orm, "db"));
        g.add_construct(Construct::new(ConstructKind::Kv, "cache"));
        g.add_construct(Construct::new(ConstructKind::Gateway, "public"));

        assert_eq!(g.constructs_with_capability(capability::PERSIST).len(), 2);
        assert_eq!(g.constructs_of_kind(ConstructKind::Gateway).len(), 1);
        assert_eq!(g.execution_units().len(), 1);
    }

    #[test]
    fn test_find_upstream_gateways() {
        let mut g = ConstructGraph::new();
        let api = unit("api");
        let gw = Construct::new(ConstructKind::Gateway, "public");
        let other = unit("worker");
        g.add_construct(api.clone());
        g.add_construct(gw.clone());
        g.add_construct(other.clone());
        g.add_dependency(&gw.id(), &api.id());
        g.add_dependency(&other.id(), &api.id());

        let Construct::ExecutionUnit(api_unit) = api else {
            unreachable!()
        };
        let gateways = g.find_upstream_gateways(&api_unit);
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].key.id, "public");
    }

    #[test]
    fn test_topological_sort_and_roots() {
        let mut g = ConstructGraph::new();
        let gw = Construct::new(ConstructKind::Gateway, "public");
        let api = unit("api");
        let db = Construct::new(ConstructKind::Orm, "db");
        for c in [&gw, &api, &db] {
            g.add_construct(c.clone());
        }
        g.add_dependency(&gw.id(), &api.id());
        g.add_dependency(&api.id(), &db.id());

        let order = g.topological_sort().unwrap();
        assert_eq!(order, vec![gw.vertex_id(), api.vertex_id(), db.vertex_id()]);
        assert_eq!(g.roots(), vec![gw.clone()]);
        assert_eq!(g.transitive_downstream(&gw).len(), 2);
        assert_eq!(g.shortest_path(&gw.id(), &db.id()).map(|p| p.len()), Some(3));
        assert!(g.to_dot().contains("fillcolor"));
    }
}
