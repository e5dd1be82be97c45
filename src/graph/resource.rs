//! Resource Graph
//!
//! Concrete, provider-specific resources and the deployment dependencies
//! between them. Resources are shared between the graph and the knowledge
//! base behaviours as [`ResourceHandle`]s (`Arc<RwLock<dyn Resource>>`), so a
//! behaviour can mutate a resource in place and the graph sees the change.
//!
//! Dependencies are declared through [`Resource::dependencies`] rather than
//! discovered from fields: a resource returns the resources it references,
//! whatever shape it stores them in.
//!
//! Vertex ids are read through the resource's lock. Never call into the graph
//! while holding a write guard on a resource that is (or is about to be) in it.

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Directed, Edge, EdgeProperties, GraphObserver, Vertex};
use crate::error::{Error, MultiError, Result};
use crate::id::ResourceId;

// =============================================================================
// Resource contract
// =============================================================================

/// Downcasting support for trait objects
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A concrete deployable resource
pub trait Resource: AsAny + Send + Sync + fmt::Debug {
    fn id(&self) -> ResourceId;

    /// Constructs whose expansion produced this resource
    fn base_constructs(&self) -> &BaseConstructSet;

    /// Resources this one references and must be deployed after
    fn dependencies(&self) -> Vec<ResourceRef> {
        Vec::new()
    }
}

/// Shared, lockable resource
pub type ResourceHandle = Arc<RwLock<dyn Resource>>;

/// Wrap a resource into a handle
pub fn handle<T: Resource + 'static>(resource: T) -> ResourceHandle {
    Arc::new(RwLock::new(resource))
}

/// Identity (not id equality) of two handles
pub fn same_resource(a: &ResourceHandle, b: &ResourceHandle) -> bool {
    Arc::ptr_eq(a, b)
}

/// Read-lock `handle` as a concrete `T`
pub fn read_as<T: Resource + 'static>(handle: &ResourceHandle) -> Option<MappedRwLockReadGuard<'_, T>> {
    RwLockReadGuard::try_map(handle.read(), |r| (*r).as_any().downcast_ref::<T>()).ok()
}

/// Write-lock `handle` as a concrete `T`
pub fn write_as<T: Resource + 'static>(handle: &ResourceHandle) -> Option<MappedRwLockWriteGuard<'_, T>> {
    RwLockWriteGuard::try_map(handle.write(), |r| (*r).as_any_mut().downcast_mut::<T>()).ok()
}

fn is_a<T: Resource + 'static>(handle: &ResourceHandle) -> bool {
    (*handle.read()).as_any().is::<T>()
}

impl Vertex for ResourceHandle {
    fn vertex_id(&self) -> String {
        self.read().id().to_string()
    }
}

/// A reference declared by [`Resource::dependencies`]
#[derive(Debug, Clone)]
pub enum ResourceRef {
    /// A resource instance; inserted into the graph when missing
    Handle(ResourceHandle),
    /// A resource expected to already be in the graph
    Id(ResourceId),
}

impl ResourceRef {
    pub fn id(&self) -> ResourceId {
        match self {
            ResourceRef::Handle(h) => h.read().id(),
            ResourceRef::Id(id) => id.clone(),
        }
    }
}

impl From<ResourceHandle> for ResourceRef {
    fn from(handle: ResourceHandle) -> Self {
        ResourceRef::Handle(handle)
    }
}

impl From<&ResourceHandle> for ResourceRef {
    fn from(handle: &ResourceHandle) -> Self {
        ResourceRef::Handle(handle.clone())
    }
}

impl From<ResourceId> for ResourceRef {
    fn from(id: ResourceId) -> Self {
        ResourceRef::Id(id)
    }
}

/// Ordered set of owning construct ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseConstructSet(BTreeSet<ResourceId>);

impl BaseConstructSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ResourceId) -> bool {
        self.0.insert(id)
    }

    pub fn add_all(&mut self, other: &BaseConstructSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ResourceId> for BaseConstructSet {
    fn from_iter<I: IntoIterator<Item = ResourceId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// =============================================================================
// Resource Graph
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    underlying: Directed<ResourceHandle>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn GraphObserver>) -> Self {
        Self {
            underlying: Directed::with_observer(observer),
        }
    }

    // ========== Resources ==========

    /// Insert `resource` unless its id is already present. Returns the handle
    /// stored in the graph, which is the existing one on a duplicate.
    pub fn add_resource(&mut self, resource: ResourceHandle) -> ResourceHandle {
        let id = resource.vertex_id();
        if let Some(existing) = self.underlying.get_vertex(&id) {
            return existing.clone();
        }
        debug!(resource = %id, "adding resource");
        self.underlying.add_vertex(resource.clone());
        resource
    }

    /// Wrap and insert a concrete resource
    pub fn add<T: Resource + 'static>(&mut self, resource: T) -> ResourceHandle {
        self.add_resource(handle(resource))
    }

    pub fn get_resource(&self, id: &ResourceId) -> Option<ResourceHandle> {
        self.underlying.get_vertex(&id.to_string()).cloned()
    }

    /// Remove a resource along with every edge touching it
    pub fn remove_resource(&mut self, id: &ResourceId) -> Result<()> {
        debug!(resource = %id, "removing resource");
        self.underlying
            .remove_vertex(&id.to_string())
            .map(|_| ())
            .ok_or_else(|| Error::VertexNotFound(id.to_string()))
    }

    /// Swap `old` for `new`, moving every edge of `old` onto `new`
    pub fn replace_construct(&mut self, old: &ResourceId, new: ResourceHandle) -> Result<()> {
        let Some(existing) = self.get_resource(old) else {
            return Err(Error::VertexNotFound(old.to_string()));
        };
        let new = self.add_resource(new);
        for edge in self.underlying.outgoing_edges(&existing) {
            self.add_dependency_with_properties(&new, &edge.destination, edge.properties)?;
        }
        for edge in self.underlying.incoming_edges(&existing) {
            self.add_dependency_with_properties(&edge.source, &new, edge.properties)?;
        }
        self.remove_resource(old)
    }

    pub fn len(&self) -> usize {
        self.underlying.vertex_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All resources, sorted by id
    pub fn list_resources(&self) -> Vec<ResourceHandle> {
        self.underlying.all_vertices()
    }

    /// All resources of concrete type `T`
    pub fn resources_of<T: Resource + 'static>(&self) -> Vec<ResourceHandle> {
        self.list_resources().into_iter().filter(is_a::<T>).collect()
    }

    /// Resources owned by the construct `id`
    pub fn find_resources_with_ref(&self, id: &ResourceId) -> Vec<ResourceHandle> {
        self.list_resources()
            .into_iter()
            .filter(|r| r.read().base_constructs().contains(id))
            .collect()
    }

    // ========== Dependencies ==========

    /// `source` must be deployed after `destination`. Missing endpoints are
    /// inserted first; a self-dependency is ignored.
    pub fn add_dependency(&mut self, source: &ResourceHandle, destination: &ResourceHandle) -> Result<()> {
        self.add_dependency_with_properties(source, destination, EdgeProperties::default())
    }

    /// [`add_dependency`](Self::add_dependency) with an edge payload attached
    pub fn add_dependency_with_data<T: Any + Send + Sync>(
        &mut self,
        source: &ResourceHandle,
        destination: &ResourceHandle,
        data: T,
    ) -> Result<()> {
        self.add_dependency_with_properties(source, destination, EdgeProperties::with_data(data))
    }

    pub fn add_dependency_with_properties(
        &mut self,
        source: &ResourceHandle,
        destination: &ResourceHandle,
        properties: EdgeProperties,
    ) -> Result<()> {
        let src = source.vertex_id();
        let dst = destination.vertex_id();
        if src == dst {
            debug!(resource = %src, "ignoring self dependency");
            return Ok(());
        }
        self.add_resource(source.clone());
        self.add_resource(destination.clone());
        self.wire(&src, &dst, properties)
    }

    /// Wire two resources already in the graph; nothing is inserted
    pub fn add_dependency_by_id(&mut self, source: &ResourceId, destination: &ResourceId) -> Result<()> {
        let src = source.to_string();
        let dst = destination.to_string();
        if !self.underlying.contains_vertex(&src) {
            return Err(Error::VertexNotFound(src));
        }
        if !self.underlying.contains_vertex(&dst) {
            return Err(Error::VertexNotFound(dst));
        }
        self.wire(&src, &dst, EdgeProperties::default())
    }

    /// Add one edge from `source` to every resource it declares through
    /// [`Resource::dependencies`]. Referenced handles are inserted when
    /// missing; id references only wire to resources already present.
    pub fn add_declared_dependencies(&mut self, source: &ResourceHandle) -> Result<()> {
        let refs = source.read().dependencies();
        let mut errors = MultiError::new();
        for reference in refs {
            match reference {
                ResourceRef::Handle(target) => errors.push_result(self.add_dependency(source, &target)),
                ResourceRef::Id(id) => match self.get_resource(&id) {
                    Some(target) => errors.push_result(self.add_dependency(source, &target)),
                    None => warn!(
                        source = %source.vertex_id(),
                        target = %id,
                        "declared dependency not in graph, skipping"
                    ),
                },
            }
        }
        errors.into_result()
    }

    pub fn get_dependency(&self, source: &ResourceId, destination: &ResourceId) -> Option<Edge<ResourceHandle>> {
        self.underlying.get_edge(&source.to_string(), &destination.to_string())
    }

    pub fn remove_dependency(&mut self, source: &ResourceId, destination: &ResourceId) -> Result<()> {
        debug!(source = %source, destination = %destination, "removing dependency");
        self.underlying
            .remove_edge(&source.to_string(), &destination.to_string())
            .map(|_| ())
    }

    pub fn dependency_count(&self) -> usize {
        self.underlying.edge_count()
    }

    pub fn list_dependencies(&self) -> Vec<Edge<ResourceHandle>> {
        self.underlying.all_edges()
    }

    pub fn downstream_dependencies(&self, source: &ResourceHandle) -> Vec<Edge<ResourceHandle>> {
        self.underlying.outgoing_edges(source)
    }

    pub fn downstream_resources(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.underlying.outgoing_vertices(source)
    }

    pub fn upstream_dependencies(&self, source: &ResourceHandle) -> Vec<Edge<ResourceHandle>> {
        self.underlying.incoming_edges(source)
    }

    pub fn upstream_resources(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.underlying.incoming_vertices(source)
    }

    pub fn all_downstream_resources(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.underlying.reachable_from(&source.vertex_id(), Direction::Outgoing)
    }

    pub fn all_upstream_resources(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.underlying.reachable_from(&source.vertex_id(), Direction::Incoming)
    }

    /// Direct dependencies of `source` that are a `T`
    pub fn downstream_of<T: Resource + 'static>(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.downstream_resources(source).into_iter().filter(is_a::<T>).collect()
    }

    /// Direct dependents of `source` that are a `T`
    pub fn upstream_of<T: Resource + 'static>(&self, source: &ResourceHandle) -> Vec<ResourceHandle> {
        self.upstream_resources(source).into_iter().filter(is_a::<T>).collect()
    }

    pub fn shortest_path(&self, source: &ResourceId, destination: &ResourceId) -> Option<Vec<ResourceHandle>> {
        let ids = self.underlying.shortest_path(&source.to_string(), &destination.to_string())?;
        ids.iter().map(|id| self.underlying.get_vertex(id).cloned()).collect()
    }

    // ========== Ordering ==========

    /// Resources with dependents before their dependencies
    pub fn topological_sort(&self) -> Result<Vec<ResourceHandle>> {
        let ids = self.underlying.vertex_ids_in_topological_order()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.underlying.get_vertex(id).cloned())
            .collect())
    }

    /// Dependencies before their dependents (deployment order)
    pub fn reverse_topological_sort(&self) -> Result<Vec<ResourceHandle>> {
        let mut sorted = self.topological_sort()?;
        sorted.reverse();
        Ok(sorted)
    }

    /// Structural copy; resources are shared with `self`
    pub fn clone_graph(&self) -> ResourceGraph {
        self.clone()
    }

    pub fn to_dot(&self) -> String {
        self.underlying.to_dot("ResourceGraph")
    }

    pub fn underlying(&self) -> &Directed<ResourceHandle> {
        &self.underlying
    }

    fn wire(&mut self, src: &str, dst: &str, properties: EdgeProperties) -> Result<()> {
        if self.underlying.creates_cycle(src, dst) {
            warn!(source = src, destination = dst, "not adding dependency, cycle would be created");
            return Err(Error::WouldCycle {
                from: src.to_string(),
                to: dst.to_string(),
            });
        }
        self.underlying.add_edge_with_properties(src, dst, properties);
        debug!(source = src, destination = dst, "added dependency");
        Ok(())
    }
}
