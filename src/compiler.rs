//! Compilation Pipeline
//!
//! A [`Compiler`] runs an ordered list of named [`Plugin`] stages over two
//! shared stores: the [`CompilationResult`] (resources by key) and the
//! [`Dependencies`] set. Stages run one after another; the first failure stops
//! the pipeline and is reported as a [`PluginError`] carrying the stage path.
//!
//! Both stores are `DashMap`/`DashSet` backed, so a stage may fan work out
//! across threads without extra locking. Single operations are atomic;
//! read-then-write sequences are not, unless done through
//! [`CompilationResult::update`].

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span};

use crate::config::ExpansionConfig;
use crate::error::PluginError;
use crate::graph::resource::AsAny;
use crate::graph::ResourceGraph;
use crate::knowledge_base::{configure_from_edge_data_with, expand_edges_with, EdgeData, KnowledgeBase};

// =============================================================================
// Keys & resources
// =============================================================================

/// Unique key of a compiled resource: `kind:name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Category such as `exec_unit` or `persist_kv`
    pub kind: String,
    /// Unique within `kind`
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Anything a stage can put in the result store
pub trait CloudResource: AsAny + Send + Sync {
    fn key(&self) -> ResourceKey;
}

pub type SharedResource = Arc<dyn CloudResource>;

fn downcast<T: CloudResource + 'static>(resource: &SharedResource) -> Option<Arc<T>> {
    AsAny::into_any_arc(Arc::clone(resource)).downcast::<T>().ok()
}

// =============================================================================
// Compilation result
// =============================================================================

/// Concurrent map of compiled resources
#[derive(Default)]
pub struct CompilationResult {
    resources: DashMap<ResourceKey, SharedResource>,
}

impl CompilationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the resource under its key
    pub fn add(&self, resource: SharedResource) {
        let key = resource.key();
        info!(resource = %key, "adding resource");
        self.resources.insert(key, resource);
    }

    pub fn add_all(&self, resources: impl IntoIterator<Item = SharedResource>) {
        for resource in resources {
            self.add(resource);
        }
    }

    fn seed(&self, resource: SharedResource) {
        self.resources.insert(resource.key(), resource);
    }

    pub fn get(&self, key: &ResourceKey) -> Option<SharedResource> {
        self.resources.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.resources.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    /// All resources, ordered by key
    pub fn resources(&self) -> Vec<SharedResource> {
        let mut entries: Vec<(ResourceKey, SharedResource)> = self
            .resources
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources_of_kind(&self, kind: &str) -> Vec<SharedResource> {
        self.resources()
            .into_iter()
            .filter(|r| r.key().kind == kind)
            .collect()
    }

    /// Lowest-keyed resource of `kind`
    pub fn first_of_kind(&self, kind: &str) -> Option<SharedResource> {
        self.resources_of_kind(kind).into_iter().next()
    }

    /// Every resource whose concrete type is `T`
    pub fn resources_of<T: CloudResource + 'static>(&self) -> Vec<Arc<T>> {
        self.resources().iter().filter_map(downcast::<T>).collect()
    }

    pub fn first_of<T: CloudResource + 'static>(&self) -> Option<Arc<T>> {
        self.resources_of::<T>().into_iter().next()
    }

    /// Atomically compute the new value for `key` from the current one.
    /// Returning `None` removes the entry. `f` runs under the shard lock and
    /// must not touch this store.
    pub fn update<F>(&self, key: ResourceKey, f: F)
    where
        F: FnOnce(Option<&SharedResource>) -> Option<SharedResource>,
    {
        match self.resources.entry(key) {
            Entry::Occupied(mut entry) => match f(Some(entry.get())) {
                Some(resource) => {
                    entry.insert(resource);
                }
                None => {
                    entry.remove();
                }
            },
            Entry::Vacant(entry) => {
                if let Some(resource) = f(None) {
                    entry.insert(resource);
                }
            }
        }
    }
}

impl fmt::Debug for CompilationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationResult").field("keys", &self.keys()).finish()
    }
}

// =============================================================================
// Dependencies
// =============================================================================

/// `source` depends on `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    pub source: ResourceKey,
    pub target: ResourceKey,
}

/// Concurrent set of dependencies between result keys
#[derive(Debug, Default)]
pub struct Dependencies {
    set: DashSet<Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the pair was already present
    pub fn add(&self, source: ResourceKey, target: ResourceKey) -> bool {
        self.set.insert(Dependency { source, target })
    }

    pub fn remove(&self, source: &ResourceKey, target: &ResourceKey) -> bool {
        let dep = Dependency {
            source: source.clone(),
            target: target.clone(),
        };
        self.set.remove(&dep).is_some()
    }

    pub fn contains(&self, source: &ResourceKey, target: &ResourceKey) -> bool {
        self.set.contains(&Dependency {
            source: source.clone(),
            target: target.clone(),
        })
    }

    /// All pairs, sorted
    pub fn list(&self) -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = self.set.iter().map(|d| d.key().clone()).collect();
        deps.sort();
        deps
    }

    /// Keys `source` depends on
    pub fn downstream(&self, source: &ResourceKey) -> Vec<ResourceKey> {
        self.list()
            .into_iter()
            .filter(|d| &d.source == source)
            .map(|d| d.target)
            .collect()
    }

    /// Keys that depend on `target`
    pub fn upstream(&self, target: &ResourceKey) -> Vec<ResourceKey> {
        self.list()
            .into_iter()
            .filter(|d| &d.target == target)
            .map(|d| d.source)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

// =============================================================================
// Plugins
// =============================================================================

/// One named pipeline stage
pub trait Plugin {
    fn name(&self) -> &str;

    /// Mutate the shared stores
    fn transform(&self, result: &CompilationResult, deps: &Dependencies) -> anyhow::Result<()>;
}

/// A stage made of sub-stages; a failing sub-stage reports as `group/sub`
pub struct PluginGroup {
    name: String,
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }
}

impl Plugin for PluginGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, result: &CompilationResult, deps: &Dependencies) -> anyhow::Result<()> {
        for plugin in &self.plugins {
            debug!(group = %self.name, plugin = plugin.name(), "running sub-stage");
            plugin
                .transform(result, deps)
                .map_err(|e| anyhow::Error::new(PluginError::new(plugin.name(), e)))?;
        }
        Ok(())
    }
}

/// Closes a resource graph with a knowledge base: expands every edge, then
/// runs the configure behaviours.
pub struct EdgeExpansionPlugin {
    kb: Arc<KnowledgeBase>,
    graph: Arc<Mutex<ResourceGraph>>,
    app_name: String,
}

impl EdgeExpansionPlugin {
    pub fn new(kb: Arc<KnowledgeBase>, graph: Arc<Mutex<ResourceGraph>>) -> Self {
        Self {
            kb,
            graph,
            app_name: String::new(),
        }
    }

    pub fn from_config(kb: Arc<KnowledgeBase>, graph: Arc<Mutex<ResourceGraph>>, config: &ExpansionConfig) -> Self {
        Self::new(kb, graph).with_app_name(config.app_name.clone())
    }

    /// Application name seen by behaviours on edges without their own data
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }
}

impl Plugin for EdgeExpansionPlugin {
    fn name(&self) -> &str {
        "edge_expansion"
    }

    fn transform(&self, _result: &CompilationResult, _deps: &Dependencies) -> anyhow::Result<()> {
        let defaults = EdgeData::new(self.app_name.clone());
        let mut graph = self.graph.lock();
        expand_edges_with(&self.kb, &mut graph, &defaults)?;
        configure_from_edge_data_with(&self.kb, &graph, &defaults)?;
        Ok(())
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Ordered pipeline of stages. `None` entries are placeholders and skipped.
#[derive(Default)]
pub struct Compiler {
    plugins: Vec<Option<Box<dyn Plugin>>>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Some(Box::new(plugin)));
        self
    }

    /// Append a stage slot, which may be empty
    pub fn push(&mut self, plugin: Option<Box<dyn Plugin>>) {
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().flatten().map(|p| p.name()).collect()
    }

    /// Seed a fresh result with `input` and run every stage
    pub fn compile(&self, input: SharedResource) -> Result<CompilationResult, PluginError> {
        let result = CompilationResult::new();
        result.seed(input);
        let deps = Dependencies::new();
        self.run(&result, &deps)?;
        Ok(result)
    }

    /// Run every stage over caller-owned stores, which keep whatever the
    /// stages produced even when one fails.
    pub fn run(&self, result: &CompilationResult, deps: &Dependencies) -> Result<(), PluginError> {
        for plugin in self.plugins.iter().flatten() {
            let span = info_span!("plugin", name = plugin.name());
            let _guard = span.enter();

            info!("starting");
            plugin
                .transform(result, deps)
                .map_err(|e| PluginError::new(plugin.name(), e))?;
            info!("completed");
        }
        Ok(())
    }
}
