//! infragraph
//!
//! Dependency graphs for cloud infrastructure, closed over a knowledge base of
//! legal resource-to-resource edges.
//!
//! ## Features
//!
//! - **Construct graph**: application-level building blocks (execution units,
//!   gateways, stores) and their dependencies, loaded from YAML or JSON
//! - **Resource graph**: provider resources shared by handle, with cycle-safe
//!   dependency wiring and stable topological order
//! - **Knowledge base**: typed edge registry that rewrites each direct edge
//!   into its unique valid path of intermediate resources
//! - **Compilation pipeline**: named plugin stages over concurrent stores
//! - **Output**: bounded concurrent file writer
//!
//! ## Architecture
//!
//! ```text
//! construct doc ──► ConstructGraph ──► plugins ──► ResourceGraph
//!                                                   │
//!                          KnowledgeBase ──► expand_edges / configure
//!                                                   │
//!                                             FileSet ──► out_dir/
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod knowledge_base;
pub mod output;

pub use compiler::{
    CloudResource, CompilationResult, Compiler, Dependencies, Dependency, EdgeExpansionPlugin,
    Plugin, PluginGroup, ResourceKey,
};
pub use config::EngineConfig;
pub use error::{Error, MultiError, PluginError, Result};
pub use graph::{
    ConstructGraph, Construct, ConstructKind, Directed, Edge, EdgeProperties, ResourceGraph,
    ResourceHandle,
};
pub use id::{ResourceId, ResourceType};
pub use knowledge_base::{EdgeConstraint, EdgeData, EdgeDetails, KnowledgeBase};
pub use output::{FileSet, HasLocalOutput, OutputFile, RawFile};
