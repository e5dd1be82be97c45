//! Error types for the graph engine
//!
//! Two shapes of failure exist: a single [`Error`], and an aggregate
//! ([`MultiError`]) used wherever one independent unit of work failing must
//! not stop the others (edge expansion, configuration, file output).
//! Pipeline stages surface as [`PluginError`], which carries the flat
//! slash-joined path of stage names that led to the failure.

use std::fmt;

use thiserror::Error;

use crate::id::ResourceType;

/// Result type for graph engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Graph engine errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("vertex not found: {0}")]
    VertexNotFound(String),

    #[error("edge not found: {from} -> {to}")]
    EdgeNotFound { from: String, to: String },

    #[error("graph contains a cycle; could not order: {}", .remaining.join(", "))]
    Cycle { remaining: Vec<String> },

    #[error("not adding dependency {from} -> {to}: a cycle would be created")]
    WouldCycle { from: String, to: String },

    #[error("invalid resource id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("unknown construct kind '{0}'")]
    UnknownKind(String),

    #[error("edge {from} -> {to} references unknown node '{node}'")]
    UnknownEdgeEndpoint { from: String, to: String, node: String },

    #[error("knowledge base already has an entry for {from} -> {to}")]
    DuplicateEdge { from: ResourceType, to: ResourceType },

    #[error("no factory registered for resource type {0}")]
    MissingFactory(ResourceType),

    #[error("edge properties for edge {from} -> {to} do not satisfy edge data format")]
    EdgeDataShape { from: String, to: String },

    #[error(
        "found multiple paths which satisfy constraints for edge {from} -> {to}. Paths: {}",
        format_paths(.paths)
    )]
    AmbiguousPath {
        from: String,
        to: String,
        paths: Vec<Vec<ResourceType>>,
    },

    #[error("no path for edge {from} -> {to} satisfies its constraints ({candidates} candidate(s) rejected)")]
    UnsatisfiableConstraints {
        from: String,
        to: String,
        candidates: usize,
    },

    #[error("expanding {from} -> {to}: {source:#}")]
    Expansion {
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuring {from} -> {to}: {source:#}")]
    Configuration {
        from: String,
        to: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("output error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error(transparent)]
    Multi(MultiError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

fn format_paths(paths: &[Vec<ResourceType>]) -> String {
    paths
        .iter()
        .map(|p| {
            let hops: Vec<&str> = p.iter().map(ResourceType::as_str).collect();
            format!("[{}]", hops.join(" -> "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// MultiError
// =============================================================================

/// Accumulates independent failures so that a pass can report all of them.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error; nested aggregates are flattened
    pub fn push(&mut self, err: impl Into<Error>) {
        match err.into() {
            Error::Multi(inner) => self.errors.extend(inner.errors),
            err => self.errors.push(err),
        }
    }

    /// Add the error of `result`, if any
    pub fn push_result<T>(&mut self, result: Result<T>) {
        if let Err(err) = result {
            self.push(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok` when nothing was collected, the lone error when exactly one was,
    /// and the whole aggregate otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Multi(self)),
        }
    }
}

impl Extend<Error> for MultiError {
    fn extend<I: IntoIterator<Item = Error>>(&mut self, iter: I) {
        for err in iter {
            self.push(err);
        }
    }
}

impl IntoIterator for MultiError {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "<nil>"),
            [only] => write!(f, "{}", only),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for err in errors {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

// =============================================================================
// PluginError
// =============================================================================

/// A pipeline stage failure, tagged with the stage path that produced it.
///
/// When a stage delegates to sub-stages, wrapping an inner `PluginError`
/// composes the names (`outer/inner`) instead of nesting errors.
#[derive(Debug)]
pub struct PluginError {
    stages: Vec<String>,
    cause: anyhow::Error,
}

impl PluginError {
    pub fn new(name: impl Into<String>, err: anyhow::Error) -> Self {
        let mut stages = vec![name.into()];
        match err.downcast::<PluginError>() {
            Ok(inner) => {
                stages.extend(inner.stages);
                Self { stages, cause: inner.cause }
            }
            Err(cause) => Self { stages, cause },
        }
    }

    /// Slash-joined stage path, e.g. `A/B`
    pub fn path(&self) -> String {
        self.stages.join("/")
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' failed: {:#}", self.path(), self.cause)
    }
}

impl std::error::Error for PluginError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}
