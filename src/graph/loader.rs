//! Construct Graph Loading
//!
//! Reads a construct graph from a YAML or JSON document:
//!
//! ```yaml
//! resources:
//!   api: { kind: execution_unit }
//!   db: { kind: orm }
//! edges:
//!   - { source: api, destination: db }
//! ```
//!
//! Node ids become construct names under the `klotho` provider. Every bad
//! node or edge is reported, not just the first.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::construct::{Construct, ConstructGraph, ConstructKind};
use crate::error::{Error, MultiError, Result};
use crate::id::ResourceId;

/// Serialized document format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Yaml,
    Json,
}

impl DocumentFormat {
    /// `.json` files are JSON; anything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Yaml => "yaml",
            DocumentFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: String,
    pub destination: String,
}

/// On-disk shape of a construct graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructDocument {
    #[serde(default, alias = "constructs")]
    pub resources: BTreeMap<String, NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl ConstructDocument {
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        Ok(match format {
            DocumentFormat::Yaml => serde_yaml::from_str(text)?,
            DocumentFormat::Json => serde_json::from_str(text)?,
        })
    }

    /// Document describing `graph`
    pub fn from_graph(graph: &ConstructGraph) -> Self {
        let resources = graph
            .list_constructs()
            .iter()
            .map(|c| {
                (
                    c.name().to_string(),
                    NodeSpec {
                        kind: c.kind().as_str().to_string(),
                    },
                )
            })
            .collect();
        let edges = graph
            .list_dependencies()
            .iter()
            .map(|e| EdgeSpec {
                source: e.source.name().to_string(),
                destination: e.destination.name().to_string(),
            })
            .collect();
        Self { resources, edges }
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        Ok(match format {
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Build the graph. Unknown kinds, malformed names and edges naming
    /// undeclared nodes all fail the load.
    pub fn into_graph(self) -> Result<ConstructGraph> {
        let mut graph = ConstructGraph::new();
        let mut errors = MultiError::new();
        let mut ids: HashMap<String, ResourceId> = HashMap::new();
        let mut rejected: Vec<String> = Vec::new();

        for (name, node) in self.resources {
            let construct = match node_construct(&name, &node) {
                Ok(construct) => construct,
                Err(e) => {
                    errors.push(e);
                    rejected.push(name);
                    continue;
                }
            };
            ids.insert(name, construct.id());
            graph.add_construct(construct);
        }

        for edge in self.edges {
            if rejected.contains(&edge.source) || rejected.contains(&edge.destination) {
                continue;
            }
            let endpoint = |node: &str| {
                ids.get(node).ok_or_else(|| Error::UnknownEdgeEndpoint {
                    from: edge.source.clone(),
                    to: edge.destination.clone(),
                    node: node.to_string(),
                })
            };
            match (endpoint(&edge.source), endpoint(&edge.destination)) {
                (Ok(src), Ok(dst)) => {
                    graph.add_dependency(src, dst);
                }
                (Err(e), _) | (_, Err(e)) => errors.push(e),
            }
        }

        errors.into_result()?;
        debug!(
            constructs = graph.len(),
            dependencies = graph.dependency_count(),
            "loaded construct graph"
        );
        Ok(graph)
    }
}

fn node_construct(name: &str, node: &NodeSpec) -> Result<Construct> {
    let kind: ConstructKind = node.kind.parse()?;
    let construct = Construct::new(kind, name);
    // round-trip through the parser to validate the name segment
    construct.id().to_string().parse::<ResourceId>()?;
    Ok(construct)
}

/// Parse a construct graph from document text
pub fn parse_construct_graph(text: &str, format: DocumentFormat) -> Result<ConstructGraph> {
    ConstructDocument::parse(text, format)?.into_graph()
}

/// Load a construct graph from a file; the format follows the extension
pub fn load_construct_graph(path: &Path) -> Result<ConstructGraph> {
    let text = fs::read_to_string(path)?;
    parse_construct_graph(&text, DocumentFormat::from_path(path))
}
