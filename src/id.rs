//! Vertex identity
//!
//! Every construct and resource is addressed by a composite [`ResourceId`]
//! (provider, kind, optional namespace, name). Equality is structural over
//! those four fields. The `provider:kind` prefix doubles as the stable
//! [`ResourceType`] tag that keys the knowledge base.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Provider tag used by abstract (provider-agnostic) constructs
pub const ABSTRACT_PROVIDER: &str = "klotho";

// =============================================================================
// Resource Type
// =============================================================================

/// Stable type tag for a resource kind: `provider:kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(provider: &str, kind: &str) -> Self {
        Self(format!("{}:{}", provider, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Resource Id
// =============================================================================

/// Composite identifier shared by constructs and resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub provider: String,
    pub kind: String,
    /// Disambiguates resources that share a name (e.g. a subnet within a VPC)
    pub namespace: String,
    pub name: String,
}

fn provider_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid provider pattern"))
}

fn kind_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid kind pattern"))
}

// like name, but `:` not allowed
fn namespace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_./\-\[\]]*$").expect("valid namespace pattern"))
}

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_./\-:\[\]]*$").expect("valid name pattern"))
}

impl ResourceId {
    pub fn new(provider: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
            namespace: String::new(),
            name: name.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn is_zero(&self) -> bool {
        self.provider.is_empty() && self.kind.is_empty() && self.namespace.is_empty() && self.name.is_empty()
    }

    /// Type tag of this id (`provider:kind`)
    pub fn resource_type(&self) -> ResourceType {
        ResourceType::new(&self.provider, &self.kind)
    }

    /// Abstract resources belong to the provider-agnostic construct layer
    pub fn is_abstract(&self) -> bool {
        self.provider == ABSTRACT_PROVIDER
    }

    /// Uses `self` as a filter: every non-empty field must equal the
    /// corresponding field of `other`.
    pub fn matches(&self, other: &ResourceId) -> bool {
        (self.provider.is_empty() || self.provider == other.provider)
            && (self.kind.is_empty() || self.kind == other.kind)
            && (self.namespace.is_empty() || self.namespace == other.namespace)
            && (self.name.is_empty() || self.name == other.name)
    }
}

/// Filter `ids` down to those matched by `selector`
pub fn select_ids<'a>(ids: impl IntoIterator<Item = &'a ResourceId>, selector: &ResourceId) -> Vec<ResourceId> {
    ids.into_iter().filter(|id| selector.matches(id)).cloned().collect()
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:{}", self.provider, self.kind)?;
        if !self.namespace.is_empty() || self.name.contains(':') {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        let mut id = ResourceId::default();
        match parts.as_slice() {
            [""] => return Ok(id),
            [_] => {
                return Err(Error::InvalidId {
                    id: s.to_string(),
                    reason: "must have trailing ':' for provider-only ID".to_string(),
                })
            }
            [provider, kind] => {
                id.provider = provider.to_string();
                id.kind = kind.to_string();
            }
            [provider, kind, name] => {
                id.provider = provider.to_string();
                id.kind = kind.to_string();
                id.name = name.to_string();
            }
            [provider, kind, namespace, name] => {
                id.provider = provider.to_string();
                id.kind = kind.to_string();
                id.namespace = namespace.to_string();
                id.name = name.to_string();
            }
            _ => unreachable!("splitn(4) yields at most four parts"),
        }

        let mut problems = Vec::new();
        if !provider_pattern().is_match(&id.provider) {
            problems.push(format!("invalid provider '{}'", id.provider));
        }
        if !id.kind.is_empty() && !kind_pattern().is_match(&id.kind) {
            problems.push(format!("invalid type '{}'", id.kind));
        }
        if !namespace_pattern().is_match(&id.namespace) {
            problems.push(format!("invalid namespace '{}'", id.namespace));
        }
        if !name_pattern().is_match(&id.name) {
            problems.push(format!("invalid name '{}'", id.name));
        }
        if !problems.is_empty() {
            return Err(Error::InvalidId {
                id: s.to_string(),
                reason: problems.join("; "),
            });
        }
        Ok(id)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
