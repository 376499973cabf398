//! Gantry core types: resource identity, observed-state descriptors and the
//! cluster query boundary shared by the admission and verification paths.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod query;

pub use query::{ClusterQuery, QueryError};

pub mod prelude {
    pub use super::{
        ClusterQuery, QueryError, ResourceDescriptor, ResourceKind, Verdict, WorkloadCondition,
        WorkloadDescriptor,
    };
}

/// Group/version/kind identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Parse a key of the form `v1/Kind` or `group/v1/Kind`.
    pub fn parse(key: &str) -> Result<Self, KindParseError> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(String::new(), *version, *kind))
            }
            [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(*group, *version, *kind))
            }
            _ => Err(KindParseError(key.to_string())),
        }
    }

    /// Split an `apiVersion` string (`group/version` or `version`) and pair it with a kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new(String::new(), api_version, kind),
        }
    }

    /// Stable key used for registry lookups and logs.
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid gvk key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct KindParseError(pub String);

/// Identity of a single object that verification tooling may look up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.map(|s| s.to_string()), name: name.into() }
    }

    /// Build a descriptor from a manifest object (`apiVersion`, `kind`, `metadata`).
    pub fn from_manifest(obj: &serde_json::Value) -> Result<Self, ManifestError> {
        let api_version = obj.get("apiVersion").and_then(|v| v.as_str()).ok_or(ManifestError::Missing("apiVersion"))?;
        let kind = obj.get("kind").and_then(|v| v.as_str()).ok_or(ManifestError::Missing("kind"))?;
        let meta = obj.get("metadata");
        let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).ok_or(ManifestError::Missing("metadata.name"))?;
        let namespace = meta
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());
        Ok(Self::new(ResourceKind::from_api_version(api_version, kind), namespace, name))
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest object missing {0}")]
    Missing(&'static str),
}

/// Status condition as reported by a workload (`type`, `status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

impl WorkloadCondition {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self { type_: type_.into(), status: status.into() }
    }
}

/// Identifying and status metadata of a deployed workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Conditions in the order the API server reported them.
    pub conditions: Vec<WorkloadCondition>,
}

impl WorkloadDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, type_: impl Into<String>, status: impl Into<String>) -> Self {
        self.conditions.push(WorkloadCondition::new(type_, status));
        self
    }

    /// Last reported condition of the given type, if any.
    pub fn latest_condition(&self, type_: &str) -> Option<&WorkloadCondition> {
        self.conditions.iter().rev().find(|c| c.type_ == type_)
    }
}

/// Non-error outcome of a convergence predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Satisfied,
    /// Not there yet; the reason describes what is still outstanding.
    Pending(String),
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Verdict::Satisfied)
    }
}
