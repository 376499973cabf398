//! Cluster query boundary: list workloads and get single objects by identity.

use crate::{ResourceKind, WorkloadDescriptor};

/// Errors from the cluster query boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("namespace required for namespaced kind {0}")]
    NamespaceRequired(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl QueryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound(_))
    }
}

/// Synchronous-per-call, non-cached view of cluster state. Every call goes to the
/// source of truth; implementations must not serve results from a local cache.
#[async_trait::async_trait]
pub trait ClusterQuery: Send + Sync {
    /// List deployment-like workloads in a namespace.
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadDescriptor>, QueryError>;

    /// Fetch one object. Absence is reported as `QueryError::NotFound`.
    async fn get(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Result<serde_json::Value, QueryError>;
}
