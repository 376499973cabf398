//! Deployment readiness at a target version.

use std::collections::HashSet;

use gantry_core::{ClusterQuery, QueryError, ResourceDescriptor, Verdict, WorkloadDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::poller::{poll_until, ConvergenceResult, PollConfig};

/// Workloads carry a label whose value is this prefix followed by the version.
pub const VERSION_LABEL_PREFIX: &str = "v";
pub const AVAILABLE_CONDITION: &str = "Available";
pub const CONDITION_TRUE: &str = "True";

pub fn version_marker(version: &str) -> String {
    format!("{}{}", VERSION_LABEL_PREFIX, version)
}

/// Labelled for `marker` and latest `Available` condition is true.
pub fn workload_ready(w: &WorkloadDescriptor, marker: &str) -> bool {
    let at_version = w.labels.values().any(|v| v == marker);
    let available = w.latest_condition(AVAILABLE_CONDITION).map_or(false, |c| c.status == CONDITION_TRUE);
    at_version && available
}

/// Every expected workload is present (matched by exact name) and ready for `version`.
/// Missing workloads are a normal transient state and yield `Pending`.
pub fn deployments_ready(observed: &[WorkloadDescriptor], expected: &[String], version: &str) -> Verdict {
    let marker = version_marker(version);
    let mut missing = Vec::new();
    let mut not_ready = Vec::new();
    for name in expected {
        match observed.iter().find(|w| &w.name == name) {
            None => missing.push(name.as_str()),
            Some(w) if !workload_ready(w, &marker) => not_ready.push(name.as_str()),
            Some(_) => {}
        }
    }
    if missing.is_empty() && not_ready.is_empty() {
        return Verdict::Satisfied;
    }
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("not found: {}", missing.join(", ")));
    }
    if !not_ready.is_empty() {
        parts.push(format!("not ready at {}: {}", marker, not_ready.join(", ")));
    }
    Verdict::Pending(parts.join("; "))
}

/// Names of every `Deployment` among `resources`, de-duplicated in first-seen order.
pub fn expected_deployments(resources: &[ResourceDescriptor]) -> Vec<String> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter(|r| r.kind.kind == "Deployment")
        .filter(|r| seen.insert(r.name.clone()))
        .map(|r| r.name.clone())
        .collect()
}

/// Poll `namespace` until every expected deployment is ready at `version`.
/// The workload list is fetched fresh for every evaluation.
pub async fn wait_for_deployments<Q>(
    query: &Q,
    namespace: &str,
    expected: &[String],
    version: &str,
    cfg: &PollConfig,
    cancel: &CancellationToken,
) -> ConvergenceResult
where
    Q: ClusterQuery + ?Sized,
{
    debug!(ns = %namespace, ?expected, version = %version, "waiting for deployments");
    poll_until(cfg, cancel, || async move {
        let observed = query.list_workloads(namespace).await?;
        Ok::<_, QueryError>(deployments_ready(&observed, expected, version))
    })
    .await
}
