//! Absence of obsolete resources after an upgrade or uninstall.

use gantry_core::{ClusterQuery, QueryError, ResourceDescriptor, Verdict};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::poller::{poll_until, ConvergenceResult, PollConfig};

/// Namespaced kinds that may legitimately outlive their release (completed jobs
/// are retained by the cluster and are harmless).
pub const TRANSIENT_KINDS: &[&str] = &["job"];

/// Cluster-scoped kinds not verified: the query client can reach these under two
/// API versions, so a lookup result cannot be trusted to reflect absence.
pub const AMBIGUOUS_CLUSTER_KINDS: &[&str] = &[
    "customresourcedefinition",
    "validatingwebhookconfiguration",
    "mutatingwebhookconfiguration",
];

/// How lookup errors other than not-found are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Treat the resource as still present and keep polling.
    #[default]
    Lenient,
    /// Propagate the error and fail the poll.
    Strict,
}

/// Whether `candidate` is excluded from verification, and why.
pub fn skip_reason(candidate: &ResourceDescriptor) -> Option<&'static str> {
    let kind = candidate.kind.kind.to_ascii_lowercase();
    if candidate.is_namespaced() {
        TRANSIENT_KINDS.contains(&kind.as_str()).then_some("transient kind")
    } else {
        AMBIGUOUS_CLUSTER_KINDS.contains(&kind.as_str()).then_some("ambiguous cluster-scoped kind")
    }
}

/// Every non-skipped candidate is confirmed gone. Namespaced candidates are looked up in
/// `namespace`; cluster-scoped ones cluster-wide. Only a not-found answer confirms absence.
pub async fn resources_gone<Q>(
    query: &Q,
    namespace: &str,
    candidates: &[ResourceDescriptor],
    policy: ErrorPolicy,
) -> Result<Verdict, QueryError>
where
    Q: ClusterQuery + ?Sized,
{
    for candidate in candidates {
        if let Some(reason) = skip_reason(candidate) {
            debug!(resource = %candidate, reason, "absence not verified");
            continue;
        }
        let ns = candidate.is_namespaced().then_some(namespace);
        match query.get(&candidate.kind, ns, &candidate.name).await {
            Err(e) if e.is_not_found() => {}
            Ok(_) => return Ok(Verdict::Pending(format!("{} still exists", candidate))),
            Err(e) => match policy {
                ErrorPolicy::Strict => return Err(e),
                ErrorPolicy::Lenient => {
                    warn!(resource = %candidate, error = %e, "lookup failed; treating as present");
                    return Ok(Verdict::Pending(format!("{} lookup failed: {}", candidate, e)));
                }
            },
        }
    }
    Ok(Verdict::Satisfied)
}

/// Poll until every obsolete resource in `candidates` is gone.
pub async fn wait_for_removal<Q>(
    query: &Q,
    namespace: &str,
    candidates: &[ResourceDescriptor],
    policy: ErrorPolicy,
    cfg: &PollConfig,
    cancel: &CancellationToken,
) -> ConvergenceResult
where
    Q: ClusterQuery + ?Sized,
{
    debug!(ns = %namespace, count = candidates.len(), ?policy, "waiting for removal");
    poll_until(cfg, cancel, || resources_gone(query, namespace, candidates, policy)).await
}
