//! Gantry kubehub: the live, uncached [`ClusterQuery`] backed by kube-rs.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gantry_core::{ClusterQuery, QueryError, ResourceKind, WorkloadCondition, WorkloadDescriptor};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, ListParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use metrics::{counter, histogram};
use tracing::debug;

/// Build a client from the ambient kubeconfig or in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig/in-cluster env")
}

/// Queries the API server directly on every call.
#[derive(Clone)]
pub struct KubeQuery {
    client: Client,
}

impl KubeQuery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(get_kube_client().await?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn gvk_of(kind: &ResourceKind) -> GroupVersionKind {
    GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind)
}

/// Map kube errors onto the query boundary. A 404 is absence; so is a kind the
/// server no longer serves (its CRD was removed along with every instance).
pub fn map_kube_error(what: &str, err: kube::Error) -> QueryError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => QueryError::NotFound(what.to_string()),
        kube::Error::Discovery(e) => {
            debug!(what = %what, error = %e, "kind not served");
            QueryError::NotFound(what.to_string())
        }
        other => QueryError::Transport(format!("{}: {}", what, other)),
    }
}

pub fn workload_from_deployment(d: &Deployment) -> WorkloadDescriptor {
    let conditions = d
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|cs| cs.iter().map(|c| WorkloadCondition::new(c.type_.clone(), c.status.clone())).collect())
        .unwrap_or_default();
    WorkloadDescriptor {
        name: d.metadata.name.clone().unwrap_or_default(),
        labels: d.metadata.labels.clone().unwrap_or_default(),
        conditions,
    }
}

#[async_trait]
impl ClusterQuery for KubeQuery {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadDescriptor>, QueryError> {
        let t0 = Instant::now();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| QueryError::Transport(format!("list deployments in {}: {}", namespace, e)))?;
        let out: Vec<_> = list.items.iter().map(workload_from_deployment).collect();
        histogram!("kubehub_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(ns = %namespace, count = out.len(), took_ms = %t0.elapsed().as_millis(), "listed workloads");
        Ok(out)
    }

    async fn get(&self, kind: &ResourceKind, namespace: Option<&str>, name: &str) -> Result<serde_json::Value, QueryError> {
        let t0 = Instant::now();
        counter!("kubehub_get", 1u64);
        let what = match namespace {
            Some(ns) => format!("{} {}/{}", kind, ns, name),
            None => format!("{} {}", kind, name),
        };
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk_of(kind))
            .await
            .map_err(|e| map_kube_error(&what, e))?;
        let api: Api<DynamicObject> = match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => return Err(QueryError::NamespaceRequired(kind.gvk_key())),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
        };
        let obj = api.get(name).await.map_err(|e| map_kube_error(&what, e))?;
        debug!(what = %what, took_ms = %t0.elapsed().as_millis(), "get");
        serde_json::to_value(&obj).map_err(|e| QueryError::Transport(format!("serializing {}: {}", what, e)))
    }
}
