//! Knative operator custom resources and the mutation chains applied to them on admission.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{MutationChain, MutationRegistry};

/// Replica count applied when a resource does not ask for high availability itself.
pub const DEFAULT_HA_REPLICAS: i32 = 2;
pub const DEFAULT_BROKER_PARTITIONS: i32 = 10;
pub const DEFAULT_BROKER_REPLICATION_FACTOR: i16 = 3;
pub const DEFAULT_SINK_BINDING_SELECTION_MODE: &str = "inclusion";

/// Fields the typed model does not name, kept verbatim so a decode/encode round trip is lossless.
pub type Extra = Map<String, Json>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HighAvailability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl HighAvailability {
    pub fn with_replicas(replicas: i32) -> Self {
        Self { replicas: Some(replicas), ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<StatusCondition>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_servers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct KafkaSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaBrokerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_servers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_partitions: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaBroker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_config: Option<KafkaBrokerConfig>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl KafkaBroker {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// Knative Kafka extension installed by the serverless operator.
///
/// Every field is optional and unknown fields are carried in `extra`, so decoding
/// and re-encoding a submitted object reproduces it exactly.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.serverless.openshift.io",
    version = "v1alpha1",
    kind = "KnativeKafka",
    namespaced,
    status = "OperatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeKafkaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<KafkaChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<KafkaSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<KafkaBroker>,
    #[serde(default, rename = "high-availability", skip_serializing_if = "Option::is_none")]
    pub high_availability: Option<HighAvailability>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Knative Eventing installation.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.knative.dev",
    version = "v1beta1",
    kind = "KnativeEventing",
    namespaced,
    status = "OperatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeEventingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "high-availability", skip_serializing_if = "Option::is_none")]
    pub high_availability: Option<HighAvailability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_binding_selection_mode: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_high_availability(ha: &mut Option<HighAvailability>) {
    ha.get_or_insert_with(HighAvailability::default).replicas.get_or_insert(DEFAULT_HA_REPLICAS);
}

pub fn default_kafka_high_availability(kk: &mut KnativeKafka) {
    default_high_availability(&mut kk.spec.high_availability);
}

/// Trim every entry of comma-separated bootstrap server lists and drop empty ones.
pub fn normalize_bootstrap_servers(kk: &mut KnativeKafka) {
    let channel = kk.spec.channel.as_mut().map(|c| &mut c.bootstrap_servers);
    let broker = kk
        .spec
        .broker
        .as_mut()
        .and_then(|b| b.default_config.as_mut())
        .map(|c| &mut c.bootstrap_servers);
    for servers in [channel, broker].into_iter().flatten() {
        if let Some(list) = servers.as_deref() {
            let normalized = normalize_server_list(list);
            *servers = if normalized.is_empty() { None } else { Some(normalized) };
        }
    }
}

pub fn default_broker_config(kk: &mut KnativeKafka) {
    let Some(broker) = kk.spec.broker.as_mut().filter(|b| b.is_enabled()) else {
        return;
    };
    let cfg = broker.default_config.get_or_insert_with(KafkaBrokerConfig::default);
    cfg.num_partitions.get_or_insert(DEFAULT_BROKER_PARTITIONS);
    cfg.replication_factor.get_or_insert(DEFAULT_BROKER_REPLICATION_FACTOR);
}

pub fn default_eventing_high_availability(ke: &mut KnativeEventing) {
    default_high_availability(&mut ke.spec.high_availability);
}

pub fn default_sink_binding_selection_mode(ke: &mut KnativeEventing) {
    if ke.spec.sink_binding_selection_mode.as_deref().map_or(true, str::is_empty) {
        ke.spec.sink_binding_selection_mode = Some(DEFAULT_SINK_BINDING_SELECTION_MODE.to_string());
    }
}

fn normalize_server_list(list: &str) -> String {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(",")
}

pub fn kafka_chain() -> MutationChain<KnativeKafka> {
    MutationChain::new()
        .then("default_high_availability", default_kafka_high_availability)
        .then("normalize_bootstrap_servers", normalize_bootstrap_servers)
        .then("default_broker_config", default_broker_config)
        .ensure(|kk| match &kk.spec.high_availability {
            Some(HighAvailability { replicas: Some(_), .. }) => Ok(()),
            _ => Err("high availability replicas unset after mutation".to_string()),
        })
}

pub fn eventing_chain() -> MutationChain<KnativeEventing> {
    MutationChain::new()
        .then("default_high_availability", default_eventing_high_availability)
        .then("default_sink_binding_selection_mode", default_sink_binding_selection_mode)
}

/// Registry with every chain the operator serves.
pub fn default_registry() -> MutationRegistry {
    let mut reg = MutationRegistry::new();
    reg.register(kafka_chain()).register(eventing_chain());
    reg
}
