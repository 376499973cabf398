#![forbid(unsafe_code)]

use std::sync::Arc;

use gantry_mutate::knative::{
    default_registry, kafka_chain, HighAvailability, KafkaBroker, KafkaChannel, KnativeEventing, KnativeEventingSpec,
    KnativeKafka, KnativeKafkaSpec,
};
use gantry_mutate::pipeline::without_nulls;
use gantry_mutate::{kind_of, MutationChain, MutationPipeline, MutationRegistry, MutationRequest};
use serde_json::Value as Json;

fn kafka_raw(spec: KnativeKafkaSpec) -> Vec<u8> {
    let mut kk = KnativeKafka::new("knative-kafka", spec);
    kk.metadata.namespace = Some("knative-eventing".into());
    serde_json::to_vec(&kk).expect("encode")
}

fn kafka_specs() -> Vec<KnativeKafkaSpec> {
    vec![
        KnativeKafkaSpec::default(),
        KnativeKafkaSpec {
            channel: Some(KafkaChannel { enabled: Some(true), bootstrap_servers: Some("a:9092 , b:9092".into()), ..Default::default() }),
            ..Default::default()
        },
        KnativeKafkaSpec {
            broker: Some(KafkaBroker { enabled: Some(true), ..Default::default() }),
            high_availability: Some(HighAvailability::with_replicas(1)),
            ..Default::default()
        },
    ]
}

/// Objects as a user would write them: sparse, with fields the typed model does not name.
fn sparse_kafka_objects() -> Vec<Json> {
    let object = |spec: Option<Json>| {
        let mut obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing", "creationTimestamp": null }
        });
        if let Some(spec) = spec {
            obj["spec"] = spec;
        }
        obj
    };
    vec![
        object(Some(serde_json::json!({ "broker": { "enabled": true }, "high-availability": { "replicas": 1 } }))),
        object(Some(serde_json::json!({ "channel": { "bootstrapServers": "a:1" } }))),
        object(Some(serde_json::json!({
            "channel": { "enabled": true, "bootstrapServers": " a:1, ,b:2 ", "tls": { "enabled": true } },
            "broker": { "enabled": true, "defaultConfig": { "numPartitions": 3 }, "class": "Kafka" },
            "logging": { "level": "debug" },
            "workloads": [{ "name": "kafka-controller", "replicas": 3 }]
        }))),
        object(None),
        object(Some(Json::Null)),
    ]
}

/// The chain applied to the typed decoding, serialized: what the patched object must equal.
fn expected_mutation(obj: &Json) -> Json {
    let mut typed = obj.clone();
    if typed.get("spec").map_or(true, Json::is_null) {
        typed["spec"] = serde_json::json!({});
    }
    let mut kk: KnativeKafka = serde_json::from_value(typed).expect("typed decode");
    kafka_chain().apply(&mut kk);
    serde_json::to_value(&kk).expect("encode")
}

fn production() -> MutationPipeline {
    MutationPipeline::new(Arc::new(default_registry()))
}

#[test]
fn mutating_a_mutated_object_is_a_no_op() {
    let p = production();
    let raws = kafka_specs()
        .into_iter()
        .map(kafka_raw)
        .chain(sparse_kafka_objects().into_iter().map(|o| serde_json::to_vec(&o).expect("encode")));
    for raw in raws {
        let req = MutationRequest::new(raw.clone(), kind_of::<KnativeKafka>());
        let first = p.mutate(&req).expect("first pass");
        let mutated = first.apply_to(&raw).expect("apply");
        let second = p.mutate(&MutationRequest::new(mutated, kind_of::<KnativeKafka>())).expect("second pass");
        assert!(second.is_empty(), "second pass produced {:?}", second.to_json());
    }
}

#[test]
fn decode_encode_without_mutation_is_an_empty_patch() {
    let mut reg = MutationRegistry::new();
    reg.register(MutationChain::<KnativeKafka>::new());
    let p = MutationPipeline::new(Arc::new(reg));
    let raw = br#"{
        "apiVersion": "operator.serverless.openshift.io/v1alpha1",
        "kind": "KnativeKafka",
        "metadata": { "name": "knative-kafka", "namespace": "knative-eventing", "creationTimestamp": null },
        "spec": { "channel": { "enabled": false }, "source": {}, "logging": { "level": "debug" } },
        "status": { "version": "1.0.0", "conditions": [], "observedGeneration": 2 }
    }"#;
    let patch = p.mutate(&MutationRequest::new(raw.to_vec(), kind_of::<KnativeKafka>())).expect("ok");
    assert!(patch.is_empty(), "got {:?}", patch.to_json());
    for spec in kafka_specs() {
        let patch = p.mutate(&MutationRequest::new(kafka_raw(spec), kind_of::<KnativeKafka>())).expect("ok");
        assert!(patch.is_empty());
    }
    for obj in sparse_kafka_objects() {
        let raw = serde_json::to_vec(&obj).expect("encode");
        let patch = p.mutate(&MutationRequest::new(raw, kind_of::<KnativeKafka>())).expect("ok");
        assert!(patch.is_empty(), "{} gave {:?}", obj, patch.to_json());
    }
}

#[test]
fn patch_applied_to_original_reproduces_mutated_serialization() {
    let p = production();
    for spec in kafka_specs() {
        let mut expected = KnativeKafka::new("knative-kafka", spec.clone());
        expected.metadata.namespace = Some("knative-eventing".into());
        kafka_chain().apply(&mut expected);
        let expected: Json = serde_json::to_value(&expected).expect("encode");

        let raw = kafka_raw(spec);
        let patch = p.mutate(&MutationRequest::new(raw.clone(), kind_of::<KnativeKafka>())).expect("ok");
        let patched: Json = serde_json::from_slice(&patch.apply_to(&raw).expect("apply")).expect("json");
        assert_eq!(patched, expected);
    }
}

#[test]
fn sparse_payloads_get_patches_that_apply() {
    let p = production();
    for obj in sparse_kafka_objects() {
        let raw = serde_json::to_vec(&obj).expect("encode");
        let patch = p.mutate(&MutationRequest::new(raw.clone(), kind_of::<KnativeKafka>())).expect("ok");
        assert_eq!(patch.summary().removes, 0, "{} gave {:?}", obj, patch.to_json());
        let patched = patch.apply_to(&raw).unwrap_or_else(|e| panic!("{} gave unappliable {:?}: {}", obj, patch.to_json(), e));
        let patched: Json = serde_json::from_slice(&patched).expect("json");
        // the API server's null members survive untouched; otherwise exact
        assert_eq!(without_nulls(&patched), without_nulls(&expected_mutation(&obj)), "object {}", obj);
    }
}

#[test]
fn broker_only_spec_gets_its_config_block_added() {
    let p = production();
    let raw = serde_json::to_vec(&sparse_kafka_objects()[0]).expect("encode");
    let patch = p.mutate(&MutationRequest::new(raw.clone(), kind_of::<KnativeKafka>())).expect("ok");
    let ops = patch.to_json();
    assert_eq!(ops.as_array().map(|a| a.len()), Some(1), "ops={}", ops);
    assert_eq!(ops[0]["op"], "add");
    assert_eq!(ops[0]["path"], "/spec/broker/defaultConfig");
    assert_eq!(ops[0]["value"], serde_json::json!({ "numPartitions": 10, "replicationFactor": 3 }));
}

#[test]
fn eventing_defaults_are_emitted_as_field_adds() {
    let p = production();
    let mut ke = KnativeEventing::new("knative-eventing", KnativeEventingSpec::default());
    ke.metadata.namespace = Some("knative-eventing".into());
    let raw = serde_json::to_vec(&ke).expect("encode");
    let patch = p.mutate(&MutationRequest::new(raw, kind_of::<KnativeEventing>())).expect("ok");
    let summary = patch.summary();
    assert_eq!(summary.adds, 2);
    assert_eq!(summary.removes, 0);
    let paths: Vec<String> = patch
        .to_json()
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|op| op["path"].as_str().map(|s| s.to_string()))
        .collect();
    assert!(paths.contains(&"/spec/high-availability".to_string()), "paths={:?}", paths);
    assert!(paths.contains(&"/spec/sinkBindingSelectionMode".to_string()), "paths={:?}", paths);
}

#[test]
fn eventing_without_spec_is_defaulted() {
    let p = production();
    let raw = br#"{"apiVersion":"operator.knative.dev/v1beta1","kind":"KnativeEventing","metadata":{"name":"knative-eventing"}}"#;
    let patch = p.mutate(&MutationRequest::new(raw.to_vec(), kind_of::<KnativeEventing>())).expect("ok");
    let out: Json = serde_json::from_slice(&patch.apply_to(raw).expect("apply")).expect("json");
    assert_eq!(out["spec"]["high-availability"]["replicas"], 2);
    assert_eq!(out["spec"]["sinkBindingSelectionMode"], "inclusion");
}
