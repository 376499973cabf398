//! Admission mutation pipeline: decode → mutate → encode → diff.

use std::sync::Arc;
use std::time::Instant;

use gantry_core::ResourceKind;
use metrics::{counter, histogram};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, info, warn};

use crate::{MutationError, MutationRegistry, PatchDocument};

/// Raw object bytes as submitted plus the resolved kind identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub raw: Vec<u8>,
    pub kind: ResourceKind,
}

impl MutationRequest {
    pub fn new(raw: impl Into<Vec<u8>>, kind: ResourceKind) -> Self {
        Self { raw: raw.into(), kind }
    }
}

/// Stateless request/response transform over a shared, read-only registry.
#[derive(Clone)]
pub struct MutationPipeline {
    registry: Arc<MutationRegistry>,
}

impl MutationPipeline {
    pub fn new(registry: Arc<MutationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MutationRegistry {
        &self.registry
    }

    /// Compute the patch that turns `req.raw` into its mutated form.
    /// Kinds without a registered chain pass through with an empty patch.
    ///
    /// The patch is computed against the submitted document itself, so every path it
    /// names exists in `req.raw`. Members whose value is `null` count as absent.
    pub fn mutate(&self, req: &MutationRequest) -> Result<PatchDocument, MutationError> {
        let t0 = Instant::now();
        counter!("mutate_requests", 1u64);
        let Some(chain) = self.registry.resolve(&req.kind) else {
            counter!("mutate_passthrough", 1u64);
            debug!(kind = %req.kind, "no mutation chain; passing through");
            return Ok(PatchDocument::empty());
        };
        let (original, mutated) = match parse_original(&req.raw).and_then(|original| {
            let mutated = chain.render(&original)?;
            Ok((original, mutated))
        }) {
            Ok(pair) => pair,
            Err(e) => {
                counter!("mutate_errors", 1u64);
                warn!(kind = %req.kind, code = e.status_code(), error = %e, "mutation failed");
                return Err(e);
            }
        };
        let patch = PatchDocument::diff(&without_nulls(&original), &without_nulls(&mutated));
        let summary = patch.summary();
        histogram!("mutate_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(
            kind = %req.kind,
            ops = patch.len(),
            adds = summary.adds,
            updates = summary.updates,
            removes = summary.removes,
            took_us = %t0.elapsed().as_micros(),
            "mutation computed"
        );
        Ok(patch)
    }
}

fn parse_original(raw: &[u8]) -> Result<Json, MutationError> {
    serde_json::from_slice(raw).map_err(|e| MutationError::Decode(format!("payload is not JSON: {e}")))
}

/// Copy of `v` with every `null` object member dropped, recursively.
pub fn without_nulls(v: &Json) -> Json {
    match v {
        Json::Object(map) => Json::Object(
            map.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), without_nulls(v))).collect(),
        ),
        Json::Array(items) => Json::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

fn spec_absent(obj: &Json) -> bool {
    obj.get("spec").map_or(true, Json::is_null)
}

/// Decode a submitted object as `K`, rejecting payloads whose declared kind or
/// apiVersion disagree with the requested identity. An absent or `null` `spec`
/// decodes as an empty one.
pub(crate) fn decode_typed<K: DeserializeOwned>(original: &Json, kind: &ResourceKind) -> Result<K, MutationError> {
    let obj = original
        .as_object()
        .ok_or_else(|| MutationError::Decode("payload is not a JSON object".to_string()))?;
    if let Some(k) = obj.get("kind").and_then(|v| v.as_str()) {
        if k != kind.kind {
            return Err(MutationError::Decode(format!("payload kind {} does not match {}", k, kind)));
        }
    }
    if let Some(av) = obj.get("apiVersion").and_then(|v| v.as_str()) {
        if av != kind.api_version() {
            return Err(MutationError::Decode(format!("payload apiVersion {} does not match {}", av, kind)));
        }
    }
    let mut obj = obj.clone();
    if spec_absent(original) {
        obj.insert("spec".to_string(), Json::Object(Map::new()));
    }
    serde_json::from_value(Json::Object(obj)).map_err(|e| MutationError::Decode(format!("{} schema: {e}", kind)))
}

/// Drop a `spec` the decoder defaulted if the chain left it empty.
pub(crate) fn restore_absent_spec(original: &Json, mutated: &mut Json) {
    if !spec_absent(original) {
        return;
    }
    if let Some(obj) = mutated.as_object_mut() {
        if obj.get("spec").map_or(false, |s| s.as_object().map_or(false, Map::is_empty)) {
            obj.remove("spec");
        }
    }
}

pub(crate) fn encode_typed<K: Serialize>(obj: &K) -> Result<Json, MutationError> {
    serde_json::to_value(obj).map_err(|e| MutationError::Encode(format!("serializing mutated object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MutationChain;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Gadget {
        api_version: String,
        kind: String,
        spec: GadgetSpec,
        #[serde(flatten)]
        extra: Map<String, Json>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct GadgetSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replicas: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(flatten)]
        extra: Map<String, Json>,
    }

    fn gadget_kind() -> ResourceKind {
        ResourceKind::new("example.dev", "v1", "Gadget")
    }

    fn pipeline() -> MutationPipeline {
        let mut reg = MutationRegistry::new();
        reg.register(MutationChain::<Gadget>::for_kind(gadget_kind()).then("default_replicas", |g| {
            g.spec.replicas.get_or_insert(1);
        }));
        MutationPipeline::new(Arc::new(reg))
    }

    #[test]
    fn unregistered_kind_passes_through_without_decoding() {
        let p = pipeline();
        let req = MutationRequest::new(b"not json at all".to_vec(), ResourceKind::new("", "v1", "ConfigMap"));
        let patch = p.mutate(&req).expect("pass-through");
        assert!(patch.is_empty());
    }

    #[test]
    fn malformed_bytes_are_a_decode_error() {
        let p = pipeline();
        let err = p.mutate(&MutationRequest::new(b"{".to_vec(), gadget_kind())).unwrap_err();
        assert!(matches!(err, MutationError::Decode(_)));
        assert_eq!(err.status_code(), 400);

        let err = p.mutate(&MutationRequest::new(b"[1,2]".to_vec(), gadget_kind())).unwrap_err();
        assert!(err.to_string().contains("not a JSON object"), "err={}", err);
    }

    #[test]
    fn kind_mismatch_is_a_decode_error() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Widget","spec":{"name":"x"}}"#;
        let err = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).unwrap_err();
        assert!(err.to_string().contains("does not match"), "err={}", err);

        let raw = br#"{"apiVersion":"example.dev/v2","kind":"Gadget","spec":{"name":"x"}}"#;
        let err = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).unwrap_err();
        assert!(err.to_string().contains("apiVersion"), "err={}", err);
    }

    #[test]
    fn schema_violation_is_a_decode_error() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Gadget","spec":{"replicas":"many"}}"#;
        let err = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn mutation_yields_field_level_patch() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Gadget","spec":{"name":"x"}}"#;
        let patch = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).expect("ok");
        let ops = patch.to_json();
        assert_eq!(ops.as_array().map(|a| a.len()), Some(1));
        assert_eq!(ops[0]["op"], "add");
        assert_eq!(ops[0]["path"], "/spec/replicas");
        assert_eq!(ops[0]["value"], 1);
    }

    #[test]
    fn fields_outside_the_typed_model_are_never_removed() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Gadget","spec":{"name":"x","extra":{"keep":true}},"status":{"ready":true}}"#;
        let patch = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).expect("ok");
        assert_eq!(patch.summary().removes, 0);
        let out: Json = serde_json::from_slice(&patch.apply_to(raw).expect("apply")).expect("json");
        assert_eq!(out["spec"]["extra"]["keep"], true);
        assert_eq!(out["status"]["ready"], true);
        assert_eq!(out["spec"]["replicas"], 1);
    }

    #[test]
    fn missing_spec_is_defaulted_and_added_whole() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Gadget","metadata":{"name":"g"}}"#;
        let patch = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).expect("ok");
        let ops = patch.to_json();
        assert_eq!(ops.as_array().map(|a| a.len()), Some(1));
        assert_eq!(ops[0]["path"], "/spec");
        let out: Json = serde_json::from_slice(&patch.apply_to(raw).expect("apply")).expect("json");
        assert_eq!(out["spec"], serde_json::json!({ "replicas": 1 }));
    }

    #[test]
    fn untouched_missing_spec_stays_missing() {
        let mut reg = MutationRegistry::new();
        reg.register(MutationChain::<Gadget>::for_kind(gadget_kind()));
        let p = MutationPipeline::new(Arc::new(reg));
        for raw in [
            &br#"{"apiVersion":"example.dev/v1","kind":"Gadget"}"#[..],
            &br#"{"apiVersion":"example.dev/v1","kind":"Gadget","spec":null}"#[..],
        ] {
            let patch = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).expect("ok");
            assert!(patch.is_empty(), "got {:?}", patch.to_json());
        }
    }

    #[test]
    fn null_members_count_as_absent() {
        let p = pipeline();
        let raw = br#"{"apiVersion":"example.dev/v1","kind":"Gadget","metadata":{"creationTimestamp":null},"spec":{"name":null,"replicas":null}}"#;
        let patch = p.mutate(&MutationRequest::new(raw.to_vec(), gadget_kind())).expect("ok");
        assert_eq!(patch.summary().removes, 0);
        assert_eq!(patch.len(), 1);
        let out: Json = serde_json::from_slice(&patch.apply_to(raw).expect("apply")).expect("json");
        assert_eq!(out["spec"]["replicas"], 1);
        assert!(out["metadata"]["creationTimestamp"].is_null());
    }

    #[test]
    fn without_nulls_recurses_into_arrays() {
        let v = serde_json::json!({ "a": null, "b": [{ "c": null, "d": 1 }, null] });
        assert_eq!(without_nulls(&v), serde_json::json!({ "b": [{ "d": 1 }, null] }));
    }
}
