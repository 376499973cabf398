//! AdmissionReview adapter: turns kube admission requests into pipeline calls.
//! Transport (HTTP server, TLS) is left to the embedding process.

use gantry_core::ResourceKind;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use tracing::{debug, warn};

use crate::{MutationPipeline, MutationRequest};

/// Answer one admission request. Pipeline errors deny the request (fail-closed).
///
/// The object arrives already parsed as a `DynamicObject`, so the bytes handed to the
/// pipeline are its re-serialization rather than the request body. Everything outside
/// `metadata` is carried through verbatim; `metadata` goes through `ObjectMeta`, which
/// drops `null` members. The pipeline treats `null` members as absent, so the patch
/// applies to the object exactly as the API server sent it.
pub fn respond(pipeline: &MutationPipeline, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let kind = ResourceKind::new(req.kind.group.clone(), req.kind.version.clone(), req.kind.kind.clone());
    let Some(obj) = req.object.as_ref() else {
        debug!(kind = %kind, uid = %req.uid, "no object in request; allowing");
        return AdmissionResponse::from(req);
    };
    let raw = match serde_json::to_vec(obj) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(kind = %kind, uid = %req.uid, error = %e, "re-serializing admission object failed");
            return AdmissionResponse::from(req).deny(format!("decode: {e}"));
        }
    };
    match pipeline.mutate(&MutationRequest::new(raw, kind.clone())) {
        Ok(patch) if patch.is_empty() => AdmissionResponse::from(req),
        Ok(patch) => match AdmissionResponse::from(req).with_patch(patch.into_patch()) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(kind = %kind, uid = %req.uid, code = 500u16, error = %e, "attaching patch failed");
                AdmissionResponse::from(req).deny(format!("encode: {e}"))
            }
        },
        Err(e) => {
            warn!(kind = %kind, uid = %req.uid, code = e.status_code(), error = %e, "denying admission");
            AdmissionResponse::from(req).deny(e.to_string())
        }
    }
}

/// Full review round: unwrap the request, answer it, wrap the response.
pub fn review(pipeline: &MutationPipeline, review: AdmissionReview<DynamicObject>) -> AdmissionReview<DynamicObject> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "invalid admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    respond(pipeline, &req).into_review()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knative::default_registry;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::Arc;

    fn review_for(object: serde_json::Value) -> AdmissionReview<DynamicObject> {
        let v = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": { "group": "operator.serverless.openshift.io", "version": "v1alpha1", "kind": "KnativeKafka" },
                "resource": { "group": "operator.serverless.openshift.io", "version": "v1alpha1", "resource": "knativekafkas" },
                "requestKind": { "group": "operator.serverless.openshift.io", "version": "v1alpha1", "kind": "KnativeKafka" },
                "requestResource": { "group": "operator.serverless.openshift.io", "version": "v1alpha1", "resource": "knativekafkas" },
                "name": "knative-kafka",
                "namespace": "knative-eventing",
                "operation": "CREATE",
                "userInfo": { "username": "admin" },
                "object": object,
                "oldObject": null,
                "dryRun": false,
                "options": null
            }
        });
        serde_json::from_value(v).expect("valid review")
    }

    fn pipeline() -> MutationPipeline {
        MutationPipeline::new(Arc::new(default_registry()))
    }

    #[test]
    fn mutated_object_is_allowed_with_json_patch() {
        let obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing" },
            "spec": { "channel": { "enabled": true, "bootstrapServers": "my-cluster:9092" } }
        });
        let out = serde_json::to_value(review(&pipeline(), review_for(obj))).expect("serialize");
        assert_eq!(out["response"]["allowed"], true);
        assert_eq!(out["response"]["patchType"], "JSONPatch");
        assert!(out["response"]["patch"].is_string());
    }

    #[test]
    fn already_mutated_object_is_allowed_without_patch() {
        let obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing" },
            "spec": { "high-availability": { "replicas": 3 } }
        });
        let out = serde_json::to_value(review(&pipeline(), review_for(obj))).expect("serialize");
        assert_eq!(out["response"]["allowed"], true);
        assert!(out["response"].get("patch").map_or(true, |p| p.is_null()));
    }

    #[test]
    fn undecodable_object_is_denied() {
        let obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing" },
            "spec": { "channel": { "enabled": "definitely" } }
        });
        let out = serde_json::to_value(review(&pipeline(), review_for(obj))).expect("serialize");
        assert_eq!(out["response"]["allowed"], false);
    }

    #[test]
    fn patch_applies_to_the_object_as_sent() {
        let obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing", "creationTimestamp": null },
            "spec": { "broker": { "enabled": true }, "channel": { "bootstrapServers": "a:1 , b:2" } }
        });
        let out = serde_json::to_value(review(&pipeline(), review_for(obj.clone()))).expect("serialize");
        assert_eq!(out["response"]["allowed"], true);
        let encoded = out["response"]["patch"].as_str().expect("patch");
        let ops: json_patch::Patch = serde_json::from_slice(&STANDARD.decode(encoded).expect("base64")).expect("ops");
        let mut doc = obj;
        json_patch::patch(&mut doc, &ops.0).expect("applies");
        assert_eq!(doc["spec"]["broker"]["defaultConfig"]["numPartitions"], 10);
        assert_eq!(doc["spec"]["channel"]["bootstrapServers"], "a:1,b:2");
        assert_eq!(doc["spec"]["high-availability"]["replicas"], 2);
        assert!(doc["spec"]["channel"].get("enabled").is_none());
    }

    #[test]
    fn object_without_spec_is_admitted_with_defaults() {
        let obj = serde_json::json!({
            "apiVersion": "operator.serverless.openshift.io/v1alpha1",
            "kind": "KnativeKafka",
            "metadata": { "name": "knative-kafka", "namespace": "knative-eventing" }
        });
        let out = serde_json::to_value(review(&pipeline(), review_for(obj))).expect("serialize");
        assert_eq!(out["response"]["allowed"], true);
        assert_eq!(out["response"]["patchType"], "JSONPatch");
    }
}
