//! Manifest file loading (JSON or multi-document YAML).

use anyhow::{anyhow, Context, Result};
use gantry_core::{ResourceDescriptor, ResourceKind};
use serde::Deserialize;
use serde_json::Value as Json;

/// Every non-empty document in `text`, converted to JSON values. `List` objects are flattened.
pub fn parse_documents(text: &str) -> Result<Vec<Json>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let yaml = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing document {}", i))?;
        if yaml.is_null() {
            continue;
        }
        let json: Json = serde_json::to_value(yaml).with_context(|| format!("converting document {} to JSON", i))?;
        match json.get("items").and_then(|v| v.as_array()) {
            Some(items) if is_list(&json) => out.extend(items.iter().cloned()),
            _ => out.push(json),
        }
    }
    Ok(out)
}

fn is_list(obj: &Json) -> bool {
    obj.get("kind").and_then(|k| k.as_str()).map_or(false, |k| k.ends_with("List"))
}

/// Descriptors for every object in a manifest.
pub fn descriptors(text: &str) -> Result<Vec<ResourceDescriptor>> {
    parse_documents(text)?
        .iter()
        .enumerate()
        .map(|(i, doc)| ResourceDescriptor::from_manifest(doc).with_context(|| format!("object {} in manifest", i)))
        .collect()
}

/// Exactly one object, as canonical JSON bytes plus its kind.
pub fn single_object(text: &str) -> Result<(Vec<u8>, ResourceKind)> {
    let mut docs = parse_documents(text)?;
    if docs.len() != 1 {
        return Err(anyhow!("expected exactly one object, found {}", docs.len()));
    }
    let doc = docs.remove(0);
    let kind = match (doc.get("apiVersion").and_then(|v| v.as_str()), doc.get("kind").and_then(|v| v.as_str())) {
        (Some(av), Some(k)) => ResourceKind::from_api_version(av, k),
        _ => return Err(anyhow!("object has no apiVersion/kind; pass --kind")),
    };
    Ok((serde_json::to_vec(&doc)?, kind))
}
