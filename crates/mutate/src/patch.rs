//! JSON Patch (RFC 6902) documents produced by the pipeline.

use json_patch::{Patch, PatchOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::MutationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// Field-level delta between the original object and its mutated form.
#[derive(Debug, Clone)]
pub struct PatchDocument {
    patch: Patch,
}

impl PatchDocument {
    pub fn empty() -> Self {
        Self { patch: Patch(Vec::new()) }
    }

    /// Structural diff `from → to`.
    pub fn diff(from: &Json, to: &Json) -> Self {
        Self { patch: json_patch::diff(from, to) }
    }

    pub fn len(&self) -> usize {
        self.patch.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patch.0.is_empty()
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.patch.0
    }

    pub fn into_patch(self) -> Patch {
        self.patch
    }

    pub fn summary(&self) -> DiffSummary {
        let mut s = DiffSummary::default();
        for op in &self.patch.0 {
            match op {
                PatchOperation::Add(_) | PatchOperation::Copy(_) => s.adds += 1,
                PatchOperation::Remove(_) => s.removes += 1,
                PatchOperation::Replace(_) | PatchOperation::Move(_) => s.updates += 1,
                PatchOperation::Test(_) => {}
            }
        }
        s
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(&self.patch).unwrap_or_else(|_| Json::Array(Vec::new()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MutationError> {
        serde_json::to_vec(&self.patch).map_err(|e| MutationError::Encode(format!("serializing patch: {e}")))
    }

    /// Apply to a parsed document in place.
    pub fn apply_to_value(&self, doc: &mut Json) -> Result<(), MutationError> {
        json_patch::patch(doc, &self.patch.0).map_err(|e| MutationError::Encode(format!("applying patch: {e}")))
    }

    /// Apply to raw JSON bytes and return the patched serialization.
    pub fn apply_to(&self, raw: &[u8]) -> Result<Vec<u8>, MutationError> {
        let mut doc: Json = serde_json::from_slice(raw).map_err(|e| MutationError::Decode(format!("payload is not JSON: {e}")))?;
        self.apply_to_value(&mut doc)?;
        serde_json::to_vec(&doc).map_err(|e| MutationError::Encode(format!("serializing patched document: {e}")))
    }
}

impl Default for PatchDocument {
    fn default() -> Self {
        Self::empty()
    }
}
