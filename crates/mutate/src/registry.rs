//! Kind → mutation chain mapping, built once at startup and read concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::ResourceKind;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::pipeline::{decode_typed, encode_typed, restore_absent_spec};
use crate::MutationError;

/// A single pure mutation over a typed object. Must be deterministic and idempotent.
pub type MutationFn<K> = Arc<dyn Fn(&mut K) + Send + Sync>;

/// Post-mutation invariant; an `Err` surfaces as an encode failure.
pub type InvariantFn<K> = Arc<dyn Fn(&K) -> Result<(), String> + Send + Sync>;

/// Identity of a kube-derived resource type.
pub fn kind_of<K: Resource<DynamicType = ()>>() -> ResourceKind {
    ResourceKind::new(K::group(&()), K::version(&()), K::kind(&()))
}

/// Ordered mutation steps for one kind.
pub struct MutationChain<K> {
    kind: ResourceKind,
    steps: Vec<(&'static str, MutationFn<K>)>,
    invariants: Vec<InvariantFn<K>>,
}

impl<K: Resource<DynamicType = ()>> MutationChain<K> {
    pub fn new() -> Self {
        Self::for_kind(kind_of::<K>())
    }
}

impl<K: Resource<DynamicType = ()>> Default for MutationChain<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MutationChain<K> {
    /// Chain for an explicit kind identity (e.g. a served version other than the type's own).
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self { kind, steps: Vec::new(), invariants: Vec::new() }
    }

    /// Append a named step; steps run in the order they were added.
    pub fn then<F>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(&mut K) + Send + Sync + 'static,
    {
        self.steps.push((name, Arc::new(f)));
        self
    }

    /// Add an invariant checked after every step has run.
    pub fn ensure<F>(mut self, f: F) -> Self
    where
        F: Fn(&K) -> Result<(), String> + Send + Sync + 'static,
    {
        self.invariants.push(Arc::new(f));
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order over `obj`.
    pub fn apply(&self, obj: &mut K) {
        for (_, step) in &self.steps {
            step(obj);
        }
    }

    /// Check invariants against an already mutated object.
    pub fn check(&self, obj: &K) -> Result<(), String> {
        self.invariants.iter().try_for_each(|inv| inv(obj))
    }
}

/// Type-erased chain so the registry can hold chains for different domain types.
pub trait ErasedChain: Send + Sync {
    fn kind(&self) -> &ResourceKind;

    fn step_names(&self) -> Vec<&'static str>;

    /// Decode `original`, run the chain and return the mutated encoding.
    fn render(&self, original: &Json) -> Result<Json, MutationError>;
}

impl<K> ErasedChain for MutationChain<K>
where
    K: DeserializeOwned + Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(name, _)| *name).collect()
    }

    fn render(&self, original: &Json) -> Result<Json, MutationError> {
        let mut obj: K = decode_typed(original, &self.kind)?;
        self.apply(&mut obj);
        self.check(&obj).map_err(|e| MutationError::Encode(format!("{} invariant: {}", self.kind, e)))?;
        let mut mutated = encode_typed(&obj)?;
        restore_absent_spec(original, &mut mutated);
        Ok(mutated)
    }
}

/// Registry of mutation chains keyed by kind. One chain per kind; registering a kind
/// again replaces its chain.
#[derive(Default)]
pub struct MutationRegistry {
    chains: HashMap<String, Arc<dyn ErasedChain>>,
}

impl MutationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<K>(&mut self, chain: MutationChain<K>) -> &mut Self
    where
        K: DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        self.register_erased(Arc::new(chain))
    }

    pub fn register_erased(&mut self, chain: Arc<dyn ErasedChain>) -> &mut Self {
        let key = chain.kind().gvk_key();
        let steps = chain.step_names();
        if self.chains.insert(key.clone(), chain).is_some() {
            debug!(kind = %key, ?steps, "mutation chain replaced");
        } else {
            debug!(kind = %key, ?steps, "mutation chain registered");
        }
        self
    }

    pub fn resolve(&self, kind: &ResourceKind) -> Option<&dyn ErasedChain> {
        self.chains.get(&kind.gvk_key()).map(|c| c.as_ref())
    }

    /// Registered kinds in key order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut out: Vec<_> = self.chains.values().map(|c| c.kind().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
