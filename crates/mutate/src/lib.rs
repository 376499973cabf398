//! Gantry mutate: admission-time normalization of custom resources.
//!
//! A [`MutationRegistry`] maps kinds to typed [`MutationChain`]s; the
//! [`MutationPipeline`] decodes a raw payload, runs the chain and returns the
//! minimal JSON Patch between the decoded object and its mutated form.

#![forbid(unsafe_code)]

mod error;
pub mod knative;
mod patch;
pub mod pipeline;
pub mod registry;
pub mod review;

pub use error::MutationError;
pub use patch::{DiffSummary, PatchDocument};
pub use pipeline::{MutationPipeline, MutationRequest};
pub use registry::{kind_of, ErasedChain, MutationChain, MutationFn, MutationRegistry};
