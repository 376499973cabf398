/// Errors produced by the admission mutation pipeline.
///
/// Both variants are deterministic for a given input, so callers never retry them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// The payload is not a valid serialization of the requested kind.
    #[error("decode: {0}")]
    Decode(String),
    /// The mutated object could not be re-serialized or broke an invariant.
    #[error("encode: {0}")]
    Encode(String),
}

impl MutationError {
    /// HTTP-style status code surfaced at the admission boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            MutationError::Decode(_) => 400,
            MutationError::Encode(_) => 500,
        }
    }
}
