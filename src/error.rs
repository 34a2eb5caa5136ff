// ============================================================
// Pipeline Errors
// ============================================================
// Typed errors for the feature-engineering pipeline.
//
// Everything here is a precondition violation: the input data
// or the configuration is broken upstream. None of these are
// recovered from; they abort the current batch (and the run)
// through `?` and end up as `anyhow::Error` at the CLI.
//
// Not errors (handled locally instead):
//   - unknown tokens during label lookup  → [UNK] id
//   - absent answer / replacement text    → primary channel copy

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PretrainError {
    /// An example whose fields disagree with each other
    /// (e.g. 36 feature vectors but 35 object labels)
    #[error("malformed example '{uid}': {reason}")]
    MalformedExample { uid: String, reason: String },

    /// Examples in one batch that cannot be stacked into one tensor
    #[error("shape mismatch in {what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what:     String,
        expected: usize,
        found:    usize,
    },

    /// Visual corruption requested but no feature vectors to draw from
    #[error("feature pool is empty but obj_mask_rate > 0")]
    EmptyFeaturePool,

    /// The tokenizer rejected a sentence
    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type PretrainResult<T> = std::result::Result<T, PretrainError>;
