// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The narrow interfaces through which the pipeline talks to its
// external collaborators:
//
//   Vocabulary    — tokenizer + token↔id mapping + sentinels
//                   (implemented by infra::tokenizer_store::Vocab)
//   FeatureSource — corpus-wide pool of visual feature vectors
//                   (implemented by data::feature_pool::FeaturePool)
//   Evaluator     — scores uid → predicted answer maps
//                   (implemented by data::evaluator::LabelScoreEvaluator)
//   ExampleSource — yields RawExample records
//                   (implemented by data::loader::JsonlLoader)
//
// Every stochastic method takes the RNG explicitly. There is no
// ambient random state anywhere in the pipeline.

use std::collections::HashMap;

use anyhow::Result;
use rand::Rng;

use crate::domain::example::RawExample;
use crate::error::PretrainResult;

// ─── SpecialToken ─────────────────────────────────────────────────────────────
/// The sentinel tokens every vocabulary must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialToken {
    Mask,
    Unk,
    Cls,
    Sep,
}

impl SpecialToken {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialToken::Mask => "[MASK]",
            SpecialToken::Unk  => "[UNK]",
            SpecialToken::Cls  => "[CLS]",
            SpecialToken::Sep  => "[SEP]",
        }
    }
}

// ─── Vocabulary ───────────────────────────────────────────────────────────────
/// Tokenizer and vocabulary as seen by the masking policy and encoder.
pub trait Vocabulary {
    /// Split raw text into vocabulary tokens
    fn tokenize(&self, text: &str) -> PretrainResult<Vec<String>>;

    /// Id of a token, None if it is not in the vocabulary
    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// Id of a sentinel token
    fn special_id(&self, special: SpecialToken) -> u32;

    /// Number of (id, token) entries available for uniform sampling
    fn vocab_len(&self) -> usize;

    /// The token at position `index` of the (stable) enumeration order
    fn token_at(&self, index: usize) -> &str;

    fn contains(&self, token: &str) -> bool {
        self.token_to_id(token).is_some()
    }

    /// Ids for a token list; tokens outside the vocabulary map to [UNK]
    fn convert_tokens_to_ids(&self, tokens: &[String]) -> Vec<u32> {
        let unk = self.special_id(SpecialToken::Unk);
        tokens
            .iter()
            .map(|t| self.token_to_id(t).unwrap_or(unk))
            .collect()
    }

    /// A vocabulary token drawn uniformly at random
    fn random_token<R: Rng + ?Sized>(&self, rng: &mut R) -> &str
    where
        Self: Sized,
    {
        self.token_at(rng.gen_range(0..self.vocab_len()))
    }
}

// ─── FeatureSource ────────────────────────────────────────────────────────────
/// Pool of visual feature vectors used as replacement values
/// during visual-feature corruption.
pub trait FeatureSource {
    /// A feature vector drawn uniformly at random from the pool
    fn random_feat<R: Rng + ?Sized>(&self, rng: &mut R) -> &[f32]
    where
        Self: Sized;
}

// ─── Evaluator ────────────────────────────────────────────────────────────────
/// Scores answer predictions keyed by example uid.
pub trait Evaluator {
    fn evaluate(&self, predictions: &HashMap<String, String>) -> f64;
}

// ─── ExampleSource ────────────────────────────────────────────────────────────
/// Any component that can produce pre-training examples.
pub trait ExampleSource {
    fn load_all(&self) -> Result<Vec<RawExample>>;
}
