// ============================================================
// Layer 4 — Example Assembler
// ============================================================
// Turns one RawExample into one FeatureBundle.
//
//   sentence ────────► encode ──► primary ─────────────┐
//   replace_sent? ───► encode ──► Present / Absent ────┤ resolve
//   answer? ─────────► encode ──► Present / Absent ────┤ (Absent →
//   replace_answer? ─► encode ──► Present / Absent ────┘  primary copy)
//   answer strings ──► answer_type (×2)
//   visual feats ────► mask_feats (pool draws)
//   soft labels ─────► sample_answer (×2)
//
// The steps run in exactly this order. Every stochastic step
// reads from the same RNG, so a fixed seed reproduces the whole
// bundle, and changing the order changes every mask downstream.
//
// Visual corruption does not look at is_matched: an unmatched
// pair is masked exactly like a matched one.

use rand::Rng;

use crate::data::answer::{answer_type, sample_answer};
use crate::data::encoder::encode;
use crate::data::masking::mask_feats;
use crate::domain::example::RawExample;
use crate::domain::features::{ChannelSlot, EncodedChannel, FeatureBundle, TextChannels};
use crate::domain::traits::{FeatureSource, Vocabulary};
use crate::error::{PretrainError, PretrainResult};

/// The part of the run configuration the assembler needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblerConfig {
    pub max_seq_length: usize,
    pub word_mask_rate: f64,
    pub obj_mask_rate:  f64,
    /// Encode the replacement sentence (only needed by the matched task)
    pub encode_replacement_sent: bool,
}

pub struct ExampleAssembler<'a, V, P> {
    config: AssemblerConfig,
    vocab:  &'a V,
    pool:   &'a P,
}

impl<'a, V, P> ExampleAssembler<'a, V, P>
where
    V: Vocabulary,
    P: FeatureSource,
{
    pub fn new(config: AssemblerConfig, vocab: &'a V, pool: &'a P) -> Self {
        Self { config, vocab, pool }
    }

    /// Build the feature bundle for one example.
    ///
    /// A malformed example fails before any randomness is spent.
    pub fn assemble<R: Rng + ?Sized>(
        &self,
        example: &RawExample,
        rng:     &mut R,
    ) -> PretrainResult<FeatureBundle> {
        example.validate()?;

        // ── Step 1: Tokenize every present text ───────────────────────────────
        let tokens = self.vocab.tokenize(example.sent.trim())?;
        let replace_sent = if self.config.encode_replacement_sent {
            example.replace_sent.as_deref()
        } else {
            None
        };
        let tokens_rps   = self.tokenize_opt(replace_sent)?;
        let tokens_a     = self.tokenize_opt(example.answer.as_deref())?;
        let tokens_a_rps = self.tokenize_opt(example.replace_answer.as_deref())?;

        // ── Step 2: Encode the four channels ──────────────────────────────────
        let primary         = self.encode_channel(&tokens, rng);
        let replaced_sent   = self.encode_opt(tokens_rps.as_deref(), rng);
        let answer          = self.encode_opt(tokens_a.as_deref(), rng);
        let replaced_answer = self.encode_opt(tokens_a_rps.as_deref(), rng);

        // ── Step 3: Answer types ──────────────────────────────────────────────
        let ans_type     = answer_type(example.answer.as_deref());
        let ans_rps_type = answer_type(example.replace_answer.as_deref());

        // ── Step 4: Corrupt visual features ───────────────────────────────────
        let (masked_feats, feat_mask) =
            mask_feats(&example.visual.feats, self.config.obj_mask_rate, self.pool, rng)?;

        // ── Step 5: Sample answers ────────────────────────────────────────────
        let ans = sample_answer(example.label.as_ref(), rng)
            .map_err(|e| malformed(example, format!("answer label: {e}")))?;
        let replace_ans = sample_answer(example.replace_label.as_ref(), rng)
            .map_err(|e| malformed(example, format!("replacement answer label: {e}")))?;

        // ── Step 6: Resolve fallbacks and assemble ────────────────────────────
        let channels = TextChannels {
            replaced_sent:   replaced_sent.resolve(&primary),
            answer:          answer.resolve(&primary),
            replaced_answer: replaced_answer.resolve(&primary),
            primary,
        };

        Ok(FeatureBundle {
            uid: example.uid.clone(),
            channels,
            masked_feats,
            boxes:        example.visual.boxes.clone(),
            obj_labels:   example.obj_labels.clone(),
            attr_labels:  example.attr_labels.clone(),
            feat_targets: example.visual.feats.clone(),
            feat_mask,
            ans,
            replace_ans,
            ans_type,
            ans_rps_type,
            is_matched:  example.is_matched,
            ans_matched: example.ans_matched,
        })
    }

    /// Assemble a whole batch. One bad example fails the batch:
    /// a partial batch could not be stacked anyway.
    pub fn assemble_batch<'e, I, R>(&self, examples: I, rng: &mut R) -> PretrainResult<Vec<FeatureBundle>>
    where
        I: IntoIterator<Item = &'e RawExample>,
        R: Rng + ?Sized,
    {
        examples.into_iter().map(|ex| self.assemble(ex, rng)).collect()
    }

    fn tokenize_opt(&self, text: Option<&str>) -> PretrainResult<Option<Vec<String>>> {
        text.map(|t| self.vocab.tokenize(t.trim())).transpose()
    }

    fn encode_channel<R: Rng + ?Sized>(&self, tokens: &[String], rng: &mut R) -> EncodedChannel {
        encode(tokens, self.config.max_seq_length, self.config.word_mask_rate, self.vocab, rng)
    }

    fn encode_opt<R: Rng + ?Sized>(&self, tokens: Option<&[String]>, rng: &mut R) -> ChannelSlot {
        match tokens {
            Some(tokens) => ChannelSlot::Present(self.encode_channel(tokens, rng)),
            None         => ChannelSlot::Absent,
        }
    }
}

fn malformed(example: &RawExample, reason: String) -> PretrainError {
    PretrainError::MalformedExample { uid: example.uid.clone(), reason }
}
