// ============================================================
// Layer 3 — Encoded Features
// ============================================================
// The output side of the feature-engineering pipeline.
//
// EncodedChannel: one text sequence framed and padded to
// max_seq_length. Four parallel arrays, always the same length:
//
//   tokens        [CLS]  a   [MASK] runs [SEP]  pad  pad
//   input_ids      101   5    103   7    102    0    0
//   input_mask      1    1     1    1     1     0    0
//   segment_ids     0    0     0    0     0     0    0
//   lm_label_ids   -1   -1     6   -1    -1    -1   -1
//
// FeatureBundle: four EncodedChannels (primary, replaced
// sentence, answer, replaced answer) plus the corrupted visual
// features and every label the model needs for one example.

use crate::domain::example::{AnswerId, VisualLabels};

/// LM label of a position the loss must ignore
/// (unmasked tokens, [CLS], [SEP], padding).
pub const IGNORE_LABEL: i64 = -1;

/// One encoded text sequence. All four arrays have length max_seq_length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChannel {
    pub input_ids:    Vec<u32>,
    /// 1 for real (or masked) tokens, 0 for padding
    pub input_mask:   Vec<u32>,
    /// Constant 0: every channel is a single segment
    pub segment_ids:  Vec<u32>,
    /// Original id at masked positions, IGNORE_LABEL elsewhere
    pub lm_label_ids: Vec<i64>,
}

impl EncodedChannel {
    /// Number of positions the masked-LM loss will predict
    pub fn num_targets(&self) -> usize {
        self.lm_label_ids.iter().filter(|&&l| l != IGNORE_LABEL).count()
    }
}

/// An optional text channel before fallback resolution.
///
/// Absent is not an error: it is materialised as a copy of the
/// primary channel by [`ChannelSlot::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSlot {
    Present(EncodedChannel),
    Absent,
}

impl ChannelSlot {
    /// Materialise the channel: Present keeps its own encoding,
    /// Absent becomes an exact copy of `primary`.
    pub fn resolve(self, primary: &EncodedChannel) -> EncodedChannel {
        match self {
            ChannelSlot::Present(channel) => channel,
            ChannelSlot::Absent           => primary.clone(),
        }
    }
}

/// The four correlated text channels after fallback resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChannels {
    pub primary:         EncodedChannel,
    pub replaced_sent:   EncodedChannel,
    pub answer:          EncodedChannel,
    pub replaced_answer: EncodedChannel,
}

/// Everything the model consumes for one example.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBundle {
    /// Carried through for the answer-prediction → evaluator lookup
    pub uid: String,

    pub channels: TextChannels,

    // ── Visual inputs ────────────────────────────────────────────────────────
    /// Features after corruption (zeroed / swapped / kept)
    pub masked_feats: Vec<Vec<f32>>,
    pub boxes:        Vec<[f32; 4]>,

    // ── Visual labels ────────────────────────────────────────────────────────
    pub obj_labels:   VisualLabels,
    pub attr_labels:  VisualLabels,
    /// Uncorrupted features: regression targets at masked positions
    pub feat_targets: Vec<Vec<f32>>,
    /// 1.0 exactly where a box was selected for corruption
    pub feat_mask:    Vec<f32>,

    // ── Answer labels ────────────────────────────────────────────────────────
    pub ans:          AnswerId,
    pub replace_ans:  AnswerId,
    /// 1 = closed form (yes / no / number), 0 = open vocabulary
    pub ans_type:     u8,
    pub ans_rps_type: u8,

    // ── Matching labels ──────────────────────────────────────────────────────
    pub is_matched:  bool,
    pub ans_matched: bool,
}

impl FeatureBundle {
    pub fn num_boxes(&self) -> usize {
        self.masked_feats.len()
    }

    pub fn feat_dim(&self) -> usize {
        self.masked_feats.first().map_or(0, Vec::len)
    }

    pub fn seq_len(&self) -> usize {
        self.channels.primary.input_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(ids: &[u32]) -> EncodedChannel {
        EncodedChannel {
            input_ids:    ids.to_vec(),
            input_mask:   vec![1; ids.len()],
            segment_ids:  vec![0; ids.len()],
            lm_label_ids: vec![IGNORE_LABEL; ids.len()],
        }
    }

    #[test]
    fn test_absent_slot_resolves_to_primary_copy() {
        let primary = channel(&[101, 5, 102]);
        assert_eq!(ChannelSlot::Absent.resolve(&primary), primary);
    }

    #[test]
    fn test_present_slot_keeps_its_own_encoding() {
        let primary = channel(&[101, 5, 102]);
        let own     = channel(&[101, 9, 102]);
        let slot    = ChannelSlot::Present(own.clone());
        assert_eq!(slot.resolve(&primary), own);
    }

    #[test]
    fn test_num_targets_counts_non_ignored_labels() {
        let mut c = channel(&[101, 5, 6, 102]);
        c.lm_label_ids[2] = 6;
        assert_eq!(c.num_targets(), 1);
    }
}
