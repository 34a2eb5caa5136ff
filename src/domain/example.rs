// ============================================================
// Layer 3 — RawExample Domain Type
// ============================================================
// One pre-training record exactly as the dataset yields it:
//
//   sentence        "what color is the dog?"     (always present)
//   answer          Some("brown")                (QA examples)
//   replace_sent    Some("a man rides a horse")  (mismatched text)
//   replace_answer  Some("two")                  (mismatched answer)
//   visual          N boxes × D-dim features + N boxes
//   obj / attr      N detector labels + confidences
//   label           {answer_id → weight}         (soft QA target)
//   is_matched      image ~ sentence genuine?
//   ans_matched     image ~ answer genuine?
//
// The record is never mutated; masking works on copies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PretrainError, PretrainResult};

/// Index into the answer table. -1 means "no valid target".
pub type AnswerId = i64;

/// Soft answer distribution: answer id → (unnormalised) weight.
///
/// A BTreeMap so the key order, and therefore the outcome of a
/// seeded categorical draw, is stable across runs.
pub type LabelDistribution = BTreeMap<AnswerId, f32>;

/// Region features of one image: one row per detected box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualFeatures {
    /// N feature vectors, each of the same dimension D
    pub feats: Vec<Vec<f32>>,
    /// N boxes as normalised (x0, y0, x1, y1)
    pub boxes: Vec<[f32; 4]>,
}

/// Detector label per box together with its confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualLabels {
    pub labels: Vec<i64>,
    pub confs:  Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawExample {
    pub uid:            String,
    pub sent:           String,
    pub answer:         Option<String>,
    pub replace_sent:   Option<String>,
    pub replace_answer: Option<String>,
    pub visual:         VisualFeatures,
    pub obj_labels:     VisualLabels,
    pub attr_labels:    VisualLabels,
    pub label:          Option<LabelDistribution>,
    pub replace_label:  Option<LabelDistribution>,
    pub is_matched:     bool,
    pub ans_matched:    bool,
}

impl RawExample {
    /// Number of detected boxes (N)
    pub fn num_boxes(&self) -> usize {
        self.visual.feats.len()
    }

    /// Dimension of each feature vector (D), 0 if there are no boxes
    pub fn feat_dim(&self) -> usize {
        self.visual.feats.first().map_or(0, Vec::len)
    }

    /// Check that every per-box array has exactly N entries and every
    /// feature vector has the same dimension.
    ///
    /// A mismatch means the upstream feature file is corrupt. It is
    /// reported, never truncated away.
    pub fn validate(&self) -> PretrainResult<()> {
        let n = self.num_boxes();
        if n == 0 {
            return Err(self.malformed("no visual features".to_string()));
        }

        let per_box = [
            ("boxes",       self.visual.boxes.len()),
            ("obj labels",  self.obj_labels.labels.len()),
            ("obj confs",   self.obj_labels.confs.len()),
            ("attr labels", self.attr_labels.labels.len()),
            ("attr confs",  self.attr_labels.confs.len()),
        ];
        for (what, len) in per_box {
            if len != n {
                return Err(self.malformed(format!(
                    "{what} has {len} entries but there are {n} feature vectors"
                )));
            }
        }

        let dim = self.feat_dim();
        if dim == 0 {
            return Err(self.malformed("feature vectors are empty".to_string()));
        }
        if let Some((i, f)) = self.visual.feats.iter().enumerate().find(|(_, f)| f.len() != dim) {
            return Err(self.malformed(format!(
                "feature vector {i} has dimension {} but vector 0 has {dim}",
                f.len()
            )));
        }

        Ok(())
    }

    fn malformed(&self, reason: String) -> PretrainError {
        PretrainError::MalformedExample { uid: self.uid.clone(), reason }
    }
}


// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::fixtures::example;
    use super::*;

    #[test]
    fn test_well_formed_example_validates() {
        let ex = example("a dog runs", 3, 4);
        assert!(ex.validate().is_ok());
        assert_eq!(ex.num_boxes(), 3);
        assert_eq!(ex.feat_dim(), 4);
    }

    #[test]
    fn test_label_length_mismatch_is_malformed() {
        let mut ex = example("a dog runs", 3, 4);
        ex.obj_labels.labels.pop();
        let err = ex.validate().unwrap_err();
        assert!(matches!(err, PretrainError::MalformedExample { .. }));
        assert!(err.to_string().contains("obj labels"));
    }

    #[test]
    fn test_ragged_features_are_malformed() {
        let mut ex = example("a dog runs", 3, 4);
        ex.visual.feats[2].push(0.0);
        assert!(ex.validate().is_err());
    }

    #[test]
    fn test_example_without_boxes_is_malformed() {
        let ex = example("a dog runs", 0, 4);
        assert!(ex.validate().is_err());
    }
}
