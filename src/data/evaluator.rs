// ============================================================
// Layer 4 — QA Evaluator
// ============================================================
// Scores predicted answers against each example's soft label:
//
//   score(uid) = label[uid][predicted answer]   (0 if absent)
//   result     = mean over all predicted uids
//
// A prediction for an example without a label scores 0, so the
// result is comparable across epochs of the same split.

use std::collections::HashMap;

use crate::data::answer_table::AnswerTable;
use crate::domain::example::RawExample;
use crate::domain::traits::Evaluator;

pub struct LabelScoreEvaluator {
    /// uid → answer string → soft score
    labels: HashMap<String, HashMap<String, f32>>,
}

impl LabelScoreEvaluator {
    pub fn new(examples: &[RawExample], answers: &AnswerTable) -> Self {
        let labels = examples
            .iter()
            .filter_map(|ex| {
                let label = ex.label.as_ref()?;
                let scores = label
                    .iter()
                    .filter_map(|(&id, &w)| answers.id2ans(id).map(|a| (a.to_string(), w)))
                    .collect();
                Some((ex.uid.clone(), scores))
            })
            .collect();
        Self { labels }
    }
}

impl Evaluator for LabelScoreEvaluator {
    fn evaluate(&self, predictions: &HashMap<String, String>) -> f64 {
        if predictions.is_empty() {
            return 0.0;
        }
        let total: f64 = predictions
            .iter()
            .filter_map(|(uid, ans)| self.labels.get(uid)?.get(ans).copied())
            .map(f64::from)
            .sum();
        total / predictions.len() as f64
    }
}
