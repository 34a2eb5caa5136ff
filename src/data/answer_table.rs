// ============================================================
// Layer 4 — Answer Table
// ============================================================
// Bidirectional answer string ↔ AnswerId mapping shared by the
// QA head (output size), the loader (soft label conversion) and
// the evaluation pass (argmax id → answer string).
//
// Either read from a JSON array of answer strings, or built from
// the answers seen in the training labels (sorted, deduplicated).

use anyhow::{Context, Result};
use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};

use crate::domain::example::{AnswerId, LabelDistribution};

#[derive(Debug, Clone, Default)]
pub struct AnswerTable {
    answers: Vec<String>,
    index:   HashMap<String, AnswerId>,
}

impl AnswerTable {
    /// Table over `answers` in the given order; repeats keep their first id
    pub fn new(answers: Vec<String>) -> Self {
        let mut table = Self::default();
        for ans in answers {
            if !table.index.contains_key(&ans) {
                table.index.insert(ans.clone(), table.answers.len() as AnswerId);
                table.answers.push(ans);
            }
        }
        table
    }

    /// Load from a JSON array of answer strings
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read answer table '{}'", path.display()))?;
        let answers: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("Answer table '{}' is not a JSON string array", path.display()))?;
        tracing::info!("Loaded {} answers from '{}'", answers.len(), path.display());
        Ok(Self::new(answers))
    }

    /// Build from every answer that carries weight in some label
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a HashMap<String, f32>>,
    {
        let answers: BTreeSet<&String> = labels.into_iter().flat_map(|l| l.keys()).collect();
        Self::new(answers.into_iter().cloned().collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.answers)?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write answer table '{}'", path.display()))
    }

    pub fn ans2id(&self, ans: &str) -> Option<AnswerId> {
        self.index.get(ans).copied()
    }

    /// Answer string for an id; out-of-range ids (including -1) give None
    pub fn id2ans(&self, id: AnswerId) -> Option<&str> {
        usize::try_from(id).ok().and_then(|i| self.answers.get(i)).map(String::as_str)
    }

    pub fn num_answers(&self) -> usize {
        self.answers.len()
    }

    /// Re-key a string-keyed soft label by answer id, dropping
    /// answers the table does not know. May come back empty.
    pub fn convert_label(&self, label: &HashMap<String, f32>) -> LabelDistribution {
        label
            .iter()
            .filter_map(|(ans, &w)| self.ans2id(ans).map(|id| (id, w)))
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn label(pairs: &[(&str, f32)]) -> HashMap<String, f32> {
        pairs.iter().map(|(a, w)| (a.to_string(), *w)).collect()
    }

    #[test]
    fn test_ids_follow_insertion_order() {
        let t = AnswerTable::new(vec!["yes".into(), "no".into(), "yes".into(), "red".into()]);
        assert_eq!(t.num_answers(), 3);
        assert_eq!(t.ans2id("no"), Some(1));
        assert_eq!(t.id2ans(2), Some("red"));
        assert_eq!(t.id2ans(-1), None);
        assert_eq!(t.id2ans(3), None);
    }

    #[test]
    fn test_from_labels_sorts_and_dedups() {
        let labels = vec![label(&[("red", 1.0), ("blue", 0.3)]), label(&[("blue", 1.0)])];
        let t = AnswerTable::from_labels(&labels);
        assert_eq!(t.num_answers(), 2);
        assert_eq!(t.ans2id("blue"), Some(0));
        assert_eq!(t.ans2id("red"), Some(1));
    }

    #[test]
    fn test_convert_label_prunes_unknown_answers() {
        let t = AnswerTable::new(vec!["yes".into(), "no".into()]);
        let converted = t.convert_label(&label(&[("no", 0.6), ("maybe", 0.4)]));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted.get(&1), Some(&0.6));
        assert!(t.convert_label(&label(&[("maybe", 1.0)])).is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("answers.json");
        let t    = AnswerTable::new(vec!["two".into(), "dog".into()]);
        t.save(&path).unwrap();
        let back = AnswerTable::load(&path).unwrap();
        assert_eq!(back.ans2id("dog"), Some(1));
        assert_eq!(back.num_answers(), 2);
    }
}
