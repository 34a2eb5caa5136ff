// ============================================================
// Layer 4 — Example Loader
// ============================================================
// Reads pre-training examples from JSON-lines files.
//
// One RawDatum per line, features inline:
//
//   {"uid": "vqa_12_0", "sent": "what color is the dog?",
//    "answer": "brown", "replace_sent": "a man rides a horse",
//    "label": {"brown": 1.0, "tan": 0.3},
//    "is_matched": true, "ans_matched": true,
//    "feats": [[...], ...], "boxes": [[x0, y0, x1, y1], ...],
//    "obj_labels": [...], "obj_confs": [...],
//    "attr_labels": [...], "attr_confs": [...]}
//
// Blank lines are skipped. A line that fails to parse aborts the
// load with file + line number: the data is corrupt upstream.
//
// Soft labels arrive keyed by answer string and are re-keyed by
// AnswerId through the AnswerTable; unknown answers are pruned.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::data::answer_table::AnswerTable;
use crate::domain::example::{RawExample, VisualFeatures, VisualLabels};
use crate::domain::traits::ExampleSource;

/// One line of a dataset file, before answer ids are resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDatum {
    pub uid:  String,
    pub sent: String,
    #[serde(default)]
    pub answer:         Option<String>,
    #[serde(default)]
    pub replace_sent:   Option<String>,
    #[serde(default)]
    pub replace_answer: Option<String>,
    #[serde(default)]
    pub label:          Option<HashMap<String, f32>>,
    #[serde(default)]
    pub replace_label:  Option<HashMap<String, f32>>,
    #[serde(default = "default_true")]
    pub is_matched:  bool,
    #[serde(default = "default_true")]
    pub ans_matched: bool,

    pub feats: Vec<Vec<f32>>,
    pub boxes: Vec<[f32; 4]>,
    #[serde(default)]
    pub obj_labels:  Vec<i64>,
    #[serde(default)]
    pub obj_confs:   Vec<f32>,
    #[serde(default)]
    pub attr_labels: Vec<i64>,
    #[serde(default)]
    pub attr_confs:  Vec<f32>,
}

fn default_true() -> bool {
    true
}

impl RawDatum {
    /// Resolve soft labels against the answer table
    pub fn into_example(self, answers: &AnswerTable) -> RawExample {
        RawExample {
            label:          self.label.as_ref().map(|l| answers.convert_label(l)),
            replace_label:  self.replace_label.as_ref().map(|l| answers.convert_label(l)),
            uid:            self.uid,
            sent:           self.sent,
            answer:         self.answer,
            replace_sent:   self.replace_sent,
            replace_answer: self.replace_answer,
            visual: VisualFeatures { feats: self.feats, boxes: self.boxes },
            obj_labels:  VisualLabels { labels: self.obj_labels,  confs: self.obj_confs },
            attr_labels: VisualLabels { labels: self.attr_labels, confs: self.attr_confs },
            is_matched:  self.is_matched,
            ans_matched: self.ans_matched,
        }
    }
}

/// Parse every non-blank line of a JSON-lines file
pub fn read_jsonl(path: &Path) -> Result<Vec<RawDatum>> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open dataset '{}'", path.display()))?;

    let mut data = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let datum: RawDatum = serde_json::from_str(&line)
            .with_context(|| format!("Bad record at {}:{}", path.display(), i + 1))?;
        data.push(datum);
    }

    tracing::info!("Read {} records from '{}'", data.len(), path.display());
    Ok(data)
}

/// Loads a JSON-lines split and resolves its labels.
/// Implements the ExampleSource trait from Layer 3.
pub struct JsonlLoader<'a> {
    path:    PathBuf,
    answers: &'a AnswerTable,
}

impl<'a> JsonlLoader<'a> {
    pub fn new(path: impl Into<PathBuf>, answers: &'a AnswerTable) -> Self {
        Self { path: path.into(), answers }
    }
}

impl ExampleSource for JsonlLoader<'_> {
    fn load_all(&self) -> Result<Vec<RawExample>> {
        Ok(read_jsonl(&self.path)?
            .into_iter()
            .map(|d| d.into_example(self.answers))
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINE: &str = r#"{"uid": "u1", "sent": "a dog runs", "answer": "yes",
        "label": {"yes": 1.0, "maybe": 0.5},
        "feats": [[1.0, 2.0]], "boxes": [[0.0, 0.0, 1.0, 1.0]],
        "obj_labels": [3], "obj_confs": [0.9], "attr_labels": [4], "attr_confs": [0.2]}"#;

    fn write_lines(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{}", line.replace('\n', " ")).unwrap();
        }
        f
    }

    #[test]
    fn test_reads_records_and_skips_blank_lines() {
        let f    = write_lines(&[LINE, "", LINE]);
        let data = read_jsonl(f.path()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].sent, "a dog runs");
        assert!(data[0].is_matched);
        assert!(data[0].replace_sent.is_none());
    }

    #[test]
    fn test_bad_line_reports_its_position() {
        let f   = write_lines(&[LINE, "{not json"]);
        let err = read_jsonl(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains(":2"));
    }

    #[test]
    fn test_loader_resolves_labels_through_answer_table() {
        let f       = write_lines(&[LINE]);
        let answers = AnswerTable::new(vec!["no".into(), "yes".into()]);
        let loader  = JsonlLoader::new(f.path(), &answers);
        let examples = loader.load_all().unwrap();

        let ex = &examples[0];
        assert_eq!(ex.uid, "u1");
        assert_eq!(ex.answer.as_deref(), Some("yes"));
        // "maybe" is not in the table and is pruned
        let label = ex.label.as_ref().unwrap();
        assert_eq!(label.len(), 1);
        assert_eq!(label.get(&1), Some(&1.0));
        assert!(ex.replace_label.is_none());
        assert!(ex.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(read_jsonl(Path::new("/definitely/not/here.jsonl")).is_err());
    }
}
