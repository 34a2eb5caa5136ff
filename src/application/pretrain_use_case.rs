// ============================================================
// Layer 2 — PretrainUseCase
// ============================================================
// Orchestrates a pre-training run in order:
//
//   Step 1: Validate the configuration      (Layer 2)
//   Step 2: Read the training records       (Layer 4 - data)
//   Step 3: Build / load the answer table   (Layer 4 - data)
//   Step 4: Load the validation split       (Layer 4 - data)
//   Step 5: Build / load the tokenizer      (Layer 6 - infra)
//   Step 6: Build the feature pool          (Layer 4 - data)
//   Step 7: Save config + answer table      (Layer 6 - infra)
//   Step 8: Run the training loop           (Layer 5 - ml)
//
// Steps 2–6 are `prepare()`, which touches no GPU and is what
// the inspect command reuses.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::Result;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::{
    answer_table::AnswerTable,
    assembler::{AssemblerConfig, ExampleAssembler},
    dataset::PretrainDataset,
    evaluator::LabelScoreEvaluator,
    feature_pool::FeaturePool,
    loader::{read_jsonl, JsonlLoader},
};
use crate::domain::traits::ExampleSource;
use crate::error::{PretrainError, PretrainResult};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    tokenizer_store::{load_tokenizer_file, TokenizerStore, Vocab},
};
use crate::ml::{
    model::{LxmertLiteConfig, PretrainTasks},
    trainer::{run_training, InitWeights, LoopConfig, LoopOutputs, PretrainData},
};

const VISUAL_LOSSES: [&str; 3] = ["obj", "attr", "feat"];

// ─── Pre-training Configuration ───────────────────────────────────────────────
// Every option a run recognises. Saved next to the checkpoints as
// train_config.json so a run can be reproduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PretrainConfig {
    // ── Data ──
    pub train_path:      String,
    pub valid_path:      String,
    pub answers_path:    Option<String>,
    pub tokenizer_path:  Option<String>,
    pub vocab_size:      usize,
    pub valid_topk:      Option<usize>,
    // ── Run ──
    pub output_dir:      String,
    pub load:            Option<String>,
    /// Like `load`, but keeps the fresh answer head
    pub load_lxmert:     Option<String>,
    pub seed:            u64,
    pub multi_gpu:       bool,
    // ── Feature engineering ──
    pub word_mask_rate:  f64,
    pub obj_mask_rate:   f64,
    pub max_seq_length:  usize,
    // ── Optimisation ──
    pub batch_size:      usize,
    pub epochs:          usize,
    pub lr:              f64,
    pub warmup_ratio:    f64,
    pub weight_decay:    f64,
    pub grad_clip_norm:  f64,
    // ── Tasks ──
    pub task_mask_lm:     bool,
    pub task_obj_predict: bool,
    pub task_matched:     bool,
    pub task_qa:          bool,
    pub task_qa_woi:      bool,
    pub task_va:          bool,
    pub task_va2:         bool,
    pub visual_losses:    String,
    // ── Model ──
    pub d_model:          usize,
    pub num_heads:        usize,
    pub num_layers:       usize,
    pub d_ff:             usize,
    pub dropout:          f64,
    pub visual_feat_dim:  usize,
    pub num_obj_labels:   usize,
    pub num_attr_labels:  usize,
}

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            train_path:       "data/lxmert/train.jsonl".to_string(),
            valid_path:       "data/lxmert/valid.jsonl".to_string(),
            answers_path:     None,
            tokenizer_path:   None,
            vocab_size:       30522,
            valid_topk:       Some(5000),
            output_dir:       "snap/pretrain".to_string(),
            load:             None,
            load_lxmert:      None,
            seed:             9595,
            multi_gpu:        false,
            word_mask_rate:   0.15,
            obj_mask_rate:    0.15,
            max_seq_length:   20,
            batch_size:       256,
            epochs:           20,
            lr:               1e-4,
            warmup_ratio:     0.05,
            weight_decay:     0.01,
            grad_clip_norm:   1.0,
            task_mask_lm:     true,
            task_obj_predict: true,
            task_matched:     true,
            task_qa:          true,
            task_qa_woi:      false,
            task_va:          false,
            task_va2:         false,
            visual_losses:    "obj,attr,feat".to_string(),
            d_model:          256,
            num_heads:        4,
            num_layers:       4,
            d_ff:             1024,
            dropout:          0.1,
            visual_feat_dim:  2048,
            num_obj_labels:   1600,
            num_attr_labels:  400,
        }
    }
}

impl PretrainConfig {
    /// Reject option combinations no run can use.
    pub fn validate(&self) -> PretrainResult<()> {
        let invalid = |msg: String| Err(PretrainError::InvalidConfig(msg));

        for (name, rate) in [("word_mask_rate", self.word_mask_rate), ("obj_mask_rate", self.obj_mask_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("{name} must be in [0, 1], got {rate}"));
            }
        }
        if self.max_seq_length < 3 {
            return invalid(format!("max_seq_length must be at least 3, got {}", self.max_seq_length));
        }
        if self.batch_size == 0 || self.epochs == 0 {
            return invalid("batch_size and epochs must be positive".to_string());
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return invalid(format!("lr must be positive, got {}", self.lr));
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            return invalid(format!("warmup_ratio must be in [0, 1], got {}", self.warmup_ratio));
        }
        if self.grad_clip_norm.is_nan() || self.grad_clip_norm <= 0.0 {
            return invalid(format!("grad_clip_norm must be positive, got {}", self.grad_clip_norm));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
            return invalid(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            ));
        }
        if let Some(bad) = self.visual_loss_names().find(|l| !VISUAL_LOSSES.contains(l)) {
            return invalid(format!("unknown visual loss '{bad}' (expected obj, attr or feat)"));
        }
        Ok(())
    }

    fn visual_loss_names(&self) -> impl Iterator<Item = &str> {
        self.visual_losses.split(',').map(str::trim).filter(|s| !s.is_empty())
    }

    /// Task flags as the model sees them
    pub fn tasks(&self) -> PretrainTasks {
        let has = |name: &str| self.visual_loss_names().any(|l| l == name);
        PretrainTasks::new()
            .with_mask_lm(self.task_mask_lm)
            .with_obj_predict(self.task_obj_predict)
            .with_matched(self.task_matched)
            .with_qa(self.task_qa)
            .with_qa_woi(self.task_qa_woi)
            .with_va(self.task_va)
            .with_va2(self.task_va2)
            .with_obj_loss(has("obj"))
            .with_attr_loss(has("attr"))
            .with_feat_loss(has("feat"))
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            max_seq_length: self.max_seq_length,
            word_mask_rate: self.word_mask_rate,
            obj_mask_rate:  self.obj_mask_rate,
            // an unused replacement sentence falls back to the primary one
            encode_replacement_sent: self.task_matched,
        }
    }

    /// Validation batch size of the reference run scripts
    pub fn valid_batch_size(&self) -> usize {
        if self.multi_gpu { 128 } else { 64 }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            epochs:           self.epochs,
            batch_size:       self.batch_size,
            valid_batch_size: self.valid_batch_size(),
            lr:               self.lr,
            warmup_ratio:     self.warmup_ratio,
            weight_decay:     self.weight_decay,
            grad_clip_norm:   self.grad_clip_norm,
            task_qa:          self.task_qa,
        }
    }

    pub fn model_config(&self, vocab_size: usize, num_answers: usize) -> LxmertLiteConfig {
        LxmertLiteConfig::new(
            vocab_size,
            self.max_seq_length,
            self.visual_feat_dim,
            self.num_obj_labels,
            self.num_attr_labels,
            num_answers,
            self.tasks(),
        )
        .with_d_model(self.d_model)
        .with_num_heads(self.num_heads)
        .with_num_layers(self.num_layers)
        .with_d_ff(self.d_ff)
        .with_dropout(self.dropout)
    }
}

// ─── Prepared Run ─────────────────────────────────────────────────────────────
/// Datasets and collaborators a run needs, built from the config.
pub struct PreparedRun {
    pub train:   PretrainDataset,
    pub valid:   PretrainDataset,
    pub answers: AnswerTable,
    pub vocab:   Vocab,
    pub pool:    FeaturePool,
}

// ─── PretrainUseCase ──────────────────────────────────────────────────────────
pub struct PretrainUseCase {
    config: PretrainConfig,
}

impl PretrainUseCase {
    pub fn new(config: PretrainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PretrainConfig {
        &self.config
    }

    /// Load data, answers, tokenizer and feature pool.
    pub fn prepare(&self) -> Result<PreparedRun> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Training records ──────────────────────────────────────────
        let train_data = read_jsonl(Path::new(&cfg.train_path))?;
        if train_data.is_empty() {
            anyhow::bail!("Training set '{}' has no examples", cfg.train_path);
        }

        // ── Step 3: Answer table ──────────────────────────────────────────────
        // From file when given, otherwise every answer the training labels name
        let answers = match &cfg.answers_path {
            Some(path) => AnswerTable::load(Path::new(path))?,
            None => AnswerTable::from_labels(train_data.iter().filter_map(|d| d.label.as_ref())),
        };
        tracing::info!("Answer table: {} answers", answers.num_answers());

        let train_examples: Vec<_> = train_data
            .into_iter()
            .map(|d| d.into_example(&answers))
            .collect();

        // ── Step 4: Validation split ──────────────────────────────────────────
        let valid_examples = JsonlLoader::new(&cfg.valid_path, &answers).load_all()?;
        let train = PretrainDataset::new(train_examples);
        let valid = PretrainDataset::truncated(valid_examples, cfg.valid_topk);
        tracing::info!("Split: {} train, {} validation", train.len(), valid.len());
        if valid.is_empty() {
            tracing::warn!("Validation split '{}' is empty; validation loss will be NaN", cfg.valid_path);
        }

        // ── Step 5: Tokenizer ─────────────────────────────────────────────────
        let tokenizer = match &cfg.tokenizer_path {
            Some(path) => load_tokenizer_file(Path::new(path))?,
            None => TokenizerStore::new(&cfg.output_dir).load_or_build(&train.texts(), cfg.vocab_size)?,
        };
        let vocab = Vocab::new(tokenizer)?;
        tracing::info!("Vocabulary: {} ids", vocab.num_ids());

        // ── Step 6: Feature pool ──────────────────────────────────────────────
        let pool = FeaturePool::from_examples(train.examples())?;
        tracing::info!(
            "Feature pool: {} vectors from {} images",
            pool.num_vectors(),
            pool.num_images()
        );
        if pool.dim() != cfg.visual_feat_dim {
            return Err(PretrainError::ShapeMismatch {
                what:     "visual_feat_dim".to_string(),
                expected: cfg.visual_feat_dim,
                found:    pool.dim(),
            }
            .into());
        }

        Ok(PreparedRun { train, valid, answers, vocab, pool })
    }

    /// Execute the full pre-training run end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        let run = self.prepare()?;

        // ── Step 7: Save config + answers ─────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.output_dir)?;
        ckpt.save_config(cfg)?;
        run.answers.save(&ckpt.dir().join("answers.json"))?;
        let metrics = MetricsLogger::new(ckpt.dir())?;

        // ── Step 8: Training loop (Layer 5) ───────────────────────────────────
        tracing::info!(
            "multi_gpu={} → validation batch size {}",
            cfg.multi_gpu,
            cfg.valid_batch_size()
        );
        let train_eval = LabelScoreEvaluator::new(run.train.examples(), &run.answers);
        let valid_eval = LabelScoreEvaluator::new(run.valid.examples(), &run.answers);
        let data = PretrainData {
            train:      &run.train,
            valid:      &run.valid,
            assembler:  ExampleAssembler::new(cfg.assembler_config(), &run.vocab, &run.pool),
            answers:    &run.answers,
            train_eval: &train_eval,
            valid_eval: &valid_eval,
        };
        let outputs   = LoopOutputs { checkpoints: &ckpt, metrics: &metrics };
        let model_cfg = cfg.model_config(run.vocab.num_ids(), run.answers.num_answers());
        let mut rng   = StdRng::seed_from_u64(cfg.seed);

        let weights   = InitWeights {
            load:        cfg.load.as_deref(),
            load_lxmert: cfg.load_lxmert.as_deref(),
        };

        run_training(&model_cfg, &weights, &cfg.loop_config(), &data, &outputs, &mut rng)
    }
}

// ─── Test Fixtures ────────────────────────────────────────────────────────────
#[cfg(test)]
pub mod fixtures {
    use super::*;
    use std::io::Write;

    fn line(uid: &str, sent: &str, answer: &str) -> String {
        let mut label = serde_json::Map::new();
        label.insert(answer.to_string(), 1.0.into());
        serde_json::json!({
            "uid": uid,
            "sent": sent,
            "answer": answer,
            "label": label,
            "feats": [[0.1, 0.2], [0.3, 0.4]],
            "boxes": [[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 0.5, 0.5]],
            "obj_labels": [1, 2], "obj_confs": [0.9, 0.8],
            "attr_labels": [0, 1], "attr_confs": [0.5, 0.5]
        })
        .to_string()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut f = std::fs::File::create(path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    /// Train / valid JSON-lines files under `dir` and a config pointing at them
    pub fn config_in(dir: &Path) -> PretrainConfig {
        let train = dir.join("train.jsonl");
        let valid = dir.join("valid.jsonl");
        write_lines(&train, &[
            line("t0", "what color is the cat", "red"),
            line("t1", "is the dog red", "yes"),
            line("t2", "how many dogs", "2"),
        ]);
        write_lines(&valid, &[
            line("v0", "is the cat red", "no"),
            line("v1", "what color is the dog", "red"),
        ]);
        PretrainConfig {
            train_path:      train.to_string_lossy().into_owned(),
            valid_path:      valid.to_string_lossy().into_owned(),
            output_dir:      dir.join("snap").to_string_lossy().into_owned(),
            visual_feat_dim: 2,
            valid_topk:      Some(1),
            ..Default::default()
        }
    }
}
