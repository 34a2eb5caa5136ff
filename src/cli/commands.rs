// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `inspect`, and their
// flags. Options both commands need (data paths, tokenizer,
// masking) live in DataArgs and are flattened into each.
//
// Boolean task flags take an explicit value so defaults of
// `true` can be switched off: `--task-matched false`.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};

use crate::application::pretrain_use_case::PretrainConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pre-train the model on JSON-lines image-text data
    Train(TrainArgs),

    /// Print the assembled features of the first training examples
    Inspect(InspectArgs),
}

/// Data and feature-engineering options shared by every command
#[derive(Args, Debug)]
pub struct DataArgs {
    /// Training split (JSON lines)
    #[arg(long, default_value = "data/lxmert/train.jsonl")]
    pub train: String,

    /// Validation split (JSON lines)
    #[arg(long, default_value = "data/lxmert/valid.jsonl")]
    pub valid: String,

    /// JSON array of answer strings; built from the training labels if omitted
    #[arg(long)]
    pub answers: Option<String>,

    /// HuggingFace tokenizer.json; a word-level one is built if omitted
    #[arg(long)]
    pub tokenizer: Option<String>,

    /// Vocabulary size of a newly built tokenizer
    #[arg(long, default_value_t = 30522)]
    pub vocab_size: usize,

    /// Keep only the first k validation examples (0 keeps all)
    #[arg(long, default_value_t = 5000)]
    pub valid_topk: usize,

    /// Checkpoints, metrics, tokenizer and config are written here
    #[arg(long, default_value = "snap/pretrain")]
    pub output: String,

    #[arg(long, default_value_t = 9595)]
    pub seed: u64,

    /// Probability of selecting each word for masked-LM corruption
    #[arg(long, default_value_t = 0.15)]
    pub word_mask_rate: f64,

    /// Probability of selecting each box for visual corruption
    #[arg(long, default_value_t = 0.15)]
    pub obj_mask_rate: f64,

    /// Sequence length including [CLS] and [SEP]
    #[arg(long, default_value_t = 20)]
    pub max_seq_length: usize,

    /// Dimension of each region feature vector
    #[arg(long, default_value_t = 2048)]
    pub visual_feat_dim: usize,

    /// Image-text matching task (also enables the replacement sentence)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub task_matched: bool,
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub common: DataArgs,

    /// Checkpoint prefix to start from, e.g. snap/pretrain/Epoch03
    #[arg(long)]
    pub load: Option<String>,

    /// Checkpoint prefix whose weights are loaded except the answer head
    #[arg(long)]
    pub load_lxmert: Option<String>,

    /// Selects the validation batch size (128 instead of 64)
    #[arg(long)]
    pub multi_gpu: bool,

    // ── Optimisation ──────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    /// Peak learning rate of the warmup-linear schedule
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Fraction of all steps spent warming up
    #[arg(long, default_value_t = 0.05)]
    pub warmup_ratio: f64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 1.0)]
    pub grad_clip_norm: f64,

    // ── Tasks ─────────────────────────────────────────────────────────────────
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub task_mask_lm: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub task_obj_predict: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub task_qa: bool,

    /// QA from the language-only encoding
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub task_qa_woi: bool,

    /// Answer-channel / image matching
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub task_va: bool,

    /// QA on the replaced answer for closed-form answers
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub task_va2: bool,

    /// Comma-separated subset of obj,attr,feat
    #[arg(long, default_value = "obj,attr,feat")]
    pub visual_losses: String,

    // ── Model ─────────────────────────────────────────────────────────────────
    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    /// d_model must be divisible by num_heads
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    #[arg(long, default_value_t = 1600)]
    pub num_obj_labels: usize,

    #[arg(long, default_value_t = 400)]
    pub num_attr_labels: usize,
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub common: DataArgs,

    /// Number of training examples to show
    #[arg(long, default_value_t = 3)]
    pub count: usize,
}

impl DataArgs {
    fn apply(self, cfg: &mut PretrainConfig) {
        cfg.train_path      = self.train;
        cfg.valid_path      = self.valid;
        cfg.answers_path    = self.answers;
        cfg.tokenizer_path  = self.tokenizer;
        cfg.vocab_size      = self.vocab_size;
        cfg.valid_topk      = (self.valid_topk > 0).then_some(self.valid_topk);
        cfg.output_dir      = self.output;
        cfg.seed            = self.seed;
        cfg.word_mask_rate  = self.word_mask_rate;
        cfg.obj_mask_rate   = self.obj_mask_rate;
        cfg.max_seq_length  = self.max_seq_length;
        cfg.visual_feat_dim = self.visual_feat_dim;
        cfg.task_matched    = self.task_matched;
    }
}

/// Convert CLI TrainArgs into the application-layer PretrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for PretrainConfig {
    fn from(a: TrainArgs) -> Self {
        let mut cfg = PretrainConfig {
            load:             a.load,
            load_lxmert:      a.load_lxmert,
            multi_gpu:        a.multi_gpu,
            batch_size:       a.batch_size,
            epochs:           a.epochs,
            lr:               a.lr,
            warmup_ratio:     a.warmup_ratio,
            weight_decay:     a.weight_decay,
            grad_clip_norm:   a.grad_clip_norm,
            task_mask_lm:     a.task_mask_lm,
            task_obj_predict: a.task_obj_predict,
            task_qa:          a.task_qa,
            task_qa_woi:      a.task_qa_woi,
            task_va:          a.task_va,
            task_va2:         a.task_va2,
            visual_losses:    a.visual_losses,
            d_model:          a.d_model,
            num_heads:        a.num_heads,
            num_layers:       a.num_layers,
            d_ff:             a.d_ff,
            dropout:          a.dropout,
            num_obj_labels:   a.num_obj_labels,
            num_attr_labels:  a.num_attr_labels,
            ..Default::default()
        };
        a.common.apply(&mut cfg);
        cfg
    }
}

impl From<InspectArgs> for PretrainConfig {
    fn from(a: InspectArgs) -> Self {
        let mut cfg = PretrainConfig::default();
        a.common.apply(&mut cfg);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_config(argv: &[&str]) -> PretrainConfig {
        let argv: Vec<&str> = ["lxmert-pretrain", "train"].into_iter().chain(argv.iter().copied()).collect();
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Train(args) => args.into(),
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        assert_eq!(train_config(&[]), PretrainConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cfg = train_config(&[
            "--train", "a.jsonl",
            "--epochs", "3",
            "--task-matched", "false",
            "--task-va", "true",
            "--valid-topk", "0",
            "--multi-gpu",
            "--load-lxmert", "snap/pretrain/Epoch03",
        ]);
        assert_eq!(cfg.train_path, "a.jsonl");
        assert_eq!(cfg.epochs, 3);
        assert!(!cfg.task_matched);
        assert!(cfg.task_va);
        assert_eq!(cfg.valid_topk, None);
        assert_eq!(cfg.valid_batch_size(), 128);
        assert_eq!(cfg.load_lxmert.as_deref(), Some("snap/pretrain/Epoch03"));
        assert_eq!(cfg.load, None);
    }

    #[test]
    fn test_inspect_parses_count() {
        let cli = Cli::try_parse_from(["lxmert-pretrain", "inspect", "--count", "5"]).unwrap();
        match cli.command {
            Commands::Inspect(args) => {
                assert_eq!(args.count, 5);
                let cfg: PretrainConfig = args.into();
                assert_eq!(cfg.max_seq_length, 20);
            }
            other => panic!("expected inspect, got {other:?}"),
        }
    }
}
