// ============================================================
// Layer 5 — Pre-training Model
// ============================================================
// A compact single-stream vision-language encoder with the
// LXMERT pre-training heads:
//
//   [CLS] w1 .. wS [SEP] pad | v1 .. vN
//   └── token + position ──┘   └── feat proj + box proj
//                 │
//          EncoderBlock × L   (padding masked out)
//                 │
//   ┌─────────────┼───────────────┬──────────────┐
//   lm_head       pooled [CLS]    visual positions
//   (Mask_LM)     ├ matched_head  ├ obj_head   (Obj)
//                 ├ ans_matched   ├ attr_head  (Attr)
//                 └ qa_head (QA)  └ feat_head  (Feat)
//
// Which losses contribute is decided by PretrainTasks. The
// per-task losses are always reported in LOSS_NAMES order,
// zero for a disabled task.

use burn::{
    module::Ignored,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_softmax},
};

use crate::data::batcher::{ChannelBatch, PretrainBatch};

/// Names of the per-task losses, in the order they are reported
pub const LOSS_NAMES: [&str; 6] = ["Mask_LM", "Matched", "Obj", "Attr", "Feat", "QA"];

// ─── Task Flags ───────────────────────────────────────────────────────────────
#[derive(Config, Debug, PartialEq)]
pub struct PretrainTasks {
    #[config(default = true)]
    pub mask_lm:     bool,
    #[config(default = true)]
    pub obj_predict: bool,
    #[config(default = true)]
    pub matched:     bool,
    #[config(default = true)]
    pub qa:          bool,
    #[config(default = false)]
    pub qa_woi:      bool,
    #[config(default = false)]
    pub va:          bool,
    #[config(default = false)]
    pub va2:         bool,
    #[config(default = true)]
    pub obj_loss:    bool,
    #[config(default = true)]
    pub attr_loss:   bool,
    #[config(default = true)]
    pub feat_loss:   bool,
}

// ─── Config ───────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct LxmertLiteConfig {
    pub vocab_size:      usize,
    pub max_seq_len:     usize,
    pub visual_feat_dim: usize,
    pub num_obj_labels:  usize,
    pub num_attr_labels: usize,
    pub num_answers:     usize,
    pub tasks:           PretrainTasks,
    #[config(default = 256)]
    pub d_model:    usize,
    #[config(default = 4)]
    pub num_heads:  usize,
    #[config(default = 4)]
    pub num_layers: usize,
    #[config(default = 1024)]
    pub d_ff:       usize,
    #[config(default = 0.1)]
    pub dropout:    f64,
}

impl LxmertLiteConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LxmertLiteModel<B> {
        let linear = |d_in: usize, d_out: usize| LinearConfig::new(d_in, d_out.max(1)).init(device);

        LxmertLiteModel {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device),
            segment_embedding:  EmbeddingConfig::new(2, self.d_model).init(device),
            feat_proj:   linear(self.visual_feat_dim, self.d_model),
            box_proj:    linear(4, self.d_model),
            visual_norm: LayerNormConfig::new(self.d_model).init(device),
            layers: (0..self.num_layers).map(|_| self.build_encoder_block(device)).collect(),
            final_norm:  LayerNormConfig::new(self.d_model).init(device),
            lm_head:          linear(self.d_model, self.vocab_size),
            matched_head:     linear(self.d_model, 2),
            ans_matched_head: linear(self.d_model, 2),
            obj_head:         linear(self.d_model, self.num_obj_labels),
            attr_head:        linear(self.d_model, self.num_attr_labels),
            feat_head:        linear(self.d_model, self.visual_feat_dim),
            qa_head:          linear(self.d_model, self.num_answers),
            dropout: DropoutConfig::new(self.dropout).init(),
            tasks:   Ignored(self.tasks.clone()),
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

// ─── Encoder Block ────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// x: [batch, len, d_model], pad_mask: [batch, len] (true = padding)
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let input = MhaInput::self_attn(x.clone()).mask_pad(pad_mask);
        let attn_output = self.self_attn.forward(input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LxmertLiteModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub segment_embedding:  Embedding<B>,
    pub feat_proj:          Linear<B>,
    pub box_proj:           Linear<B>,
    pub visual_norm:        LayerNorm<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub matched_head:       Linear<B>,
    pub ans_matched_head:   Linear<B>,
    pub obj_head:           Linear<B>,
    pub attr_head:          Linear<B>,
    pub feat_head:          Linear<B>,
    pub qa_head:            Linear<B>,
    pub dropout:            Dropout,
    pub tasks:              Ignored<PretrainTasks>,
}

/// What one forward pass over a batch produces
pub struct PretrainOutput<B: Backend> {
    /// Sum of the enabled task losses — [1]
    pub loss:          Tensor<B, 1>,
    /// Per-task losses in LOSS_NAMES order — [6]
    pub losses:        Tensor<B, 1>,
    /// QA logits from the primary channel — [batch, num_answers]
    pub answer_logits: Tensor<B, 2>,
}

/// The forward contract the training loop drives.
pub trait PretrainModel<B: Backend> {
    fn forward_pretrain(&self, batch: &PretrainBatch<B>) -> PretrainOutput<B>;
}

impl<B: Backend> LxmertLiteModel<B> {
    /// Apply a saved record but keep this model's own answer head, so a
    /// pretrained encoder can be paired with a different answer table.
    pub fn load_without_answer_head(self, mut record: LxmertLiteModelRecord<B>) -> Self {
        record.qa_head = self.qa_head.clone().into_record();
        tracing::info!("Keeping initialised weights for: qa_head.weight, qa_head.bias");
        self.load_record(record)
    }

    /// Encode one text channel, optionally joined with the image.
    ///
    /// Returns hidden states [batch, seq_len (+ boxes), d_model].
    pub fn encode(
        &self,
        text:   &ChannelBatch<B>,
        visual: Option<(Tensor<B, 3>, Tensor<B, 3>)>,
    ) -> Tensor<B, 3> {
        let [batch_size, seq_len] = text.input_ids.dims();
        let device = text.input_ids.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let lang = self.token_embedding.forward(text.input_ids.clone())
            + self.position_embedding.forward(positions)
            + self.segment_embedding.forward(text.segment_ids.clone());

        let (x, keep) = match visual {
            None => (lang, text.input_mask.clone()),
            Some((feats, boxes)) => {
                let num_boxes = feats.dims()[1];
                let vis = self.visual_norm.forward(
                    self.feat_proj.forward(feats) + self.box_proj.forward(boxes),
                );
                let vis_keep = Tensor::<B, 2, Int>::ones([batch_size, num_boxes], &device);
                (
                    Tensor::cat(vec![lang, vis], 1),
                    Tensor::cat(vec![text.input_mask.clone(), vis_keep], 1),
                )
            }
        };

        let pad_mask = keep.equal_elem(0);
        let mut x = self.dropout.forward(x);
        for layer in &self.layers {
            x = layer.forward(x, pad_mask.clone());
        }
        self.final_norm.forward(x)
    }
}

impl<B: Backend> PretrainModel<B> for LxmertLiteModel<B> {
    fn forward_pretrain(&self, batch: &PretrainBatch<B>) -> PretrainOutput<B> {
        let tasks  = &*self.tasks;
        let device = batch.feats.device();
        let [batch_size, seq_len] = batch.primary.input_ids.dims();
        let [_, num_boxes, _]     = batch.feats.dims();
        let visual = || Some((batch.feats.clone(), batch.boxes.clone()));
        let zero   = || Tensor::<B, 1>::zeros([1], &device);

        // ── Primary channel + image ───────────────────────────────────────────
        let hidden  = self.encode(&batch.primary, visual());
        let d_model = hidden.dims()[2];
        let lang   = hidden.clone().slice([0..batch_size, 0..seq_len, 0..d_model]);
        let vis    = hidden.clone().slice([0..batch_size, seq_len..seq_len + num_boxes, 0..d_model]);
        let cls    = pooled(hidden);

        let answer_logits = self.qa_head.forward(cls.clone());

        // ── Mask_LM ───────────────────────────────────────────────────────────
        let lm_loss = if tasks.mask_lm {
            let logits = self.lm_head.forward(lang);
            let vocab  = logits.dims()[2];
            masked_cross_entropy(
                logits.reshape([batch_size * seq_len, vocab]),
                batch.primary.lm_labels.clone().reshape([batch_size * seq_len]),
            )
        } else {
            zero()
        };

        // ── Matched (sentence / image, answer / image) ────────────────────────
        let mut matched_loss = zero();
        if tasks.matched {
            matched_loss = matched_loss
                + masked_cross_entropy(self.matched_head.forward(cls), batch.is_matched.clone());

            // A replacement sentence that differs from the primary is a negative pair
            let same = batch.primary.input_ids.clone()
                .equal(batch.replaced_sent.input_ids.clone())
                .int()
                .sum_dim(1)
                .equal_elem(seq_len as i64)
                .int()
                .reshape([batch_size]);
            let rps_pooled = pooled(self.encode(&batch.replaced_sent, visual()));
            matched_loss = matched_loss
                + masked_cross_entropy(self.matched_head.forward(rps_pooled), batch.is_matched.clone() * same);
        }
        if tasks.va {
            let ans_pooled = pooled(self.encode(&batch.answer, visual()));
            matched_loss = matched_loss
                + masked_cross_entropy(self.ans_matched_head.forward(ans_pooled), batch.ans_matched.clone());
        }

        // ── Visual losses (only at corrupted boxes) ───────────────────────────
        let (obj_loss, attr_loss, feat_loss) = if tasks.obj_predict {
            let weight = |confs: Tensor<B, 2>| batch.feat_mask.clone() * confs;
            let obj = if tasks.obj_loss {
                weighted_box_cross_entropy(
                    self.obj_head.forward(vis.clone()),
                    batch.obj_labels.clone(),
                    weight(batch.obj_confs.clone()),
                    batch.feat_mask.clone(),
                )
            } else {
                zero()
            };
            let attr = if tasks.attr_loss {
                weighted_box_cross_entropy(
                    self.attr_head.forward(vis.clone()),
                    batch.attr_labels.clone(),
                    weight(batch.attr_confs.clone()),
                    batch.feat_mask.clone(),
                )
            } else {
                zero()
            };
            let feat = if tasks.feat_loss {
                masked_mse(self.feat_head.forward(vis), batch.feat_targets.clone(), batch.feat_mask.clone())
            } else {
                zero()
            };
            (obj, attr, feat)
        } else {
            (zero(), zero(), zero())
        };

        // ── QA ────────────────────────────────────────────────────────────────
        let mut qa_loss = zero();
        if tasks.qa {
            qa_loss = qa_loss + masked_cross_entropy(answer_logits.clone(), batch.ans.clone());
        }
        if tasks.qa_woi {
            let woi_pooled = pooled(self.encode(&batch.primary, None));
            qa_loss = qa_loss + masked_cross_entropy(self.qa_head.forward(woi_pooled), batch.ans.clone());
        }
        if tasks.va2 {
            // Only closed-form replacement answers are QA targets
            let target = batch.replace_ans.clone()
                .mask_fill(batch.ans_rps_type.clone().equal_elem(1).bool_not(), -1);
            let rps_pooled = pooled(self.encode(&batch.replaced_answer, visual()));
            qa_loss = qa_loss + masked_cross_entropy(self.qa_head.forward(rps_pooled), target);
        }

        let losses = Tensor::cat(vec![lm_loss, matched_loss, obj_loss, attr_loss, feat_loss, qa_loss], 0);
        let loss   = losses.clone().sum();

        PretrainOutput { loss, losses, answer_logits }
    }
}

// ─── Loss Helpers ─────────────────────────────────────────────────────────────
/// Hidden state of [CLS]: [batch, len, d] → [batch, d]
fn pooled<B: Backend>(hidden: Tensor<B, 3>) -> Tensor<B, 2> {
    let [batch_size, _, d_model] = hidden.dims();
    hidden.slice([0..batch_size, 0..1, 0..d_model]).reshape([batch_size, d_model])
}

/// Cross-entropy over rows whose target is >= 0; rows with the
/// ignore label -1 contribute nothing. Zero if no row is valid.
///
/// logits: [N, C], targets: [N] → [1]
pub fn masked_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let valid  = targets.clone().greater_equal_elem(0).float();
    let picked = log_softmax(logits, 1)
        .gather(1, targets.clamp_min(0).reshape([n, 1]))
        .reshape([n]);
    (picked * valid.clone()).sum().neg() / valid.sum().clamp_min(1.0)
}

/// Per-box cross-entropy weighted by `weight`, averaged over the
/// boxes flagged in `mask`.
///
/// logits: [B, N, C], labels / weight / mask: [B, N] → [1]
fn weighted_box_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    labels: Tensor<B, 2, Int>,
    weight: Tensor<B, 2>,
    mask:   Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [b, n, _] = logits.dims();
    let valid  = labels.clone().greater_equal_elem(0).float();
    let picked = log_softmax(logits, 2)
        .gather(2, labels.clamp_min(0).reshape([b, n, 1]))
        .reshape([b, n]);
    (picked * weight * valid).sum().neg() / mask.sum().clamp_min(1.0)
}

/// Mean squared error over feature dims, averaged over masked boxes.
///
/// pred / target: [B, N, D], mask: [B, N] → [1]
fn masked_mse<B: Backend>(pred: Tensor<B, 3>, target: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 1> {
    let [b, n, _] = pred.dims();
    let per_box = (pred - target).powf_scalar(2.0).mean_dim(2).reshape([b, n]);
    (per_box * mask.clone()).sum() / mask.sum().clamp_min(1.0)
}
