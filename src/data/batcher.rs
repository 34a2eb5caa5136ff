// ============================================================
// Layer 4 — Pre-training Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<FeatureBundle>
// into device tensors.
//
// Every field is flattened across the batch, then reshaped:
//
//   text channels   [batch, seq_len]          Int
//   visual feats    [batch, boxes, feat_dim]  Float
//   boxes           [batch, boxes, 4]         Float
//   box labels      [batch, boxes]            Int / Float
//   example labels  [batch]                   Int
//
// Stacking needs every bundle to share seq_len, box count and
// feature dim. check_uniform_shapes verifies that first and
// reports the offending field; batch() itself assumes it holds.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::features::{EncodedChannel, FeatureBundle};
use crate::error::{PretrainError, PretrainResult};

// ─── ChannelBatch ─────────────────────────────────────────────────────────────
/// One text channel for the whole batch. All tensors [batch, seq_len].
#[derive(Debug, Clone)]
pub struct ChannelBatch<B: Backend> {
    pub input_ids:   Tensor<B, 2, Int>,
    /// 1 = real token, 0 = padding
    pub input_mask:  Tensor<B, 2, Int>,
    pub segment_ids: Tensor<B, 2, Int>,
    /// Masked-LM targets, -1 where ignored
    pub lm_labels:   Tensor<B, 2, Int>,
}

// ─── PretrainBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct PretrainBatch<B: Backend> {
    /// Example uids in batch order, for answer-prediction lookup
    pub uids: Vec<String>,

    pub primary:         ChannelBatch<B>,
    pub replaced_sent:   ChannelBatch<B>,
    pub answer:          ChannelBatch<B>,
    pub replaced_answer: ChannelBatch<B>,

    /// Corrupted features — [batch, boxes, feat_dim]
    pub feats: Tensor<B, 3>,
    /// [batch, boxes, 4]
    pub boxes: Tensor<B, 3>,

    /// [batch, boxes]
    pub obj_labels:  Tensor<B, 2, Int>,
    pub obj_confs:   Tensor<B, 2>,
    pub attr_labels: Tensor<B, 2, Int>,
    pub attr_confs:  Tensor<B, 2>,
    /// Uncorrupted features — [batch, boxes, feat_dim]
    pub feat_targets: Tensor<B, 3>,
    /// 1.0 where a box was corrupted — [batch, boxes]
    pub feat_mask:    Tensor<B, 2>,

    /// [batch]
    pub is_matched:   Tensor<B, 1, Int>,
    pub ans_matched:  Tensor<B, 1, Int>,
    pub ans:          Tensor<B, 1, Int>,
    pub replace_ans:  Tensor<B, 1, Int>,
    pub ans_type:     Tensor<B, 1, Int>,
    pub ans_rps_type: Tensor<B, 1, Int>,
}

impl<B: Backend> PretrainBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.uids.len()
    }
}

/// Verify that a set of bundles can be stacked into one batch.
pub fn check_uniform_shapes(items: &[FeatureBundle]) -> PretrainResult<()> {
    let Some(first) = items.first() else {
        return Err(PretrainError::ShapeMismatch {
            what:     "batch size".to_string(),
            expected: 1,
            found:    0,
        });
    };

    let reference = [
        ("sequence length", first.seq_len()),
        ("box count",       first.num_boxes()),
        ("feature dim",     first.feat_dim()),
    ];
    for item in &items[1..] {
        let found = [item.seq_len(), item.num_boxes(), item.feat_dim()];
        for ((what, expected), found) in reference.iter().zip(found) {
            if *expected != found {
                return Err(PretrainError::ShapeMismatch {
                    what:     format!("{what} of '{}'", item.uid),
                    expected: *expected,
                    found,
                });
            }
        }
    }
    Ok(())
}

// ─── PretrainBatcher ──────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct PretrainBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> PretrainBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn ints<const D: usize>(&self, values: Vec<i32>, shape: [usize; D]) -> Tensor<B, D, Int> {
        Tensor::<B, 1, Int>::from_ints(values.as_slice(), &self.device).reshape(shape)
    }

    fn floats<const D: usize>(&self, values: Vec<f32>, shape: [usize; D]) -> Tensor<B, D> {
        Tensor::<B, 1>::from_floats(values.as_slice(), &self.device).reshape(shape)
    }

    fn channel<'a>(
        &self,
        channels: impl Iterator<Item = &'a EncodedChannel> + Clone,
        shape:    [usize; 2],
    ) -> ChannelBatch<B> {
        let flat = |f: fn(&EncodedChannel) -> Vec<i32>| -> Vec<i32> {
            channels.clone().flat_map(f).collect()
        };
        ChannelBatch {
            input_ids:   self.ints(flat(|c| c.input_ids.iter().map(|&x| x as i32).collect()), shape),
            input_mask:  self.ints(flat(|c| c.input_mask.iter().map(|&x| x as i32).collect()), shape),
            segment_ids: self.ints(flat(|c| c.segment_ids.iter().map(|&x| x as i32).collect()), shape),
            lm_labels:   self.ints(flat(|c| c.lm_label_ids.iter().map(|&x| x as i32).collect()), shape),
        }
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<FeatureBundle, PretrainBatch<B>> for PretrainBatcher<B> {
    /// Stack bundles into tensors. Shapes must already be uniform
    /// (see check_uniform_shapes).
    fn batch(&self, items: Vec<FeatureBundle>) -> PretrainBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].seq_len();
        let num_boxes  = items[0].num_boxes();
        let feat_dim   = items[0].feat_dim();

        let seq_shape  = [batch_size, seq_len];
        let box_shape  = [batch_size, num_boxes];
        let feat_shape = [batch_size, num_boxes, feat_dim];

        // ── Text channels ─────────────────────────────────────────────────────
        let primary         = self.channel(items.iter().map(|b| &b.channels.primary), seq_shape);
        let replaced_sent   = self.channel(items.iter().map(|b| &b.channels.replaced_sent), seq_shape);
        let answer          = self.channel(items.iter().map(|b| &b.channels.answer), seq_shape);
        let replaced_answer = self.channel(items.iter().map(|b| &b.channels.replaced_answer), seq_shape);

        // ── Visual inputs and labels ──────────────────────────────────────────
        let feats: Vec<f32> = items.iter().flat_map(|b| b.masked_feats.iter().flatten().copied()).collect();
        let targets: Vec<f32> = items.iter().flat_map(|b| b.feat_targets.iter().flatten().copied()).collect();
        let boxes: Vec<f32> = items.iter().flat_map(|b| b.boxes.iter().flatten().copied()).collect();
        let feat_mask: Vec<f32> = items.iter().flat_map(|b| b.feat_mask.iter().copied()).collect();

        let obj_labels: Vec<i32> = items.iter().flat_map(|b| b.obj_labels.labels.iter().map(|&l| l as i32)).collect();
        let obj_confs: Vec<f32> = items.iter().flat_map(|b| b.obj_labels.confs.iter().copied()).collect();
        let attr_labels: Vec<i32> = items.iter().flat_map(|b| b.attr_labels.labels.iter().map(|&l| l as i32)).collect();
        let attr_confs: Vec<f32> = items.iter().flat_map(|b| b.attr_labels.confs.iter().copied()).collect();

        // ── Per-example labels ────────────────────────────────────────────────
        let per_example = |f: fn(&FeatureBundle) -> i32| -> Tensor<B, 1, Int> {
            self.ints(items.iter().map(f).collect(), [batch_size])
        };

        PretrainBatch {
            uids: items.iter().map(|b| b.uid.clone()).collect(),
            primary,
            replaced_sent,
            answer,
            replaced_answer,
            feats:        self.floats(feats, feat_shape),
            boxes:        self.floats(boxes, [batch_size, num_boxes, 4]),
            obj_labels:   self.ints(obj_labels, box_shape),
            obj_confs:    self.floats(obj_confs, box_shape),
            attr_labels:  self.ints(attr_labels, box_shape),
            attr_confs:   self.floats(attr_confs, box_shape),
            feat_targets: self.floats(targets, feat_shape),
            feat_mask:    self.floats(feat_mask, box_shape),
            is_matched:   per_example(|b| i32::from(b.is_matched)),
            ans_matched:  per_example(|b| i32::from(b.ans_matched)),
            ans:          per_example(|b| b.ans as i32),
            replace_ans:  per_example(|b| b.replace_ans as i32),
            ans_type:     per_example(|b| i32::from(b.ans_type)),
            ans_rps_type: per_example(|b| i32::from(b.ans_rps_type)),
        }
    }
}
