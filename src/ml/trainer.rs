// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Epoch state machine:
//
//   Init → ( Train epoch → Evaluate epoch → Checkpoint )* → Done
//
// Train epoch:  shuffled batches (incomplete tail dropped)
//               assemble → collate → forward → backward →
//               clip global grad norm → AdamW step at warmup-linear lr
// Evaluate:     fixed-order batches on model.valid() (no autodiff,
//               dropout off); every example counted
// Checkpoint:   BEST_EVAL_LOSS when validation loss beats every
//               earlier epoch, EpochNN unconditionally
//
// Key Burn insight:
//   - Training uses B (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - The validation batcher must also use B::InnerBackend
//   - argmax(1) returns [batch, 1] so we flatten before reading
//
// Masking and answer sampling run inside the loop, so each epoch
// sees a fresh corruption drawn from the run's single RNG.

use anyhow::Result;
use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::Rng;
use std::{collections::HashMap, marker::PhantomData};

use crate::data::{
    answer_table::AnswerTable,
    assembler::ExampleAssembler,
    batcher::{check_uniform_shapes, PretrainBatch, PretrainBatcher},
    dataset::PretrainDataset,
    sampler::{sequential_batches, shuffled_batches, train_batches_per_epoch},
};
use crate::domain::traits::{Evaluator, FeatureSource, Vocabulary};
use crate::infra::{
    checkpoint::{load_model, load_record, BestTracker, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    model::{LxmertLiteConfig, LxmertLiteModel, PretrainModel, PretrainOutput, LOSS_NAMES},
    scheduler::WarmupLinear,
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Optimisation and bookkeeping settings of one run
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub epochs:           usize,
    pub batch_size:       usize,
    pub valid_batch_size: usize,
    pub lr:               f64,
    pub warmup_ratio:     f64,
    pub weight_decay:     f64,
    pub grad_clip_norm:   f64,
    /// Collect and score answer predictions each epoch
    pub task_qa:          bool,
}

/// Everything the loop reads besides the model
pub struct PretrainData<'a, V, P> {
    pub train:      &'a PretrainDataset,
    pub valid:      &'a PretrainDataset,
    pub assembler:  ExampleAssembler<'a, V, P>,
    pub answers:    &'a AnswerTable,
    pub train_eval: &'a dyn Evaluator,
    pub valid_eval: &'a dyn Evaluator,
}

/// Checkpoint prefixes to start from
#[derive(Debug, Clone, Copy, Default)]
pub struct InitWeights<'a> {
    /// Restore every weight
    pub load:        Option<&'a str>,
    /// Restore every weight except the answer head
    pub load_lxmert: Option<&'a str>,
}

impl InitWeights<'_> {
    fn is_empty(&self) -> bool {
        self.load.is_none() && self.load_lxmert.is_none()
    }
}

/// Where the loop writes its results
pub struct LoopOutputs<'a> {
    pub checkpoints: &'a CheckpointManager,
    pub metrics:     &'a MetricsLogger,
}

/// Loss and predictions accumulated over one pass
#[derive(Debug, Default)]
struct PassStats {
    total:       f64,
    per_task:    [f64; LOSS_NAMES.len()],
    batches:     usize,
    predictions: HashMap<String, String>,
}

impl PassStats {
    fn add<B: Backend>(&mut self, out: &PretrainOutput<B>) {
        self.total += out.loss.clone().into_scalar().elem::<f64>();
        for (acc, l) in self.per_task.iter_mut().zip(out.losses.clone().into_data().iter::<f64>()) {
            *acc += l;
        }
        self.batches += 1;
    }

    /// Mean total loss per batch; NaN for an empty pass
    fn mean_loss(&self) -> f64 {
        if self.batches > 0 { self.total / self.batches as f64 } else { f64::NAN }
    }

    fn losses_line(&self) -> String {
        let n = self.batches.max(1) as f64;
        LOSS_NAMES
            .iter()
            .zip(&self.per_task)
            .map(|(name, l)| format!("{name}: {:.4}", l / n))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Argmax answer per example, mapped back to answer strings
fn record_predictions<B: Backend>(
    logits:  Tensor<B, 2>,
    batch:   &PretrainBatch<B>,
    answers: &AnswerTable,
    out:     &mut HashMap<String, String>,
) {
    let predicted = logits.argmax(1).flatten::<1>(0, 1).into_data();
    for (uid, id) in batch.uids.iter().zip(predicted.iter::<i64>()) {
        if let Some(ans) = answers.id2ans(id) {
            out.insert(uid.clone(), ans.to_string());
        }
    }
}

// ─── Gradient clipping ────────────────────────────────────────────────────────

/// Sums the squared gradient of every float parameter.
struct GradNormVisitor<'a, B: AutodiffBackend> {
    grads:   &'a GradientsParams,
    sum_sq:  f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNormVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(g) = self.grads.get::<B::InnerBackend, D>(id) {
            self.sum_sq += g.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

/// Multiplies every float parameter's gradient by `scale`.
struct GradScaleVisitor<'a, B: AutodiffBackend> {
    grads:   &'a mut GradientsParams,
    scale:   f64,
    backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradScaleVisitor<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(g) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register::<B::InnerBackend, D>(id, g.mul_scalar(self.scale));
        }
    }
}

/// Global L2 norm over the gradients of all of `model`'s parameters
pub fn grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(model: &M, grads: &GradientsParams) -> f64 {
    let mut visitor = GradNormVisitor::<B> { grads, sum_sq: 0.0, backend: PhantomData };
    model.visit(&mut visitor);
    visitor.sum_sq.sqrt()
}

/// Scale all gradients together so their global L2 norm is at most
/// `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    model:    &M,
    grads:    &mut GradientsParams,
    max_norm: f64,
) -> f64 {
    let norm = grad_norm::<B, M>(model, grads);
    if norm > max_norm {
        let mut visitor = GradScaleVisitor::<B> { grads, scale: max_norm / norm, backend: PhantomData };
        model.visit(&mut visitor);
    }
    norm
}

/// Build the model and apply the requested checkpoints:
/// `load_lxmert` first, then `load`.
pub fn init_model<B: Backend>(
    model_cfg: &LxmertLiteConfig,
    weights:   &InitWeights<'_>,
    device:    &B::Device,
) -> Result<LxmertLiteModel<B>> {
    let mut model: LxmertLiteModel<B> = model_cfg.init(device);
    if let Some(prefix) = weights.load_lxmert {
        let record = load_record::<B, LxmertLiteModel<B>>(prefix, device)?;
        model = model.load_without_answer_head(record);
    }
    if let Some(prefix) = weights.load {
        model = load_model::<B, _>(model, prefix, device)?;
    }
    Ok(model)
}

/// Train on the default WGPU device.
pub fn run_training<V, P, R>(
    model_cfg: &LxmertLiteConfig,
    weights:   &InitWeights<'_>,
    cfg:       &LoopConfig,
    data:      &PretrainData<'_, V, P>,
    outputs:   &LoopOutputs<'_>,
    rng:       &mut R,
) -> Result<()>
where
    V: Vocabulary,
    P: FeatureSource,
    R: Rng + ?Sized,
{
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);

    let model = init_model::<MyBackend>(model_cfg, weights, &device)?;
    if weights.is_empty() {
        if let Some(epoch) = outputs.checkpoints.latest_epoch()? {
            tracing::warn!(
                "'{}' already holds checkpoints up to epoch {}; they will be overwritten",
                outputs.checkpoints.dir().display(),
                epoch
            );
        }
    }
    tracing::info!(
        "Model ready: {} layers, d_model={}, {} answers",
        model_cfg.num_layers,
        model_cfg.d_model,
        model_cfg.num_answers
    );

    train_loop::<MyBackend, _, _, _, _>(model, cfg, data, outputs, rng, &device)?;
    Ok(())
}

/// Run every epoch and return the final model.
pub fn train_loop<B, M, V, P, R>(
    mut model: M,
    cfg:       &LoopConfig,
    data:      &PretrainData<'_, V, P>,
    outputs:   &LoopOutputs<'_>,
    rng:       &mut R,
    device:    &B::Device,
) -> Result<M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PretrainModel<B>,
    M::InnerModule: PretrainModel<B::InnerBackend>,
    V: Vocabulary,
    P: FeatureSource,
    R: Rng + ?Sized,
{
    // ── Optimiser + schedule ──────────────────────────────────────────────────
    let batch_per_epoch = train_batches_per_epoch(data.train.len(), cfg.batch_size);
    let t_total         = batch_per_epoch * cfg.epochs;
    tracing::info!("Batch per epoch: {}", batch_per_epoch);
    let mut schedule = WarmupLinear::new(cfg.lr, cfg.warmup_ratio, t_total);

    let mut optim = AdamWConfig::new()
        .with_weight_decay(cfg.weight_decay as f32)
        .init();

    let train_batcher = PretrainBatcher::<B>::new(device.clone());
    let valid_batcher = PretrainBatcher::<B::InnerBackend>::new(device.clone());
    let mut best = BestTracker::default();

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {

        // ── Training phase ────────────────────────────────────────────────────
        let mut train = PassStats::default();
        for indices in shuffled_batches(data.train.len(), cfg.batch_size, rng) {
            let bundles = data
                .assembler
                .assemble_batch(indices.iter().map(|&i| data.train.example(i)), rng)?;
            check_uniform_shapes(&bundles)?;
            let batch = train_batcher.batch(bundles);
            let lr    = schedule.current_lr();
            tracing::trace!("Train step | batch={} | lr={:.3e}", batch.batch_size(), lr);

            let out = model.forward_pretrain(&batch);
            train.add(&out);
            if cfg.task_qa {
                record_predictions(out.answer_logits.clone(), &batch, data.answers, &mut train.predictions);
            }

            let grads = out.loss.backward();
            let mut grads = GradientsParams::from_grads(grads, &model);
            let norm = clip_grad_norm::<B, M>(&model, &mut grads, cfg.grad_clip_norm);
            tracing::trace!("Grad norm before clipping: {:.4}", norm);
            model = optim.step(lr, model, grads);
            schedule.step();
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let mut valid   = PassStats::default();
        for indices in sequential_batches(data.valid.len(), cfg.valid_batch_size) {
            let bundles = data
                .assembler
                .assemble_batch(indices.iter().map(|&i| data.valid.example(i)), rng)?;
            check_uniform_shapes(&bundles)?;
            let batch = valid_batcher.batch(bundles);

            let out = model_valid.forward_pretrain(&batch);
            valid.add(&out);
            if cfg.task_qa {
                record_predictions(out.answer_logits, &batch, data.answers, &mut valid.predictions);
            }
        }

        // ── Report ────────────────────────────────────────────────────────────
        let (train_loss, val_loss) = (train.mean_loss(), valid.mean_loss());
        let (train_qa, val_qa) = if cfg.task_qa {
            (
                Some(data.train_eval.evaluate(&train.predictions)),
                Some(data.valid_eval.evaluate(&valid.predictions)),
            )
        } else {
            (None, None)
        };

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4}{}",
            epoch,
            cfg.epochs,
            train_loss,
            val_loss,
            match (train_qa, val_qa) {
                (Some(t), Some(v)) => format!(" | train_qa={:.2}% | val_qa={:.2}%", t * 100.0, v * 100.0),
                _ => String::new(),
            },
        );
        tracing::debug!("Train losses: {}", train.losses_line());
        tracing::debug!("Valid losses: {}", valid.losses_line());

        // ── Checkpoint ────────────────────────────────────────────────────────
        for tag in best.observe(epoch, val_loss) {
            outputs.checkpoints.save_model::<B, M>(&model, tag)?;
        }
        outputs.metrics.log(&EpochMetrics {
            epoch,
            train_loss,
            val_loss,
            train_qa_score: train_qa,
            val_qa_score:   val_qa,
        })?;
    }

    tracing::info!("Training complete! Best validation loss: {:.4}", best.best());
    Ok(model)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        assembler::AssemblerConfig, evaluator::LabelScoreEvaluator, feature_pool::FeaturePool,
    };
    use crate::domain::example::{fixtures::example, LabelDistribution, RawExample};
    use crate::infra::tokenizer_store::fixtures::vocab;
    use crate::ml::model::{tests::tiny_config, PretrainTasks};
    use burn::backend::{Autodiff, NdArray};
    use rand::{rngs::StdRng, SeedableRng};

    type TestBackend = Autodiff<NdArray>;

    fn examples() -> Vec<RawExample> {
        ["a dog runs", "what color is the cat", "the cat runs", "is the dog red"]
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut ex = example(s, 3, 4);
                ex.answer = Some(if i % 2 == 0 { "yes" } else { "red" }.into());
                ex.label  = Some(LabelDistribution::from([((i % 2) as i64, 1.0)]));
                ex
            })
            .collect()
    }

    #[test]
    fn test_two_epochs_write_checkpoints_and_metrics() {
        let dir     = tempfile::tempdir().unwrap();
        let v       = vocab();
        let answers = AnswerTable::new(vec!["yes".into(), "red".into(), "no".into(), "7".into()]);
        let train   = PretrainDataset::new(examples());
        let valid   = PretrainDataset::truncated(examples(), Some(3));
        let pool    = FeaturePool::from_examples(train.examples()).unwrap();
        let train_eval = LabelScoreEvaluator::new(train.examples(), &answers);
        let valid_eval = LabelScoreEvaluator::new(valid.examples(), &answers);

        let asm_cfg = AssemblerConfig {
            max_seq_length: 8,
            word_mask_rate: 0.15,
            obj_mask_rate:  0.15,
            encode_replacement_sent: true,
        };
        let data = PretrainData {
            train:      &train,
            valid:      &valid,
            assembler:  ExampleAssembler::new(asm_cfg, &v, &pool),
            answers:    &answers,
            train_eval: &train_eval,
            valid_eval: &valid_eval,
        };
        let ckpt    = CheckpointManager::new(dir.path()).unwrap();
        let metrics = MetricsLogger::new(dir.path()).unwrap();
        let outputs = LoopOutputs { checkpoints: &ckpt, metrics: &metrics };
        let cfg = LoopConfig {
            epochs:           2,
            batch_size:       2,
            valid_batch_size: 2,
            lr:               1e-3,
            warmup_ratio:     0.05,
            weight_decay:     0.01,
            grad_clip_norm:   1.0,
            task_qa:          true,
        };

        let device = Default::default();
        let model  = tiny_config(PretrainTasks::new()).init::<TestBackend>(&device);
        let mut rng = StdRng::seed_from_u64(9595);
        train_loop::<TestBackend, _, _, _, _>(model, &cfg, &data, &outputs, &mut rng, &device).unwrap();

        assert!(dir.path().join("Epoch01_LXRT.mpk").exists());
        assert!(dir.path().join("Epoch02_LXRT.mpk").exists());
        // first finite validation loss always beats the initial best
        assert!(dir.path().join("BEST_EVAL_LOSS_LXRT.mpk").exists());
        assert_eq!(ckpt.latest_epoch().unwrap(), Some(2));

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), 2);
        let val_loss: f64 = rows[0].split(',').nth(2).unwrap().parse().unwrap();
        assert!(val_loss.is_finite());
    }

    #[derive(Module, Debug)]
    struct TwoParams<B: Backend> {
        a: burn::module::Param<Tensor<B, 1>>,
        b: burn::module::Param<Tensor<B, 1>>,
    }

    /// Gradients [0.8, 0] for `a` and [0, 0.8] for `b`: each norm 0.8, global ≈ 1.1314
    fn two_param_grads() -> (TwoParams<TestBackend>, GradientsParams) {
        let device = Default::default();
        let param  = || burn::module::Param::from_tensor(Tensor::<TestBackend, 1>::zeros([2], &device).require_grad());
        let module = TwoParams { a: param(), b: param() };
        let loss = (module.a.val() * Tensor::from_floats([0.8, 0.0], &device)).sum()
            + (module.b.val() * Tensor::from_floats([0.0, 0.8], &device)).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &module);
        (module, grads)
    }

    #[test]
    fn test_clipping_bounds_the_global_norm() {
        let (module, mut grads) = two_param_grads();
        let before = clip_grad_norm::<TestBackend, _>(&module, &mut grads, 1.0);
        assert!((before - 0.8 * 2f64.sqrt()).abs() < 1e-5);

        let after = grad_norm::<TestBackend, _>(&module, &grads);
        assert!((after - 1.0).abs() < 1e-5, "global norm after clipping = {after}");

        // both gradients shrink by the same factor
        let a: Vec<f32> = grads.get::<NdArray, 1>(module.a.id).unwrap().into_data().iter::<f32>().collect();
        let b: Vec<f32> = grads.get::<NdArray, 1>(module.b.id).unwrap().into_data().iter::<f32>().collect();
        assert!((a[0] - b[1]).abs() < 1e-6);
        assert!((a[0] as f64 - 1.0 / 2f64.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_clipping_leaves_small_gradients_alone() {
        let (module, mut grads) = two_param_grads();
        clip_grad_norm::<TestBackend, _>(&module, &mut grads, 2.0);
        let a: Vec<f32> = grads.get::<NdArray, 1>(module.a.id).unwrap().into_data().iter::<f32>().collect();
        assert!((a[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_init_without_checkpoints_is_fresh() {
        let device = Default::default();
        let model  = init_model::<NdArray>(&tiny_config(PretrainTasks::new()), &InitWeights::default(), &device).unwrap();
        assert_eq!(model.qa_head.weight.dims(), [16, 4]);
        assert!(init_model::<NdArray>(
            &tiny_config(PretrainTasks::new()),
            &InitWeights { load_lxmert: Some("/no/such/Epoch01"), ..Default::default() },
            &device,
        )
        .is_err());
    }

    #[test]
    fn test_pass_stats_average_per_batch() {
        let device = Default::default();
        let out = |loss: f32| PretrainOutput::<NdArray> {
            loss:          Tensor::from_floats([loss], &device),
            losses:        Tensor::from_floats([loss, 0.0, 0.0, 0.0, 0.0, 0.0], &device),
            answer_logits: Tensor::zeros([1, 2], &device),
        };
        let mut stats = PassStats::default();
        assert!(stats.mean_loss().is_nan());
        stats.add(&out(1.0));
        stats.add(&out(3.0));
        assert_eq!(stats.mean_loss(), 2.0);
        assert!(stats.losses_line().starts_with("Mask_LM: 2.0000"));
    }
}
