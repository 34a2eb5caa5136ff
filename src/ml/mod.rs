// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Burn-specific code for the pre-training model and its loop.
// The data layer hands over PretrainBatch tensors; everything
// after that (forward, losses, optimiser, schedule) lives here.
//
//   model.rs     — LXMERT-lite encoder
//                  • token + position + segment embeddings
//                  • projected region features and boxes
//                  • pre-norm transformer blocks over the
//                    joint text + vision sequence
//                  • one head per pre-training task
//                    (masked LM, match, obj / attr / feat, QA)
//
//   scheduler.rs — Warmup-linear learning-rate schedule
//
//   trainer.rs   — The epoch loop
//                  Assembles batches with the run RNG, steps
//                  AdamW, evaluates, writes checkpoints and
//                  metrics
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Tan & Bansal (2019) LXMERT

/// Multi-task vision-language encoder
pub mod model;

/// BERT warmup-linear learning-rate schedule
pub mod scheduler;

/// Training loop with validation and checkpointing
pub mod trainer;
