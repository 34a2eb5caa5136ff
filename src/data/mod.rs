// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from JSON-lines records to device tensors.
//
//   dataset.jsonl
//       │
//       ▼
//   JsonlLoader        → RawDatum → RawExample (labels → AnswerIds)
//       │
//       ▼
//   PretrainDataset    → in-memory split (optional top-k)
//       │
//       ▼
//   sampler            → shuffled / sequential index batches
//       │
//       ▼
//   ExampleAssembler   → masking + encoding + answer sampling
//       │                 (4 text channels, 1 visual channel)
//       ▼
//   PretrainBatcher    → stacks FeatureBundles into tensors
//
// Each module is responsible for exactly one step and is
// tested on its own.

/// Reads JSON-lines datasets into RawExamples
pub mod loader;

/// Answer string ↔ AnswerId mapping
pub mod answer_table;

/// Corpus-wide pool of visual feature vectors
pub mod feature_pool;

/// Implements Burn's Dataset trait for raw examples
pub mod dataset;

/// Epoch batch order (shuffled for training, fixed for evaluation)
pub mod sampler;

/// BERT-style token / feature corruption
pub mod masking;

/// Truncate, mask, frame and pad one text channel
pub mod encoder;

/// Soft label → hard answer id, answer-type flag
pub mod answer;

/// RawExample → FeatureBundle
pub mod assembler;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Mean soft-label score of QA predictions
pub mod evaluator;
