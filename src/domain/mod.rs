// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums, and traits that define the core
// concepts of vision-language pre-training.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain data and the traits other layers implement
//
// The two central types:
//   RawExample    — one (sentence, answer, image) record as
//                   the dataset hands it over; immutable
//   FeatureBundle — the same record after masking, encoding,
//                   and answer sampling; consumed once by the
//                   model forward pass and then dropped

// Raw input record with its visual features and soft labels
pub mod example;

// Encoded text channels and the assembled feature bundle
pub mod features;

// Vocabulary, feature pool, evaluator, and example source traits
pub mod traits;
