// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (pre-training or inspecting the pipeline).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination and run configuration
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The pre-training workflow and its configuration
pub mod pretrain_use_case;

// Feature-pipeline inspection for debugging
pub mod inspect_use_case;
