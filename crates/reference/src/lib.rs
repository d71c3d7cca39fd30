//! Deterministic pure-software backend for the kvforge orchestrator.
//!
//! Implements the embedder, trunk and sharded vocab head with `ndarray`, so
//! sessions can run end to end without an accelerator. Weights are random
//! but seeded, and every stage is bit-reproducible.

pub mod cache;
pub mod config;
pub mod embedder;
pub mod head;
pub mod loader;
pub mod rope;
pub mod trunk;
pub mod weights;

pub use cache::SlotCache;
pub use config::ReferenceConfig;
pub use embedder::ReferenceEmbedder;
pub use head::ReferenceHead;
pub use loader::{ReferenceLoader, ReferenceModel};
pub use trunk::ReferenceTrunk;
pub use weights::ReferenceWeights;
