//! kvforge: phase-aware decode orchestration for language models compiled
//! as separate embedder, trunk and sharded-head modules.
//!
//! - [`orchestrator`] holds the session state machine and the stateless stages.
//! - [`reference`] is a deterministic software backend.
//! - [`kernels`] holds the numeric primitives the reference backend is built from.

pub use kvforge_kernels as kernels;
pub use kvforge_orchestrator as orchestrator;
pub use kvforge_reference as reference;

pub use kvforge_orchestrator::{
    DecodeOrchestrator, GenerationConfig, ModelShape, OrchestratorError, SamplerConfig,
    SessionHandle, StepOutcome, TerminationReason, Token,
};
pub use kvforge_reference::{ReferenceConfig, ReferenceLoader};
