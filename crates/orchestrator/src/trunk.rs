//! Checked entry point into the transformer trunk.

use crate::backend::TransformerTrunk;
use crate::cache::KVCacheState;
use crate::config::ModelShape;
use crate::error::{OrchestratorError, Result};
use crate::positions::PositionSequence;
use crate::tensor::{CausalMask, HiddenTensor};

/// Runs one trunk call and advances the cache counter by `positions.len()`.
///
/// Every precondition is checked before the backend runs, so a rejected
/// call leaves `state` untouched. `hidden` may carry filler rows after the
/// real ones; see [`TransformerTrunk::forward`].
pub fn step<T>(
    trunk: &T,
    state: &mut KVCacheState<T::Cache>,
    hidden: &HiddenTensor,
    positions: &PositionSequence,
    mask: &CausalMask,
    shape: &ModelShape,
) -> Result<HiddenTensor>
where
    T: TransformerTrunk + ?Sized,
{
    if positions.start() != state.counter() {
        return Err(OrchestratorError::StateDesync {
            cache: state.counter(),
            cursor: positions.start(),
        });
    }
    if positions.is_empty() {
        return Err(OrchestratorError::shape("trunk", "at least one position", 0));
    }
    if positions.end() > shape.context_length {
        return Err(OrchestratorError::ContextOverflow {
            start: positions.start(),
            len: positions.len(),
            context_length: shape.context_length,
        });
    }

    let (batch, rows, hidden_dim) = hidden.dim();
    if batch != 1 || hidden_dim != shape.hidden_dim || rows < positions.len() {
        return Err(OrchestratorError::shape(
            "trunk",
            format!("(1, >= {}, {})", positions.len(), shape.hidden_dim),
            format!("{:?}", hidden.dim()),
        ));
    }
    let expected_mask = (1, 1, rows, shape.context_length);
    if mask.dim() != expected_mask {
        return Err(OrchestratorError::shape(
            "trunk mask",
            format!("{expected_mask:?}"),
            format!("{:?}", mask.dim()),
        ));
    }

    let output = trunk.forward(state.storage_mut(), hidden, positions, mask)?;
    if output.dim() != hidden.dim() {
        return Err(OrchestratorError::shape(
            "trunk output",
            format!("{:?}", hidden.dim()),
            format!("{:?}", output.dim()),
        ));
    }
    state.advance(positions.len());
    Ok(output)
}
