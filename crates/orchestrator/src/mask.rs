//! Additive causal attention bias.

use crate::error::{OrchestratorError, Result};
use crate::tensor::CausalMask;
use ndarray::{s, Array4};

/// Builds `[1, 1, window_len, context_length]` bias tensors.
///
/// Row `i` sits at global position `window_start + i` and may see every
/// column `j <= window_start + i`. The same rule covers prefill windows and
/// single-row decode steps.
#[derive(Debug, Clone, Copy)]
pub struct CausalMaskBuilder {
    forbidden: f32,
}

impl Default for CausalMaskBuilder {
    fn default() -> Self {
        Self {
            forbidden: f32::NEG_INFINITY,
        }
    }
}

impl CausalMaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a finite sentinel for backends that reject infinities.
    pub fn with_sentinel(forbidden: f32) -> Self {
        Self { forbidden }
    }

    pub fn sentinel(&self) -> f32 {
        self.forbidden
    }

    pub fn build(
        &self,
        window_start: usize,
        window_len: usize,
        context_length: usize,
    ) -> Result<CausalMask> {
        if window_len == 0 || context_length == 0 {
            return Err(OrchestratorError::shape(
                "causal mask",
                "non-empty window and context",
                format!("window {window_len}, context {context_length}"),
            ));
        }

        let mut mask =
            Array4::<f32>::from_elem((1, 1, window_len, context_length), self.forbidden);
        for row in 0..window_len {
            let visible = (window_start + row + 1).min(context_length);
            mask.slice_mut(s![0, 0, row, ..visible]).fill(0.0);
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permitted(mask: &CausalMask, row: usize) -> Vec<usize> {
        let ctx = mask.dim().3;
        (0..ctx).filter(|&j| mask[[0, 0, row, j]] == 0.0).collect()
    }

    #[test]
    fn decode_row_uses_global_position() {
        let mask = CausalMaskBuilder::new().build(5, 1, 8).unwrap();
        assert_eq!(mask.dim(), (1, 1, 1, 8));
        assert_eq!(permitted(&mask, 0), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mask[[0, 0, 0, 6]], f32::NEG_INFINITY);
    }

    #[test]
    fn prefill_window_is_lower_triangular_from_start() {
        let mask = CausalMaskBuilder::new().build(4, 3, 10).unwrap();
        assert_eq!(permitted(&mask, 0), (0..=4).collect::<Vec<_>>());
        assert_eq!(permitted(&mask, 1), (0..=5).collect::<Vec<_>>());
        assert_eq!(permitted(&mask, 2), (0..=6).collect::<Vec<_>>());
    }

    #[test]
    fn rows_past_the_context_see_everything() {
        let mask = CausalMaskBuilder::new().build(6, 4, 8).unwrap();
        assert_eq!(permitted(&mask, 3).len(), 8);
    }

    #[test]
    fn finite_sentinel() {
        let mask = CausalMaskBuilder::with_sentinel(-1e4).build(0, 2, 4).unwrap();
        assert_eq!(mask[[0, 0, 0, 1]], -1e4);
        assert_eq!(mask[[0, 0, 1, 1]], 0.0);
    }

    #[test]
    fn empty_window_is_rejected() {
        assert!(CausalMaskBuilder::new().build(0, 0, 8).is_err());
    }
}
