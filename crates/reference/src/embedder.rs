//! Embedding-table lookup.

use anyhow::{ensure, Result};
use kvforge_kernels::DataType;
use kvforge_orchestrator::{HiddenTensor, Token, TokenEmbedder};
use ndarray::{s, Array2};

pub struct ReferenceEmbedder {
    table: Array2<f32>,
    precision: DataType,
}

impl ReferenceEmbedder {
    pub fn new(table: Array2<f32>, precision: DataType) -> Self {
        Self { table, precision }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.nrows()
    }
}

impl TokenEmbedder for ReferenceEmbedder {
    fn embed(&self, token_ids: &[Token]) -> Result<HiddenTensor> {
        let mut hidden = HiddenTensor::zeros((1, token_ids.len(), self.table.ncols()));
        for (i, &token_id) in token_ids.iter().enumerate() {
            let row = token_id as usize;
            ensure!(
                row < self.table.nrows(),
                "token {} outside embedding table of {}",
                token_id,
                self.table.nrows()
            );
            hidden.slice_mut(s![0, i, ..]).assign(&self.table.row(row));
        }
        self.precision.cast_inplace(&mut hidden);
        Ok(hidden)
    }
}
