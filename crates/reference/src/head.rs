//! Final norm plus an LM head emitted as fixed-size vocabulary shards.

use anyhow::{ensure, Result};
use kvforge_kernels::{DataType, LayerNorm};
use kvforge_orchestrator::{HiddenTensor, ShardMap, VocabHead};
use ndarray::{s, Array2, Axis};

pub struct ReferenceHead {
    final_norm: LayerNorm,
    /// (hidden_dim, vocab_size)
    lm_head: Array2<f32>,
    shard_size: usize,
    precision: DataType,
}

impl ReferenceHead {
    pub fn new(
        final_norm: LayerNorm,
        lm_head: Array2<f32>,
        shard_size: usize,
        precision: DataType,
    ) -> Result<Self> {
        ensure!(shard_size > 0, "shard size must be non-zero");
        ensure!(
            lm_head.ncols() % shard_size == 0,
            "vocab {} is not a multiple of shard size {}",
            lm_head.ncols(),
            shard_size
        );
        Ok(Self {
            final_norm,
            lm_head,
            shard_size,
            precision,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.lm_head.ncols() / self.shard_size
    }
}

impl VocabHead for ReferenceHead {
    fn project(&self, hidden: &HiddenTensor) -> Result<ShardMap> {
        ensure!(
            hidden.dim() == (1, 1, self.lm_head.nrows()),
            "head expects (1, 1, {}), got {:?}",
            self.lm_head.nrows(),
            hidden.dim()
        );
        let normed = self.final_norm.forward(hidden.index_axis(Axis(0), 0))?;

        let mut shards = ShardMap::new();
        for index in 1..=self.num_shards() {
            let cols = (index - 1) * self.shard_size..index * self.shard_size;
            let mut logits = normed.dot(&self.lm_head.slice(s![.., cols]));
            self.precision.cast_inplace(&mut logits);
            shards.insert(index, logits.insert_axis(Axis(0)));
        }
        Ok(shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn shards_are_column_blocks_of_the_head() {
        let lm_head = Array2::from_shape_fn((4, 6), |(i, j)| (i as f32 - 1.5) * (j as f32 + 1.0));
        let norm = LayerNorm::identity(4, 1e-5);
        let head = ReferenceHead::new(norm, lm_head.clone(), 2, DataType::F32).unwrap();
        let hidden = HiddenTensor::from_shape_vec((1, 1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let shards = head.project(&hidden).unwrap();
        assert_eq!(shards.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);

        let normed = head
            .final_norm
            .forward(hidden.index_axis(Axis(0), 0))
            .unwrap();
        let full = normed.dot(&lm_head);
        for (index, shard) in &shards {
            assert_eq!(shard.dim(), (1, 1, 2));
            for local in 0..2 {
                assert_abs_diff_eq!(
                    shard[[0, 0, local]],
                    full[[0, (index - 1) * 2 + local]],
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn rejects_uneven_vocab() {
        let lm_head = Array2::<f32>::zeros((4, 7));
        let norm = LayerNorm::identity(4, 1e-5);
        assert!(ReferenceHead::new(norm, lm_head, 2, DataType::F32).is_err());
    }
}
