//! Reassembly of vocabulary shards into one ordered logits vector.

use crate::config::ModelShape;
use crate::error::{OrchestratorError, Result};
use crate::tensor::{Logits, ShardMap};
use ndarray::Array1;

/// Concatenates shards `1..=num_shards` in ascending order, so that
/// `logits[k]` comes from shard `k / shard_size + 1` at offset
/// `k % shard_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogitsAssembler {
    num_shards: usize,
    shard_size: usize,
}

impl LogitsAssembler {
    pub fn new(num_shards: usize, shard_size: usize) -> Self {
        Self {
            num_shards,
            shard_size,
        }
    }

    pub fn for_shape(shape: &ModelShape) -> Self {
        Self::new(shape.num_shards, shape.shard_size)
    }

    pub fn vocab_size(&self) -> usize {
        self.num_shards * self.shard_size
    }

    /// Shard index (1-based) and offset holding vocabulary entry `token`.
    pub fn locate(&self, token: usize) -> (usize, usize) {
        (token / self.shard_size + 1, token % self.shard_size)
    }

    pub fn assemble(&self, shards: &ShardMap) -> Result<Logits> {
        if let Some(&index) = shards
            .keys()
            .find(|&&index| index == 0 || index > self.num_shards)
        {
            return Err(OrchestratorError::shape(
                "logits assembler",
                format!("shard index in 1..={}", self.num_shards),
                index,
            ));
        }

        let mut logits = Vec::with_capacity(self.vocab_size());
        for index in 1..=self.num_shards {
            let shard = shards.get(&index).ok_or(OrchestratorError::ShardMissing {
                index,
                expected: self.num_shards,
            })?;
            if shard.dim() != (1, 1, self.shard_size) {
                return Err(OrchestratorError::shape(
                    "logits assembler",
                    format!("shard {index} of shape (1, 1, {})", self.shard_size),
                    format!("{:?}", shard.dim()),
                ));
            }
            logits.extend(shard.iter().copied());
        }
        Ok(Array1::from_vec(logits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::VocabShard;
    use proptest::prelude::*;

    fn labelled_shards(num_shards: usize, shard_size: usize) -> ShardMap {
        (1..=num_shards)
            .map(|index| {
                let shard = VocabShard::from_shape_fn((1, 1, shard_size), |(_, _, local)| {
                    (index * 1000 + local) as f32
                });
                (index, shard)
            })
            .collect()
    }

    #[test]
    fn concatenates_in_ascending_order() {
        let assembler = LogitsAssembler::new(3, 2);
        let logits = assembler.assemble(&labelled_shards(3, 2)).unwrap();
        assert_eq!(
            logits.to_vec(),
            vec![1000.0, 1001.0, 2000.0, 2001.0, 3000.0, 3001.0]
        );
        assert_eq!(assembler.locate(3), (2, 1));
    }

    #[test]
    fn missing_shard_is_reported() {
        let assembler = LogitsAssembler::new(4, 3);
        let mut shards = labelled_shards(4, 3);
        shards.remove(&3);
        assert!(matches!(
            assembler.assemble(&shards),
            Err(OrchestratorError::ShardMissing {
                index: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn wrong_shard_size_is_a_shape_mismatch() {
        let assembler = LogitsAssembler::new(2, 4);
        let mut shards = labelled_shards(2, 4);
        shards.insert(2, VocabShard::zeros((1, 1, 3)));
        assert!(matches!(
            assembler.assemble(&shards),
            Err(OrchestratorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn unexpected_shard_index_is_rejected() {
        let assembler = LogitsAssembler::new(2, 4);
        let mut shards = labelled_shards(2, 4);
        shards.insert(0, VocabShard::zeros((1, 1, 4)));
        assert!(assembler.assemble(&shards).is_err());
    }

    proptest! {
        #[test]
        fn assembled_index_matches_shard_layout(
            num_shards in 1usize..12,
            shard_size in 1usize..64,
        ) {
            let assembler = LogitsAssembler::new(num_shards, shard_size);
            let shards = labelled_shards(num_shards, shard_size);
            let logits = assembler.assemble(&shards).unwrap();
            prop_assert_eq!(logits.len(), num_shards * shard_size);
            for (k, value) in logits.iter().enumerate() {
                let (index, local) = assembler.locate(k);
                prop_assert_eq!(*value, shards[&index][[0, 0, local]]);
            }
        }
    }
}
