//! Opaque per-session attention cache handle.

use crate::backend::TransformerTrunk;
use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Wraps backend cache memory with the count of committed positions.
///
/// Owned by exactly one session and deliberately not `Clone`: the storage
/// is reachable only through [`crate::trunk::step`], which checks the
/// counter before every call and advances it afterwards.
pub struct KVCacheState<C> {
    id: u64,
    counter: usize,
    storage: C,
}

impl<C> KVCacheState<C> {
    /// Fresh cache from the trunk's factory, counter = 0.
    pub fn create<T>(trunk: &T) -> Result<Self>
    where
        T: TransformerTrunk<Cache = C> + ?Sized,
    {
        let storage = trunk.create_cache()?;
        Ok(Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            counter: 0,
            storage,
        })
    }

    /// Process-unique id, for telling caches apart.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Positions committed so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub(crate) fn storage_mut(&mut self) -> &mut C {
        &mut self.storage
    }

    pub(crate) fn advance(&mut self, committed: usize) {
        self.counter += committed;
    }
}

impl<C> fmt::Debug for KVCacheState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KVCacheState")
            .field("id", &self.id)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::PositionSequence;
    use crate::tensor::{CausalMask, HiddenTensor};

    struct CountingTrunk;

    impl TransformerTrunk for CountingTrunk {
        type Cache = Vec<usize>;

        fn create_cache(&self) -> anyhow::Result<Vec<usize>> {
            Ok(Vec::new())
        }

        fn forward(
            &self,
            cache: &mut Vec<usize>,
            hidden: &HiddenTensor,
            positions: &PositionSequence,
            _mask: &CausalMask,
        ) -> anyhow::Result<HiddenTensor> {
            cache.extend(positions.iter());
            Ok(hidden.clone())
        }
    }

    #[test]
    fn fresh_cache_starts_at_zero() {
        let cache = KVCacheState::create(&CountingTrunk).unwrap();
        assert_eq!(cache.counter(), 0);
        assert!(format!("{cache:?}").contains("counter: 0"));
    }

    #[test]
    fn caches_get_distinct_ids() {
        let a = KVCacheState::create(&CountingTrunk).unwrap();
        let b = KVCacheState::create(&CountingTrunk).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
