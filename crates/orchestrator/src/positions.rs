//! Position bookkeeping for prefill and decode windows.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Prefill,
    Decode,
}

/// Contiguous run of global positions `start..start + len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSequence {
    phase: Phase,
    start: usize,
    len: usize,
}

impl PositionSequence {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last position.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        self.range()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.range().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSequencer {
    context_length: usize,
}

impl PositionSequencer {
    pub fn new(context_length: usize) -> Self {
        Self { context_length }
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    pub fn sequence(
        &self,
        phase: Phase,
        window_start: usize,
        window_len: usize,
    ) -> Result<PositionSequence> {
        if window_len == 0 {
            return Err(OrchestratorError::shape(
                "position sequencer",
                "at least one position",
                0,
            ));
        }
        if phase == Phase::Decode && window_len != 1 {
            return Err(OrchestratorError::shape(
                "position sequencer",
                "decode window of 1",
                window_len,
            ));
        }
        if window_start + window_len > self.context_length {
            return Err(OrchestratorError::ContextOverflow {
                start: window_start,
                len: window_len,
                context_length: self.context_length,
            });
        }
        Ok(PositionSequence {
            phase,
            start: window_start,
            len: window_len,
        })
    }
}
