//! Generation session: the aggregate owning one cache and one cursor.

use crate::cache::KVCacheState;
use crate::cancellation::{CancellationHandle, CancellationToken};
use crate::config::GenerationConfig;
use crate::error::{OrchestratorError, Result};
use crate::metrics::GenerationMetrics;
use crate::positions::Phase;
use crate::sampler::Sampler;
use crate::tensor::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    StopToken(Token),
    MaxTokens,
    ContextOverflow,
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::StopToken(token) => write!(f, "stop token {token}"),
            TerminationReason::MaxTokens => f.write_str("max new tokens"),
            TerminationReason::ContextOverflow => f.write_str("context exhausted"),
            TerminationReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Prefilling,
    Decoding,
    Terminated(TerminationReason),
    /// Absorbing; the session has to be recreated.
    Error,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Terminated(_) | SessionState::Error)
    }
}

/// Caller-side reference to a session owned by a `DecodeOrchestrator`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) owner: u64,
    pub(crate) id: SessionId,
    pub(crate) cancel: CancellationHandle,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Requests cancellation; observed before the next step starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }
}

pub struct GenerationSession<C> {
    id: SessionId,
    state: SessionState,
    phase: Phase,
    context: Vec<Token>,
    prompt_len: usize,
    cursor: usize,
    cache: Option<KVCacheState<C>>,
    pub(crate) sampler: Box<dyn Sampler + Send>,
    config: GenerationConfig,
    cancel: CancellationToken,
    pub(crate) metrics: GenerationMetrics,
}

impl<C> GenerationSession<C> {
    pub(crate) fn new(
        id: SessionId,
        prompt: Vec<Token>,
        cache: KVCacheState<C>,
        sampler: Box<dyn Sampler + Send>,
        config: GenerationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let prompt_len = prompt.len();
        Self {
            id,
            state: SessionState::Init,
            phase: Phase::Prefill,
            context: prompt,
            prompt_len,
            cursor: 0,
            cache: Some(cache),
            sampler,
            config,
            cancel,
            metrics: GenerationMetrics {
                prompt_tokens: prompt_len,
                ..GenerationMetrics::default()
            },
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Prompt followed by every emitted token.
    pub fn context(&self) -> &[Token] {
        &self.context
    }

    pub fn prompt(&self) -> &[Token] {
        &self.context[..self.prompt_len]
    }

    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    pub fn generated(&self) -> &[Token] {
        &self.context[self.prompt_len..]
    }

    /// Number of positions committed to the cache.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// `None` once the cache has been released.
    pub fn cache_counter(&self) -> Option<usize> {
        self.cache.as_ref().map(KVCacheState::counter)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn metrics(&self) -> &GenerationMetrics {
        &self.metrics
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The emitted token not yet committed, fed to the next decode step.
    pub(crate) fn pending_token(&self) -> Option<Token> {
        self.context.get(self.cursor).copied()
    }

    /// Borrows the cache after checking it against the cursor.
    pub(crate) fn synced_cache(&mut self) -> Result<&mut KVCacheState<C>> {
        let cursor = self.cursor;
        let cache = self
            .cache
            .as_mut()
            .ok_or(OrchestratorError::SessionPoisoned(self.id))?;
        if cache.counter() != cursor {
            return Err(OrchestratorError::StateDesync {
                cache: cache.counter(),
                cursor,
            });
        }
        Ok(cache)
    }

    pub(crate) fn enter_prefill(&mut self) {
        debug_assert_eq!(self.state, SessionState::Init);
        self.state = SessionState::Prefilling;
    }

    /// The one and only `Prefill -> Decode` transition.
    pub(crate) fn enter_decode(&mut self) {
        debug_assert_eq!(self.phase, Phase::Prefill);
        debug_assert_eq!(self.cursor, self.prompt_len);
        self.phase = Phase::Decode;
        self.state = SessionState::Decoding;
    }

    pub(crate) fn commit(&mut self, positions: usize) {
        self.cursor += positions;
    }

    pub(crate) fn push_token(&mut self, token: Token) {
        self.context.push(token);
        self.metrics.tokens_generated += 1;
    }

    pub(crate) fn terminate(&mut self, reason: TerminationReason) {
        self.state = SessionState::Terminated(reason);
        self.cache = None;
    }

    pub(crate) fn fail(&mut self) {
        self.state = SessionState::Error;
        self.cache = None;
    }
}

impl<C> fmt::Debug for GenerationSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("prompt_len", &self.prompt_len)
            .field("cursor", &self.cursor)
            .field("context_len", &self.context.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// What remains of a session after `end_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub prompt_len: usize,
    pub context: Vec<Token>,
    pub termination: Option<TerminationReason>,
    pub metrics: GenerationMetrics,
}

impl SessionSummary {
    pub(crate) fn from_session<C>(session: &GenerationSession<C>) -> Self {
        let termination = match session.state() {
            SessionState::Terminated(reason) => Some(reason),
            _ => None,
        };
        Self {
            id: session.id(),
            prompt_len: session.prompt_len(),
            context: session.context().to_vec(),
            termination,
            metrics: session.metrics().clone(),
        }
    }

    pub fn generated(&self) -> &[Token] {
        &self.context[self.prompt_len..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TransformerTrunk;
    use crate::positions::PositionSequence;
    use crate::sampler::SamplerConfig;
    use crate::tensor::{CausalMask, HiddenTensor};

    struct NullTrunk;

    impl TransformerTrunk for NullTrunk {
        type Cache = ();

        fn create_cache(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn forward(
            &self,
            _cache: &mut (),
            hidden: &HiddenTensor,
            _positions: &PositionSequence,
            _mask: &CausalMask,
        ) -> anyhow::Result<HiddenTensor> {
            Ok(hidden.clone())
        }
    }

    fn session(prompt: Vec<Token>) -> GenerationSession<()> {
        let cache = KVCacheState::create(&NullTrunk).unwrap();
        let sampler = SamplerConfig::Greedy.build(0).unwrap();
        let (token, _handle) = CancellationToken::new();
        GenerationSession::new(
            7,
            prompt,
            cache,
            Box::new(sampler),
            GenerationConfig::greedy(),
            token,
        )
    }

    #[test]
    fn new_session_starts_in_prefill() {
        let session = session(vec![5, 6, 7]);
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(session.phase(), Phase::Prefill);
        assert_eq!(session.cursor(), 0);
        assert_eq!(session.cache_counter(), Some(0));
        assert_eq!(session.prompt(), &[5, 6, 7]);
        assert!(session.generated().is_empty());
        assert_eq!(session.metrics().prompt_tokens, 3);
    }

    #[test]
    fn pending_token_follows_cursor() {
        let mut session = session(vec![1, 2]);
        session.enter_prefill();
        session.commit(2);
        assert_eq!(session.pending_token(), None);
        session.enter_decode();
        session.push_token(9);
        assert_eq!(session.pending_token(), Some(9));
        assert_eq!(session.generated(), &[9]);
        assert_eq!(session.phase(), Phase::Decode);
    }

    #[test]
    fn desync_is_detected() {
        let mut session = session(vec![1, 2]);
        session.commit(1);
        assert!(matches!(
            session.synced_cache(),
            Err(OrchestratorError::StateDesync {
                cache: 0,
                cursor: 1
            })
        ));
    }

    #[test]
    fn termination_releases_cache() {
        let mut session = session(vec![1]);
        session.terminate(TerminationReason::Cancelled);
        assert_eq!(session.cache_counter(), None);
        assert!(session.state().is_finished());
        let summary = SessionSummary::from_session(&session);
        assert_eq!(summary.termination, Some(TerminationReason::Cancelled));
    }
}
