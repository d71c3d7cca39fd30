//! Top-level prefill/decode state machine.
//!
//! `Init -> Prefilling -> Decoding -> Terminated`, with `Error` reachable
//! from any of them. The prompt is committed in windows of the model's batch
//! width; the last window is padded with the filler token. Decoding then
//! feeds one pending token per step, commits it and samples the next one.

use crate::backend::{embed_tokens, project_logits, ModelBackend, TransformerTrunk};
use crate::cache::KVCacheState;
use crate::cancellation::CancellationToken;
use crate::config::GenerationConfig;
use crate::error::{OrchestratorError, Result};
use crate::logits::LogitsAssembler;
use crate::mask::CausalMaskBuilder;
use crate::metrics::GenerationMetrics;
use crate::positions::{Phase, PositionSequencer};
use crate::sampler::Sampler;
use crate::session::{
    GenerationSession, SessionHandle, SessionId, SessionState, SessionSummary, TerminationReason,
};
use crate::tensor::{HiddenTensor, Token};
use crate::trunk;
use ndarray::s;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

static NEXT_ORCHESTRATOR_ID: AtomicU64 = AtomicU64::new(1);

type CacheOf<B> = <<B as ModelBackend>::Trunk as TransformerTrunk>::Cache;

/// Result of driving a session by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Token(Token),
    Finished(TerminationReason),
}

/// Output of a complete [`DecodeOrchestrator::generate`] run.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub tokens: Vec<Token>,
    pub termination: TerminationReason,
    pub metrics: GenerationMetrics,
}

/// The stateless stages, derived once from the model shape.
#[derive(Debug, Clone, Copy)]
struct Stages {
    sequencer: PositionSequencer,
    masks: CausalMaskBuilder,
    assembler: LogitsAssembler,
}

/// Drives any number of independent sessions against one loaded model.
///
/// Sessions live in an arena keyed by id; callers only hold handles. Each
/// session exclusively owns its cache, so several orchestrators may share one
/// `Arc` backend across threads.
pub struct DecodeOrchestrator<B: ModelBackend> {
    id: u64,
    backend: Arc<B>,
    stages: Stages,
    sessions: HashMap<SessionId, GenerationSession<CacheOf<B>>>,
    next_session: SessionId,
}

impl<B: ModelBackend> DecodeOrchestrator<B> {
    pub fn new(backend: Arc<B>) -> Result<Self> {
        Self::with_mask_builder(backend, CausalMaskBuilder::new())
    }

    pub fn with_mask_builder(backend: Arc<B>, masks: CausalMaskBuilder) -> Result<Self> {
        let shape = backend.shape();
        shape.validate()?;
        let stages = Stages {
            sequencer: PositionSequencer::new(shape.context_length),
            masks,
            assembler: LogitsAssembler::for_shape(shape),
        };
        Ok(Self {
            id: NEXT_ORCHESTRATOR_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            stages,
            sessions: HashMap::new(),
            next_session: 1,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Creates a session using the sampler described by `config`.
    pub fn start_session(
        &mut self,
        prompt: &[Token],
        config: GenerationConfig,
    ) -> Result<SessionHandle> {
        let sampler = config.sampler.build(config.seed)?;
        self.start_session_with_sampler(prompt, config, Box::new(sampler))
    }

    /// Creates a session with a caller-supplied sampling policy.
    ///
    /// Configuration and prompt problems are reported here, before any
    /// generation step runs.
    pub fn start_session_with_sampler(
        &mut self,
        prompt: &[Token],
        config: GenerationConfig,
        sampler: Box<dyn Sampler + Send>,
    ) -> Result<SessionHandle> {
        let shape = self.backend.shape();
        config.validate(shape)?;
        if prompt.is_empty() {
            return Err(OrchestratorError::shape("prompt", "at least one token", 0));
        }
        if prompt.len() > shape.context_length {
            return Err(OrchestratorError::ContextOverflow {
                start: 0,
                len: prompt.len(),
                context_length: shape.context_length,
            });
        }
        if let Some(bad) = prompt.iter().find(|t| **t as usize >= shape.vocab_size) {
            return Err(OrchestratorError::shape(
                "prompt",
                format!("token id < {}", shape.vocab_size),
                bad,
            ));
        }

        let cache = KVCacheState::create(self.backend.trunk())?;
        let id = self.next_session;
        self.next_session += 1;
        let (token, cancel) = CancellationToken::new();

        info!(
            session = id,
            cache = cache.id(),
            prompt_tokens = prompt.len(),
            batch_width = shape.batch_width,
            context_length = shape.context_length,
            sampler = ?config.sampler,
            "session started"
        );

        let session = GenerationSession::new(id, prompt.to_vec(), cache, sampler, config, token);
        self.sessions.insert(id, session);
        Ok(SessionHandle {
            owner: self.id,
            id,
            cancel,
        })
    }

    /// Advances the session and returns the next token, or `None` once it
    /// has terminated.
    pub fn step(&mut self, handle: &SessionHandle) -> Result<Option<Token>> {
        match self.advance(handle)? {
            StepOutcome::Token(token) => Ok(Some(token)),
            StepOutcome::Finished(_) => Ok(None),
        }
    }

    /// Like [`step`](Self::step) but reports why a session finished.
    ///
    /// Running out of context is a normal termination. Any other error
    /// moves the session to `Error` and is returned.
    pub fn advance(&mut self, handle: &SessionHandle) -> Result<StepOutcome> {
        let backend = Arc::clone(&self.backend);
        let stages = self.stages;
        let session = self.session_mut(handle)?;

        match session.state() {
            SessionState::Error => return Err(OrchestratorError::SessionPoisoned(session.id())),
            SessionState::Terminated(reason) => return Ok(StepOutcome::Finished(reason)),
            _ => {}
        }

        match drive(backend.as_ref(), &stages, session) {
            Ok(outcome) => Ok(outcome),
            Err(err) if !err.is_fatal() => {
                debug!(session = session.id(), error = %err, "window rejected");
                Ok(finish(session, TerminationReason::ContextOverflow))
            }
            Err(err) => {
                warn!(
                    session = session.id(),
                    cursor = session.cursor(),
                    error = %err,
                    "session failed"
                );
                session.fail();
                Err(err)
            }
        }
    }

    pub fn cancel(&self, handle: &SessionHandle) {
        info!(session = handle.id(), "cancellation requested");
        handle.cancel();
    }

    pub fn session(&self, handle: &SessionHandle) -> Result<&GenerationSession<CacheOf<B>>> {
        if handle.owner != self.id {
            return Err(OrchestratorError::UnknownSession(handle.id));
        }
        self.sessions
            .get(&handle.id)
            .ok_or(OrchestratorError::UnknownSession(handle.id))
    }

    pub fn status(&self, handle: &SessionHandle) -> Result<SessionState> {
        Ok(self.session(handle)?.state())
    }

    pub fn cursor(&self, handle: &SessionHandle) -> Result<usize> {
        Ok(self.session(handle)?.cursor())
    }

    pub fn context(&self, handle: &SessionHandle) -> Result<&[Token]> {
        Ok(self.session(handle)?.context())
    }

    /// Committed positions in the session's cache, `None` once released.
    pub fn cache_counter(&self, handle: &SessionHandle) -> Result<Option<usize>> {
        Ok(self.session(handle)?.cache_counter())
    }

    pub fn metrics(&self, handle: &SessionHandle) -> Result<&GenerationMetrics> {
        Ok(self.session(handle)?.metrics())
    }

    /// Drops the session and its cache.
    pub fn end_session(&mut self, handle: SessionHandle) -> Result<SessionSummary> {
        self.session(&handle)?;
        let session = self
            .sessions
            .remove(&handle.id)
            .ok_or(OrchestratorError::UnknownSession(handle.id))?;
        Ok(SessionSummary::from_session(&session))
    }

    /// Runs a fresh session to termination.
    pub fn generate(
        &mut self,
        prompt: &[Token],
        config: GenerationConfig,
    ) -> Result<GenerationOutput> {
        let handle = self.start_session(prompt, config)?;
        let mut tokens = Vec::new();
        let termination = loop {
            match self.advance(&handle) {
                Ok(StepOutcome::Token(token)) => tokens.push(token),
                Ok(StepOutcome::Finished(reason)) => break reason,
                Err(err) => {
                    self.sessions.remove(&handle.id);
                    return Err(err);
                }
            }
        };
        let summary = self.end_session(handle)?;
        Ok(GenerationOutput {
            tokens,
            termination,
            metrics: summary.metrics,
        })
    }

    fn session_mut(
        &mut self,
        handle: &SessionHandle,
    ) -> Result<&mut GenerationSession<CacheOf<B>>> {
        if handle.owner != self.id {
            return Err(OrchestratorError::UnknownSession(handle.id));
        }
        self.sessions
            .get_mut(&handle.id)
            .ok_or(OrchestratorError::UnknownSession(handle.id))
    }
}

fn drive<B: ModelBackend>(
    backend: &B,
    stages: &Stages,
    session: &mut GenerationSession<CacheOf<B>>,
) -> Result<StepOutcome> {
    if session.is_cancelled() {
        warn!(session = session.id(), cursor = session.cursor(), "session cancelled");
        return Ok(finish(session, TerminationReason::Cancelled));
    }

    match session.state() {
        SessionState::Init | SessionState::Prefilling => {
            if session.state() == SessionState::Init {
                session.enter_prefill();
            }
            prefill(backend, stages, session)
        }
        SessionState::Decoding => {
            if max_tokens_reached(session) {
                return Ok(finish(session, TerminationReason::MaxTokens));
            }
            decode(backend, stages, session)
        }
        SessionState::Terminated(reason) => Ok(StepOutcome::Finished(reason)),
        SessionState::Error => Err(OrchestratorError::SessionPoisoned(session.id())),
    }
}

/// Commits the rest of the prompt, then samples the first token from the
/// final real row.
fn prefill<B: ModelBackend>(
    backend: &B,
    stages: &Stages,
    session: &mut GenerationSession<CacheOf<B>>,
) -> Result<StepOutcome> {
    let started = Instant::now();
    let mut last = None;
    while session.cursor() < session.prompt_len() {
        last = Some(prefill_window(backend, stages, session)?);
    }
    let hidden =
        last.ok_or_else(|| OrchestratorError::shape("prefill", "at least one window", 0))?;
    session.enter_decode();

    let logits = project_logits(backend.head(), &stages.assembler, &hidden, backend.shape())?;
    let token = session.sampler.choose(logits.view())?;
    session.metrics.prefill_ms += started.elapsed().as_secs_f64() * 1000.0;

    info!(
        session = session.id(),
        prompt_tokens = session.prompt_len(),
        windows = session.metrics().prefill_calls,
        prefill_ms = session.metrics().prefill_ms,
        "prefill complete"
    );
    admit(stages, session, token)
}

/// Runs one prefill window and returns the hidden state of its last real row.
fn prefill_window<B: ModelBackend>(
    backend: &B,
    stages: &Stages,
    session: &mut GenerationSession<CacheOf<B>>,
) -> Result<HiddenTensor> {
    let shape = backend.shape();
    let width = shape.batch_width;
    let start = session.cursor();
    let take = width.min(session.prompt_len() - start);

    let positions = stages.sequencer.sequence(Phase::Prefill, start, take)?;
    let mut window = session.context()[start..start + take].to_vec();
    window.resize(width, session.config().filler_token);
    let mask = stages.masks.build(start, width, shape.context_length)?;
    let hidden = embed_tokens(backend.embedder(), &window, shape)?;

    let cache = session.synced_cache()?;
    let output = trunk::step(backend.trunk(), cache, &hidden, &positions, &mask, shape)?;
    session.commit(take);
    session.metrics.prefill_calls += 1;

    debug!(
        session = session.id(),
        start,
        committed = take,
        padded = width - take,
        "prefill window committed"
    );
    Ok(output.slice(s![.., take - 1..take, ..]).to_owned())
}

/// Feeds the pending token at the cursor, commits it and samples the next.
fn decode<B: ModelBackend>(
    backend: &B,
    stages: &Stages,
    session: &mut GenerationSession<CacheOf<B>>,
) -> Result<StepOutcome> {
    let shape = backend.shape();
    let started = Instant::now();
    let position = session.cursor();
    // Checked before the pending lookup, which a desynced cursor would miss.
    session.synced_cache()?;
    let token = session
        .pending_token()
        .ok_or_else(|| OrchestratorError::shape("decode", "a pending token", "none"))?;

    let positions = stages.sequencer.sequence(Phase::Decode, position, 1)?;
    let mask = stages.masks.build(position, 1, shape.context_length)?;
    let hidden = embed_tokens(backend.embedder(), &[token], shape)?;

    let cache = session.synced_cache()?;
    let output = trunk::step(backend.trunk(), cache, &hidden, &positions, &mask, shape)?;
    session.commit(1);

    let logits = project_logits(backend.head(), &stages.assembler, &output, shape)?;
    let next = session.sampler.choose(logits.view())?;
    session.metrics.decode_calls += 1;
    session.metrics.decode_ms += started.elapsed().as_secs_f64() * 1000.0;

    debug!(session = session.id(), position, token, next, "decode step");
    admit(stages, session, next)
}

/// Emits `token` unless it stops the session or there is no position left
/// to feed it back at.
fn admit<C>(
    stages: &Stages,
    session: &mut GenerationSession<C>,
    token: Token,
) -> Result<StepOutcome> {
    if session.config().is_stop_token(token) {
        return Ok(finish(session, TerminationReason::StopToken(token)));
    }
    if max_tokens_reached(session) {
        return Ok(finish(session, TerminationReason::MaxTokens));
    }
    match stages.sequencer.sequence(Phase::Decode, session.cursor(), 1) {
        Ok(_) => {}
        Err(OrchestratorError::ContextOverflow { .. }) => {
            return Ok(finish(session, TerminationReason::ContextOverflow))
        }
        Err(err) => return Err(err),
    }
    session.push_token(token);
    Ok(StepOutcome::Token(token))
}

fn max_tokens_reached<C>(session: &GenerationSession<C>) -> bool {
    session
        .config()
        .max_new_tokens
        .is_some_and(|max| session.generated().len() >= max)
}

fn finish<C>(session: &mut GenerationSession<C>, reason: TerminationReason) -> StepOutcome {
    session.terminate(reason);
    info!(
        session = session.id(),
        reason = %reason,
        cursor = session.cursor(),
        generated = session.generated().len(),
        "session terminated"
    );
    StepOutcome::Finished(reason)
}
