//! Generation loop
//!
//! Runs one prompt through validate, prefill, and the sample/decode loop,
//! and assembles the final result. A fresh context is created for every
//! request: incremental KV-slot eviction is unreliable across runtime
//! versions, while recreation costs tens of milliseconds and guarantees no
//! residual cache state can corrupt the decode.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};

use crate::config::EngineConfig;
use crate::engine::batch::BatchDecoder;
use crate::engine::chat::{trim_at_marker, TURN_END};
use crate::engine::sampler::SamplerSpec;
use crate::engine::session::EngineError;
use crate::engine::text::Utf8Accumulator;

/// One generation request. Immutable once accepted by the engine.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully formatted prompt text
    pub prompt: String,
    /// Maximum number of new tokens to produce
    pub max_tokens: u32,
    /// Sampling temperature (<= 0 selects greedy decoding)
    pub temperature: f32,
    /// Nucleus probability mass
    pub top_p: f32,
    /// Sampling seed (0 = draw from system entropy)
    pub seed: u32,
}

impl GenerationRequest {
    pub fn new<S: Into<String>>(prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            seed: 0,
        }
    }
}

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model emitted its end-of-sequence token.
    Eos,
    /// The turn-end marker appeared in the accumulated output.
    StopMarker,
    /// The running position reached the context limit minus the safety margin.
    ContextLimit,
    /// The requested token budget was spent.
    TokenBudget,
    /// A decode failure mid-stream; the text so far is returned.
    DecodeInterrupted,
    /// The caller cancelled; the text so far is returned.
    Cancelled,
}

/// Outcome of a completed (possibly partial) generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_tokens: u32,
    pub tokens_generated: u32,
    pub stop_reason: StopReason,
}

/// Cooperative cancellation flag, checked between decode steps.
///
/// Cancelling returns the partial result exactly as a stepping decode
/// failure would. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Rejects prompts that leave no room for output below the context limit.
fn ensure_prompt_fits(prompt_tokens: usize, budget: usize) -> Result<(), EngineError> {
    if prompt_tokens >= budget {
        return Err(EngineError::PromptTooLong {
            tokens: prompt_tokens,
            budget,
        });
    }
    Ok(())
}

/// Runs one full generation against the resident model.
///
/// Owns the context for exactly the duration of the call; the context never
/// survives into the next request.
pub(crate) fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    config: &EngineConfig,
    request: &GenerationRequest,
    cancel: &CancelHandle,
) -> Result<GenerationResult, EngineError> {
    // Init: tokenize and validate against the context budget.
    let prompt_tokens = model
        .str_to_token(&request.prompt, AddBos::Always)
        .map_err(|e| EngineError::Tokenize(e.to_string()))?;
    if prompt_tokens.is_empty() {
        return Err(EngineError::EmptyTokenization);
    }
    ensure_prompt_fits(prompt_tokens.len(), config.prompt_budget())?;

    tracing::debug!("prompt tokenized to {} tokens", prompt_tokens.len());

    // Fresh context, the sole cache-invalidation primitive.
    let n_batch = prompt_tokens.len().max(config.batch_size as usize) as u32;
    let n_ctx = NonZeroU32::new(config.context_length)
        .ok_or_else(|| EngineError::ContextCreate("context length is zero".to_string()))?;
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx))
        .with_n_batch(n_batch)
        .with_n_threads(config.threads)
        .with_n_threads_batch(config.threads);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

    tracing::debug!(
        "context created: n_ctx={} n_batch={} threads={} (~{} KiB KV per layer)",
        config.context_length,
        n_batch,
        config.threads,
        2 * config.context_length as u64
            * model.n_embd() as u64
            * config.kv_precision.bytes_per_element() as u64
            / 1024,
    );

    // Prefill: one pass over the whole prompt. Failure here is fatal to the
    // request since no output exists yet.
    let mut decoder = BatchDecoder::new(prompt_tokens.len(), config.batch_size);
    decoder.prefill(&mut ctx, &prompt_tokens)?;

    let mut sampler = SamplerSpec::resolve(request.temperature, request.top_p, request.seed).build();

    let mut text = String::new();
    let mut codec = Utf8Accumulator::new();
    let mut n_past = prompt_tokens.len() as i32;
    let mut produced: u32 = 0;
    let limit = (config.context_length - config.safety_margin) as i32;
    let mut stop_reason = StopReason::TokenBudget;

    // Stepping: sample, check stop conditions, decode the new token.
    for _ in 0..request.max_tokens {
        if cancel.is_cancelled() {
            tracing::debug!("generation cancelled after {produced} tokens");
            stop_reason = StopReason::Cancelled;
            break;
        }

        let token = sampler.sample(&ctx, decoder.logits_index());
        sampler.accept(token);

        if model.is_eog_token(token) {
            stop_reason = StopReason::Eos;
            break;
        }

        match model.token_to_bytes(token, Special::Tokenize) {
            Ok(bytes) => text.push_str(&codec.push(&bytes)),
            Err(e) => {
                tracing::warn!("token detokenization failed mid-stream: {e}");
                stop_reason = StopReason::DecodeInterrupted;
                break;
            }
        }
        produced += 1;

        if trim_at_marker(&mut text, TURN_END) {
            stop_reason = StopReason::StopMarker;
            break;
        }

        if n_past >= limit {
            tracing::debug!("context limit reached at position {n_past}");
            stop_reason = StopReason::ContextLimit;
            break;
        }

        // A failed step yields what was generated so far, never an empty
        // result.
        if let Err(e) = decoder.step(&mut ctx, token, n_past) {
            tracing::warn!("decode failed mid-generation, returning partial output: {e}");
            stop_reason = StopReason::DecodeInterrupted;
            break;
        }
        n_past += 1;
    }

    if stop_reason != StopReason::StopMarker {
        text.push_str(&codec.finish());
    }

    tracing::debug!(
        "generation done: {} tokens, {:?}, {} chars",
        produced,
        stop_reason,
        text.len()
    );

    Ok(GenerationResult {
        text,
        prompt_tokens: prompt_tokens.len() as u32,
        tokens_generated: produced,
        stop_reason,
    })
}
