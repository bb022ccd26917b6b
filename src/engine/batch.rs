//! Batch decoding
//!
//! One forward pass over a set of token positions. The same wrapper serves
//! prefill (all prompt tokens, logits for the final position only) and
//! single-step continuation (one token, logits requested).

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::token::LlamaToken;

use crate::engine::session::EngineError;

pub struct BatchDecoder {
    batch: LlamaBatch,
    capacity: usize,
}

impl BatchDecoder {
    /// Allocates a batch sized for the larger of the prompt and the
    /// configured batch size. An undersized batch is a programming error,
    /// not a runtime condition, so `prefill` asserts against it.
    pub fn new(prompt_len: usize, configured_batch: u32) -> Self {
        let capacity = prompt_len.max(configured_batch as usize).max(1);
        Self {
            batch: LlamaBatch::new(capacity, 1),
            capacity,
        }
    }

    /// Decodes the whole prompt in one pass.
    pub fn prefill(
        &mut self,
        ctx: &mut LlamaContext,
        tokens: &[LlamaToken],
    ) -> Result<(), EngineError> {
        debug_assert!(
            tokens.len() <= self.capacity,
            "prefill of {} tokens exceeds batch capacity {}",
            tokens.len(),
            self.capacity
        );
        if tokens.is_empty() {
            return Err(EngineError::Decode("prefill with no tokens".to_string()));
        }

        self.batch.clear();
        let last = tokens.len() - 1;
        for (i, token) in tokens.iter().enumerate() {
            self.batch
                .add(*token, i as i32, &[0], i == last)
                .map_err(|e| EngineError::Decode(format!("batch add failed: {e}")))?;
        }

        ctx.decode(&mut self.batch)
            .map_err(|e| EngineError::Decode(format!("prefill decode failed: {e}")))
    }

    /// Decodes a single sampled token at `pos`, requesting logits.
    pub fn step(
        &mut self,
        ctx: &mut LlamaContext,
        token: LlamaToken,
        pos: i32,
    ) -> Result<(), EngineError> {
        self.batch.clear();
        self.batch
            .add(token, pos, &[0], true)
            .map_err(|e| EngineError::Decode(format!("batch add failed: {e}")))?;

        ctx.decode(&mut self.batch)
            .map_err(|e| EngineError::Decode(format!("step decode failed: {e}")))
    }

    /// Batch index holding the most recent logits, for the sampler.
    pub fn logits_index(&self) -> i32 {
        self.batch.n_tokens() - 1
    }
}
