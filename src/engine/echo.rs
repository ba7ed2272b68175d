//! Deterministic byte-level reference engine.
//!
//! A tiny engine with no weights: the vocabulary is one token per byte value
//! plus pad/marker/end markers, and "inference" replays the prompt bytes and
//! then emits end-of-sequence. It exists so the session, benchmark, and bin
//! tools can run end-to-end without a model artifact, and doubles as a
//! realistic engine double in tests (it speaks the same status-code and
//! negative-size conventions a real backend does).

use std::path::Path;
use std::sync::Arc;

use crate::batch::Batch;
use crate::error::SessionError;
use crate::token::TokenId;

use super::{ContextParams, EngineBackend, EngineContext, Model, ModelParams};

const PAD_TOKEN: TokenId = 0;
const MARKER_TOKEN: TokenId = 1;
const EOS_TOKEN: TokenId = 2;
/// First byte token; byte `b` maps to token `BYTE_BASE + b`.
const BYTE_BASE: TokenId = 3;
const VOCAB_SIZE: usize = 259;

/// The echo engine's model: a fixed byte vocabulary.
pub struct EchoModel;

impl EchoModel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for EchoModel {
    fn tokenize(&self, text: &str, out: &mut [TokenId], add_leading_marker: bool) -> i32 {
        let needed = text.len() + usize::from(add_leading_marker);
        if out.len() < needed {
            return -(needed as i32);
        }
        let mut n = 0;
        if add_leading_marker {
            out[n] = MARKER_TOKEN;
            n += 1;
        }
        for b in text.bytes() {
            out[n] = BYTE_BASE + b as TokenId;
            n += 1;
        }
        n as i32
    }

    fn detokenize(&self, token: TokenId, buf: &mut [u8]) -> i32 {
        if !(BYTE_BASE..VOCAB_SIZE as TokenId).contains(&token) {
            // Control tokens render to nothing.
            return 0;
        }
        if buf.is_empty() {
            return -1;
        }
        buf[0] = (token - BYTE_BASE) as u8;
        1
    }

    fn end_of_sequence(&self) -> TokenId {
        EOS_TOKEN
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn describe(&self) -> String {
        format!("echo {}-entry byte model", VOCAB_SIZE)
    }

    fn size_bytes(&self) -> u64 {
        // One f32 "embedding" per vocabulary entry, for report plausibility.
        (VOCAB_SIZE * 4) as u64
    }

    fn param_count(&self) -> u64 {
        VOCAB_SIZE as u64
    }
}

/// Per-session echo state: the fed token history is the "KV cache".
pub struct EchoContext {
    model: Arc<dyn Model>,
    width: usize,
    cache: Vec<TokenId>,
    prompt_len: usize,
    logits: Vec<f32>,
}

impl EchoContext {
    pub fn new(model: Arc<dyn Model>, width: usize) -> Self {
        let vocab = model.vocab_size();
        Self {
            model,
            width,
            cache: Vec::new(),
            prompt_len: 0,
            logits: vec![0.0; vocab],
        }
    }

    /// The token the model "predicts" next: replay the prompt (minus the
    /// leading marker), then end-of-sequence forever.
    fn predicted(&self) -> TokenId {
        let replay: Vec<TokenId> = self.cache[..self.prompt_len]
            .iter()
            .copied()
            .filter(|&t| t != MARKER_TOKEN && t != PAD_TOKEN)
            .collect();
        let generated = self.cache.len() - self.prompt_len;
        replay
            .get(generated)
            .copied()
            .unwrap_or_else(|| self.model.end_of_sequence())
    }
}

impl EngineContext for EchoContext {
    fn decode(&mut self, batch: &Batch) -> i32 {
        if batch.is_empty() {
            return -1;
        }
        if self.cache.len() + batch.len() > self.width {
            // No free cache slots, the same way a real engine reports it.
            return 1;
        }

        if self.cache.is_empty() {
            self.prompt_len = batch.len();
        }
        for entry in batch.entries() {
            self.cache.push(entry.token);
        }

        let next = self.predicted();
        self.logits.fill(0.0);
        if let Some(slot) = self.logits.get_mut(next as usize) {
            *slot = 1.0;
        }
        0
    }

    fn logits(&mut self, _slot: usize) -> &[f32] {
        // Scores are only produced for the final logits-bearing slot.
        &self.logits
    }

    fn reset_cache(&mut self) {
        self.cache.clear();
        self.prompt_len = 0;
    }

    fn context_width(&self) -> usize {
        self.width
    }
}

/// Backend producing [`EchoModel`]s and [`EchoContext`]s.
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn load_model(
        &self,
        _path: &Path,
        _params: &ModelParams,
    ) -> Result<Arc<dyn Model>, SessionError> {
        // No artifact to read: the vocabulary is built in.
        Ok(Arc::new(EchoModel::new()))
    }

    fn create_context(
        &self,
        model: &Arc<dyn Model>,
        params: &ContextParams,
    ) -> Result<Box<dyn EngineContext>, SessionError> {
        if params.context_width == 0 {
            return Err(SessionError::ContextInit(
                "context width must be nonzero".to_string(),
            ));
        }
        Ok(Box::new(EchoContext::new(
            Arc::clone(model),
            params.context_width,
        )))
    }
}
