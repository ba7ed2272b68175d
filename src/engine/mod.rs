//! Engine capability traits and handle lifetimes.
//!
//! The inference engine (weights, kernels, vocabulary, internal KV cache) is
//! a black box behind [`EngineBackend`], [`Model`], and [`EngineContext`];
//! the session layer consumes only this surface and never inspects engine
//! internals. [`BackendHandle`] ties backend subsystem init/shutdown to the
//! lifetime of the handles instead of ambient global state.

pub mod echo;

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::batch::Batch;
use crate::error::SessionError;
use crate::token::TokenId;

/// Model loading options.
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Layers to offload to an accelerator, when the backend supports it.
    pub gpu_layers: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self { gpu_layers: 0 }
    }
}

/// Context creation options.
#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Maximum number of cache slots (tokens) the context can hold.
    pub context_width: usize,
    /// Worker threads for engine computation.
    pub threads: usize,
    /// Capacity of the batch this context will be fed, see
    /// [`Batch::new`](crate::batch::Batch::new).
    pub batch_capacity: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(2).clamp(1, 8))
            .unwrap_or(4);
        Self {
            context_width: 2048,
            threads,
            batch_capacity: crate::batch::DEFAULT_BATCH_CAPACITY,
        }
    }
}

/// A loaded model: immutable weights plus the vocabulary surface.
///
/// The raw `tokenize`/`detokenize` calls follow the engine's C-style
/// conventions (counts, negative sizes); use the adapter functions in
/// [`crate::token`] instead of calling these directly.
pub trait Model: Send + Sync {
    /// Encode `text` into `out`, returning the number of tokens written, or
    /// a negative value if the engine rejects the input or the buffer.
    fn tokenize(&self, text: &str, out: &mut [TokenId], add_leading_marker: bool) -> i32;

    /// Render one token's bytes into `buf`, returning the byte count, or the
    /// negated required size when `buf` is too small.
    fn detokenize(&self, token: TokenId, buf: &mut [u8]) -> i32;

    /// The designated end-of-sequence token.
    fn end_of_sequence(&self) -> TokenId;

    /// Number of vocabulary entries (one logit per entry).
    fn vocab_size(&self) -> usize;

    /// Human-readable model description.
    fn describe(&self) -> String;

    /// Model size in bytes.
    fn size_bytes(&self) -> u64;

    /// Total parameter count.
    fn param_count(&self) -> u64;
}

/// The engine's per-session mutable state (its internal KV cache).
///
/// Not `Sync`: a context must be driven from one logical operation at a
/// time, which the session enforces by exclusive ownership.
pub trait EngineContext: Send {
    /// Run one inference step over the batch. Returns 0 on success, a
    /// nonzero engine status code on failure.
    fn decode(&mut self, batch: &Batch) -> i32;

    /// Scores for every vocabulary entry at the given batch slot. Only valid
    /// for slots submitted with `wants_logits` in the most recent decode.
    fn logits(&mut self, slot: usize) -> &[f32];

    /// Wipe the internal cache, forgetting everything fed so far.
    fn reset_cache(&mut self);

    /// Configured maximum number of cache slots.
    fn context_width(&self) -> usize;
}

/// A pluggable inference backend: loads models and creates contexts.
pub trait EngineBackend: Send + Sync {
    /// Short backend name for reports ("echo", "cpu", ...).
    fn name(&self) -> &str;

    /// One-time subsystem initialization. Called exactly once per
    /// [`BackendHandle::new`].
    fn init(&self) {}

    /// Subsystem teardown, called when the last handle drops.
    fn shutdown(&self) {}

    fn load_model(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Arc<dyn Model>, SessionError>;

    fn create_context(
        &self,
        model: &Arc<dyn Model>,
        params: &ContextParams,
    ) -> Result<Box<dyn EngineContext>, SessionError>;
}

struct BackendShared {
    backend: Box<dyn EngineBackend>,
}

impl Drop for BackendShared {
    fn drop(&mut self) {
        info!(backend = self.backend.name(), "Shutting down engine backend");
        self.backend.shutdown();
    }
}

/// Refcounted handle to an initialized backend.
///
/// Construction runs the backend's `init` hook; `shutdown` runs when the
/// last clone (including the ones held by [`ModelHandle`]s) is dropped.
#[derive(Clone)]
pub struct BackendHandle {
    shared: Arc<BackendShared>,
}

impl BackendHandle {
    pub fn new(backend: Box<dyn EngineBackend>) -> Self {
        info!(backend = backend.name(), "Initializing engine backend");
        backend.init();
        Self {
            shared: Arc::new(BackendShared { backend }),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.backend.name()
    }

    /// Load a model, keeping the backend alive for as long as the model is.
    pub fn load_model(
        &self,
        path: &Path,
        params: &ModelParams,
    ) -> Result<ModelHandle, SessionError> {
        let model = self.shared.backend.load_model(path, params)?;
        info!(
            backend = self.name(),
            model = %model.describe(),
            params = model.param_count(),
            "Model loaded"
        );
        Ok(ModelHandle {
            model,
            backend: self.clone(),
        })
    }

    pub(crate) fn create_context(
        &self,
        model: &Arc<dyn Model>,
        params: &ContextParams,
    ) -> Result<Box<dyn EngineContext>, SessionError> {
        self.shared.backend.create_context(model, params)
    }
}

/// A loaded model plus the backend handle that keeps its subsystem alive.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<dyn Model>,
    backend: BackendHandle,
}

impl ModelHandle {
    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Wrap an arbitrary model over the echo backend, for test doubles.
    #[cfg(test)]
    pub(crate) fn for_tests(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            backend: BackendHandle::new(Box::new(echo::EchoBackend::new())),
        }
    }

    pub(crate) fn raw(&self) -> &Arc<dyn Model> {
        &self.model
    }
}

impl Deref for ModelHandle {
    type Target = dyn Model;

    fn deref(&self) -> &(dyn Model + 'static) {
        self.model.as_ref()
    }
}
