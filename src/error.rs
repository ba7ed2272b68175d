use thiserror::Error;

use crate::session::SessionState;
use crate::token::TokenId;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Context init failed: {0}")]
    ContextInit(String),

    #[error("Cache capacity insufficient: need {required} slots, context holds {capacity}")]
    InsufficientCacheCapacity { required: usize, capacity: usize },

    #[error("Prompt evaluation failed (engine status {0})")]
    PromptEvalFailed(i32),

    #[error("Text generation decode failed (engine status {0})")]
    GenerationDecodeFailed(i32),

    #[error("Benchmark prompt-processing decode failed (engine status {0})")]
    BenchPromptDecodeFailed(i32),

    #[error("Benchmark text-generation decode failed (engine status {0})")]
    BenchGenerationDecodeFailed(i32),

    #[error("Batch is full: capacity {capacity}")]
    BatchOverflow { capacity: usize },

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Engine refused to render token {token} (reported size {size} twice)")]
    AdapterEncoding { token: TokenId, size: i32 },

    #[error("'{op}' is not valid in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}
