pub mod batch;
pub mod bench;
pub mod cli;
pub mod engine;
pub mod error;
pub mod pending;
pub mod sampler;
pub mod session;
pub mod token;

pub use batch::Batch;
pub use bench::{BenchParams, BenchReport};
pub use engine::{BackendHandle, ContextParams, ModelHandle, ModelParams};
pub use error::SessionError;
pub use sampler::{GreedySampler, Sampler, SamplingConfig, StochasticSampler};
pub use session::{Session, SessionState, StepOutput};
pub use token::{TokenCandidate, TokenId};
