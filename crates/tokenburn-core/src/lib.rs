pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod prompt;
pub mod rotation;
pub mod session;
pub mod system;

pub use config::{
    EndpointConfig, GpuConfig, PromptConfig, RunConfig, SamplingConfig, TokenBurnConfig,
};
pub use context::ContextCategory;
pub use error::{Result, TokenBurnError};
pub use metrics::{completion_speed, estimate_tokens, prompt_speed, Measurement, TokenSource};
pub use prompt::PromptCase;
pub use rotation::SystemPromptRotation;
pub use session::{OutcomeStatus, PromptOutcome, RunSession, RunSummary, SessionMeta};
pub use system::{GpuMetrics, MemoryStats};
