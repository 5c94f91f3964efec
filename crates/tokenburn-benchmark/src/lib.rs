pub mod client;
pub mod cooldown;
pub mod engine;
pub mod provisioner;
pub mod runner;
pub mod synthetic;

pub use client::{ChatClient, ChatCompletionRequest, ChatMessage, LocalModel};
pub use cooldown::{Cooldown, CooldownOutcome};
pub use engine::{MeasurementEngine, StreamObserver, StreamTally};
pub use provisioner::{load_context_cases, slice_prompts, PromptProvisioner, SliceDirection};
pub use runner::{BenchmarkEvent, BenchmarkRunner, Recorder, Recorders, ResourceMonitor, RunControls};
pub use synthetic::{ContextPromptGenerator, PromptFileStats};
