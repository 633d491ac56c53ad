//! Prompt construction and language-model generation for dbt-docgen.
//!
//! - [`prompt`] turns a [`docgen_shared::ModelInfo`] into a deterministic [`Prompt`]
//! - [`providers`] talk to OpenAI-compatible and Anthropic endpoints
//! - [`engine`] schedules requests under a concurrency bound with retry/backoff
//! - [`sections`] validates responses into a [`docgen_shared::GenerationResult`]

pub mod engine;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod sections;

pub use engine::{
    GeneratedDoc, GenerationBatch, GenerationClient, GenerationJob, GenerationProgress,
    SilentGenerationProgress,
};
pub use prompt::{Prompt, PromptStrategy, StandardPrompt, TemplatePrompt};
pub use providers::{
    AnthropicProvider, Completion, GenerationProvider, OpenAiProvider, ProviderError,
    build_provider,
};
pub use retry::Backoff;
pub use sections::parse_sections;
