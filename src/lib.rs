#![forbid(unsafe_code)]

//! # prism-harness
//!
//! Multi-perspective critical analysis of creative works, orchestrated over an
//! LLM provider.
//!
//! One work goes in; one or more interpretive lenses (Marxist, Formalist, a
//! user-authored historical Zeitgeist, ...) each produce an independent
//! analysis through a two-stage chain: a "General" call that turns the lens
//! configuration into a detailed strategy, then an executor call that applies
//! the strategy to the work. Chains run concurrently with order-stable
//! gathering, and a synthesis stage weaves the voices into a dialectic (two),
//! a symposium (three or more), or a comparative essay (two works, one lens).
//! Media works are uploaded once and shared across chains through a
//! provider-side context cache.

pub mod executor;
pub mod gateway;
pub mod lens;
pub mod media;
pub mod pipeline;
pub mod retry;
pub mod selector;
pub mod strategy;
pub mod synthesis;
pub mod work;

pub use gateway::{
    Attribution, GeminiAdapter, GenerateGateway, GenerateRequest, GenerateResponse, MediaStore,
    NoopUsageSink, ProviderError, ProviderGateway, StderrUsageSink, UsageSink,
};
pub use lens::{validate_configs, ConfigError, LensConfig, LensFilters, PersonaChoice, ScopeMode};
pub use media::{MediaError, MediaManager};
pub use pipeline::{
    refine, run_comparative, run_pipeline, LensSource, ModelConfig, PipelineDeps, PipelineError,
    PipelineOutcome, PipelineRequest,
};
pub use selector::{SelectedLens, SelectorError};
pub use strategy::{Strategy, StrategyError};
pub use work::{LocalFile, Modality, UsageMeter, UsageSnapshot, VideoMode, WorkInput};
