//! CompanyResearch core abstractions.
//!
//! This crate holds the handoff envelope passed between the Supervisor,
//! Researcher and Document Creator agents, the error taxonomy, configuration,
//! and the three external capabilities the agents call: web search, a
//! language model, and a report file sink.

mod config;
mod error;
pub mod llm;
mod logging;
pub mod message;
pub mod metrics;
pub mod search;
mod security;
pub mod sink;
mod telemetry;
mod trace;

pub use config::{
    Config, ConfigLoader, LlmConfig, LoggingConfig, OutputConfig, SearchConfig,
};
pub use error::{AgentError, LlmError, ResearchError, SearchError, SinkError};
pub use llm::{CompletionRequest, DynModel, LanguageModel, OpenAiChatModel, ScriptedModel};
pub use logging::{RunLogInput, RunLogSettings, log_run_completion};
pub use message::{HandoffMessage, NextAgent, Payload, Status, TaskName, payload};
pub use search::{
    DynSearch, HitSource, SearchHit, SearchProvider, SearchResponse, StaticSearch, TavilyClient,
};
pub use security::{SecretValue, require_env};
pub use sink::{DynSink, MarkdownFileSink, ReportSink, slugify};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, persist_trace, render_trace};
