use std::path::PathBuf;

use thiserror::Error;

/// Crate-level error for configuration and setup.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Failure raised inside an agent step. Agents never let these escape; they
/// are folded into a `failed` handoff message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ExternalCall(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Io(String),
}

impl AgentError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    /// Stable label recorded in message metadata and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::ExternalCall(_) => "external_call",
            AgentError::Parse(_) => "parse",
            AgentError::Io(_) => "io",
        }
    }
}

/// Errors surfaced by a search capability.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Network(String),
    #[error("search unauthorized - check API key")]
    Unauthorized,
    #[error("search rate limited")]
    RateLimited,
    #[error("search HTTP error ({0}): {1}")]
    Http(u16, String),
    #[error("failed to decode search response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Errors surfaced by a language model capability.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Network(String),
    #[error("LLM HTTP error ({0}): {1}")]
    Http(u16, String),
    #[error("failed to decode LLM response: {0}")]
    Decode(String),
    #[error("LLM returned no completion")]
    EmptyResponse,
    #[error("{0}")]
    Unavailable(String),
}

/// Errors surfaced by a report sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to prepare output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<SearchError> for AgentError {
    fn from(err: SearchError) -> Self {
        AgentError::ExternalCall(err.to_string())
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        AgentError::ExternalCall(err.to_string())
    }
}

impl From<SinkError> for AgentError {
    fn from(err: SinkError) -> Self {
        AgentError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_map_to_taxonomy() {
        let search: AgentError = SearchError::RateLimited.into();
        assert_eq!(search.kind(), "external_call");

        let llm: AgentError = LlmError::EmptyResponse.into();
        assert_eq!(llm.to_string(), "LLM returned no completion");

        let sink: AgentError = SinkError::Write {
            path: PathBuf::from("/tmp/out.md"),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert_eq!(sink.kind(), "io");
        assert!(sink.to_string().contains("disk full"));
    }
}
