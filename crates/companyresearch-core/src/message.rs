//! Handoff envelope exchanged between the Supervisor, Researcher and
//! Document Creator.
//!
//! A message is built fresh at every handoff and consumed once by its
//! receiver; nothing mutates a message after it has been sent.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentError;

pub type Payload = Map<String, Value>;

/// Semantics of the step a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    /// Caller → Supervisor.
    ResearchCompany,
    /// Supervisor ↔ Researcher.
    CompanyResearch,
    /// Supervisor ↔ Document Creator.
    CreateReport,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::ResearchCompany => "research_company",
            TaskName::CompanyResearch => "company_research",
            TaskName::CreateReport => "create_report",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intended receiver of a message. `None` marks the terminal message handed
/// back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAgent {
    Supervisor,
    Researcher,
    DocumentCreator,
    None,
}

impl NextAgent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAgent::Supervisor => "supervisor",
            NextAgent::Researcher => "researcher",
            NextAgent::DocumentCreator => "document_creator",
            NextAgent::None => "none",
        }
    }
}

impl fmt::Display for NextAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of the step a message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    /// Pending and in-progress steps settle exactly once; settled steps never move.
    pub fn can_transition_to(&self, next: Status) -> bool {
        match self {
            Status::Pending => next != Status::Pending,
            Status::InProgress => next.is_terminal(),
            Status::Completed | Status::Failed => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffMessage {
    pub task_name: TaskName,
    pub payload: Payload,
    pub next_agent: NextAgent,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Payload,
}

impl HandoffMessage {
    pub fn new(task_name: TaskName, next_agent: NextAgent, status: Status, payload: Payload) -> Self {
        Self {
            task_name,
            payload,
            next_agent,
            status,
            file_path: None,
            error: None,
            meta: Map::new(),
        }
    }

    pub fn completed(task_name: TaskName, next_agent: NextAgent, payload: Payload) -> Self {
        Self::new(task_name, next_agent, Status::Completed, payload)
    }

    /// Build a failed message. The error text is never empty.
    pub fn failed(
        task_name: TaskName,
        next_agent: NextAgent,
        payload: Payload,
        error: &AgentError,
    ) -> Self {
        let mut message = Self::new(task_name, next_agent, Status::Failed, payload);
        let text = error.to_string();
        message.error = Some(if text.trim().is_empty() {
            format!("{} failure", error.kind())
        } else {
            text
        });
        message
            .meta
            .insert("error_kind".to_string(), Value::from(error.kind()));
        message
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Trimmed, non-empty string value from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn payload_object(&self, key: &str) -> Option<&Payload> {
        self.payload.get(key).and_then(Value::as_object)
    }
}

/// Build a payload map from `(key, value)` pairs.
pub fn payload<I, K>(entries: I) -> Payload
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enums_use_snake_case_tags() {
        let message = HandoffMessage::new(
            TaskName::CreateReport,
            NextAgent::DocumentCreator,
            Status::InProgress,
            payload([("company_name", json!("Acme Co"))]),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["task_name"], "create_report");
        assert_eq!(value["next_agent"], "document_creator");
        assert_eq!(value["status"], "in_progress");
        assert!(value.get("error").is_none());

        let back: HandoffMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn failed_message_always_carries_error() {
        let message = HandoffMessage::failed(
            TaskName::CompanyResearch,
            NextAgent::Supervisor,
            Payload::new(),
            &AgentError::validation(""),
        );
        assert_eq!(message.status, Status::Failed);
        assert_eq!(message.error.as_deref(), Some("validation failure"));
        assert_eq!(message.meta["error_kind"], "validation");
    }

    #[test]
    fn status_transitions_settle_once() {
        assert!(Status::Pending.can_transition_to(Status::InProgress));
        assert!(Status::InProgress.can_transition_to(Status::Completed));
        assert!(Status::InProgress.can_transition_to(Status::Failed));
        assert!(!Status::InProgress.can_transition_to(Status::Pending));
        assert!(!Status::Completed.can_transition_to(Status::Failed));
        assert!(!Status::Failed.can_transition_to(Status::Completed));
    }

    #[test]
    fn payload_str_ignores_blank_and_non_string_values() {
        let message = HandoffMessage::new(
            TaskName::ResearchCompany,
            NextAgent::Supervisor,
            Status::Pending,
            payload([
                ("company_name", json!("  Acme Co ")),
                ("blank", json!("   ")),
                ("number", json!(4)),
            ]),
        );
        assert_eq!(message.payload_str("company_name"), Some("Acme Co"));
        assert_eq!(message.payload_str("blank"), None);
        assert_eq!(message.payload_str("number"), None);
        assert_eq!(message.payload_str("missing"), None);
    }
}
