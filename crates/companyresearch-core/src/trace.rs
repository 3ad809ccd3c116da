use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One handoff observed by the Supervisor while driving a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub agent: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Ordered handoff log for a single run, attached to the terminal message.
#[derive(Debug, Clone, Default)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, agent: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent {
            agent: agent.into(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).unwrap_or_default()
    }
}

/// Numbered, human-readable handoff listing.
pub fn render_trace(events: &[TraceEvent]) -> String {
    let mut output = String::from("Handoff trace:\n");
    if events.is_empty() {
        output.push_str("  (no handoffs recorded)\n");
    }
    for (position, event) in events.iter().enumerate() {
        let _ = writeln!(
            output,
            "  {}. [{}] {}: {}",
            position + 1,
            event.at.format("%H:%M:%S%.3f"),
            event.agent,
            event.message
        );
    }
    output
}

/// Write `events` as pretty JSON to `<dir>/<session_id>.json`.
pub fn persist_trace(
    dir: impl AsRef<Path>,
    session_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{session_id}.json"));
    let body = serde_json::to_vec_pretty(events).context("failed to encode trace")?;
    fs::write(&path, body)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}
