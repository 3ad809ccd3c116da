use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::config::LoggingConfig;

const LOG_DIR_ENV: &str = "COMPANYRESEARCH_LOG_DIR";
const DEFAULT_LOG_DIR: &str = "data/logs";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
        (
            "tavily_token",
            Regex::new(r"(tvly-[A-Za-z0-9]{16,})").expect("invalid tavily_token regex"),
        ),
    ]
});

/// Where run records go and how long they are kept.
#[derive(Debug, Clone)]
pub struct RunLogSettings {
    pub base_dir: PathBuf,
    pub retention_days: u64,
}

impl RunLogSettings {
    /// Configured directory, then `COMPANYRESEARCH_LOG_DIR`, then `data/logs`.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let base_dir = config
            .dir
            .clone()
            .or_else(|| std::env::var(LOG_DIR_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        Self {
            base_dir,
            retention_days: config.retention_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub session_id: String,
    pub company: String,
    pub status: String,
    pub file_path: Option<String>,
    pub error: Option<String>,
    pub sources: Vec<String>,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    session_id: String,
    company: String,
    status: String,
    file_path: Option<String>,
    error: Option<String>,
    sources: Vec<String>,
    trace_path: Option<String>,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    session_id: String,
    redactions: Vec<String>,
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert((*name).to_string());
        }
    }
    output
}

/// Append one run record to `<base>/<YYYY>/<MM>/runs.jsonl`.
///
/// Secrets that leak into errors or sources are redacted; every redaction is
/// also noted in `audit.jsonl` next to the run log.
pub fn log_run_completion(settings: &RunLogSettings, input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let company = sanitize_text(&input.company, &mut redactions);
    let error = input
        .error
        .as_deref()
        .map(|value| sanitize_text(value, &mut redactions));
    let sources: Vec<String> = input
        .sources
        .iter()
        .map(|source| sanitize_text(source, &mut redactions))
        .collect();

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        session_id: input.session_id.clone(),
        company,
        status: input.status,
        file_path: input.file_path,
        error,
        sources,
        trace_path: input.trace_path,
        redactions: redactions.into_iter().collect(),
    };

    let month_dir = settings
        .base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let run_log_path = month_dir.join("runs.jsonl");
    append_json_line(&run_log_path, &record)?;

    if !record.redactions.is_empty() {
        let audit = AuditLogRecord {
            timestamp: record.timestamp.clone(),
            session_id: input.session_id.clone(),
            redactions: record.redactions.clone(),
        };
        append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
        warn!(
            session_id = %input.session_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    enforce_retention(&settings.base_dir, settings.retention_days)?;

    Ok(run_log_path)
}

fn enforce_retention(base_dir: &Path, retention_days: u64) -> Result<()> {
    if retention_days == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}
