//! File sink for rendered reports.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::SinkError;

const MAX_NAME_ATTEMPTS: usize = 100;

pub trait ReportSink: Send + Sync {
    /// Persist `markdown` for `company_name` and return the absolute path written.
    fn write(&self, company_name: &str, markdown: &str) -> Result<PathBuf, SinkError>;
}

pub type DynSink = Arc<dyn ReportSink>;

/// Writes `<slug>-<YYYYmmdd-HHMMSS>.md` files into a directory.
///
/// Content goes to a temp file in the target directory first and is then
/// renamed into place, so a failed write never leaves a partial report and
/// an existing report is never overwritten.
#[derive(Debug, Clone)]
pub struct MarkdownFileSink {
    output_dir: PathBuf,
}

impl MarkdownFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn prepare_dir(&self) -> Result<PathBuf, SinkError> {
        let directory_error = |source| SinkError::Directory {
            path: self.output_dir.clone(),
            source,
        };
        fs::create_dir_all(&self.output_dir).map_err(directory_error)?;
        fs::canonicalize(&self.output_dir).map_err(directory_error)
    }
}

impl ReportSink for MarkdownFileSink {
    fn write(&self, company_name: &str, markdown: &str) -> Result<PathBuf, SinkError> {
        let dir = self.prepare_dir()?;
        let base_name = format!(
            "{}-{}",
            slugify(company_name),
            Utc::now().format("%Y%m%d-%H%M%S")
        );

        let mut staged = NamedTempFile::new_in(&dir).map_err(|source| SinkError::Write {
            path: dir.clone(),
            source,
        })?;
        let written = staged.write_all(markdown.as_bytes()).and_then(|()| staged.flush());
        written.map_err(|source| SinkError::Write {
            path: staged.path().to_path_buf(),
            source,
        })?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 0 {
                format!("{base_name}.md")
            } else {
                format!("{base_name}-{attempt}.md")
            };
            let target = dir.join(file_name);

            match staged.persist_noclobber(&target) {
                Ok(_) => {
                    info!(path = %target.display(), bytes = markdown.len(), "report written");
                    return Ok(target);
                }
                Err(err) if err.error.kind() == ErrorKind::AlreadyExists => staged = err.file,
                Err(err) => {
                    return Err(SinkError::Write {
                        path: target,
                        source: err.error,
                    });
                }
            }
        }

        Err(SinkError::Write {
            path: dir.join(format!("{base_name}.md")),
            source: std::io::Error::new(
                ErrorKind::AlreadyExists,
                "no free report file name available",
            ),
        })
    }
}

/// Lowercase alphanumerics; every other character becomes `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug.to_string()
    }
}
