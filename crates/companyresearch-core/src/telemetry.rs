use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::ResearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub env_filter: Option<String>,
    pub default_level: String,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            default_level: "info".to_string(),
            with_ansi: true,
            with_target: false,
        }
    }
}

impl TelemetryOptions {
    /// Filter directive in effect: explicit filter, then `RUST_LOG`, then the
    /// configured level applied to this workspace's crates.
    pub fn resolve_filter(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "warn,companyresearch_core={level},companyresearch_agents={level},companyresearch={level}",
                    level = self.default_level
                )
            })
    }
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), ResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(options.resolve_filter()))
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
