//! Agent contract shared by the Supervisor and its delegates.

use std::time::Instant;

use companyresearch_core::{metrics, HandoffMessage, NextAgent};

/// A single-responsibility step in the handoff pipeline.
///
/// `run` never fails: every error is folded into a `failed` message so the
/// caller only ever inspects `status`.
#[async_trait::async_trait]
pub trait HandoffAgent: Send + Sync {
    /// The name messages use to address this agent.
    fn name(&self) -> NextAgent;

    async fn run(&self, message: HandoffMessage) -> HandoffMessage;
}

/// Records duration and outcome of one agent step.
pub(crate) struct StepTimer {
    agent: NextAgent,
    started: Instant,
}

impl StepTimer {
    pub(crate) fn start(agent: NextAgent) -> Self {
        Self {
            agent,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self, message: &HandoffMessage) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        metrics::record_handoff(self.agent.as_str(), message.status.as_str(), duration_ms);
        match &message.error {
            Some(error) => tracing::warn!(
                agent = %self.agent,
                status = %message.status,
                duration_ms,
                %error,
                "agent step failed"
            ),
            None => tracing::info!(
                agent = %self.agent,
                status = %message.status,
                duration_ms,
                "agent step finished"
            ),
        }
    }
}
