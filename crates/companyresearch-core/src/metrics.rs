use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    handoffs: Counter<u64>,
    duration_ms: Histogram<f64>,
    parse_fallbacks: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("companyresearch.pipeline");
        PipelineMetrics {
            handoffs: meter
                .u64_counter("handoffs_total")
                .with_description("Agent steps by agent and resulting status")
                .init(),
            duration_ms: meter
                .f64_histogram("handoff_duration_ms")
                .with_description("Agent step runtime in milliseconds")
                .init(),
            parse_fallbacks: meter
                .u64_counter("research_parse_fallbacks_total")
                .with_description(
                    "Research extractions that needed brace-slice recovery, by outcome",
                )
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("COMPANYRESEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "COMPANYRESEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
    Ok(())
}

/// Record one agent step (no-op if no provider installed).
pub fn record_handoff(agent: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("agent", agent.to_string()),
        KeyValue::new("status", status.to_string()),
    ];

    metrics.handoffs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

/// Record that LLM output was not plain JSON and had to be sliced.
pub fn record_parse_fallback(recovered: bool) {
    let outcome = if recovered { "recovered" } else { "failed" };
    handles()
        .parse_fallbacks
        .add(1, &[KeyValue::new("outcome", outcome)]);
}
