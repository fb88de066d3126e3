use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct CrewMetrics {
    task_runs: Counter<u64>,
    task_duration_ms: Histogram<f64>,
    tool_calls: Counter<u64>,
    crew_runs: Counter<u64>,
}

static METRICS: OnceCell<CrewMetrics> = OnceCell::new();

fn handles() -> &'static CrewMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("crewflow.executor");
        CrewMetrics {
            task_runs: meter
                .u64_counter("crewflow_task_runs_total")
                .with_description("Task executions by crew and status")
                .init(),
            task_duration_ms: meter
                .f64_histogram("crewflow_task_duration_ms")
                .with_description("Task runtime in milliseconds")
                .init(),
            tool_calls: meter
                .u64_counter("crewflow_tool_calls_total")
                .with_description("Tool invocations by tool and status")
                .init(),
            crew_runs: meter
                .u64_counter("crewflow_crew_runs_total")
                .with_description("Crew runs by status")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) -> Result<()> {
    if std::env::var("CREWFLOW_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "CREWFLOW_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export executor metrics."
        );
    }
    Ok(())
}

/// Record a finished task (no-op if no provider installed).
pub fn record_task_run(crew: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("crew", crew.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    metrics.task_runs.add(1, &attrs);
    metrics.task_duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_tool_call(tool: &str, succeeded: bool) {
    let status = if succeeded { "ok" } else { "error" };
    handles().tool_calls.add(
        1,
        &[
            KeyValue::new("tool", tool.to_string()),
            KeyValue::new("status", status),
        ],
    );
}

pub fn record_crew_run(crew: &str, status: &str) {
    handles().crew_runs.add(
        1,
        &[
            KeyValue::new("crew", crew.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );
}
