use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::events::Event;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub task_id: String,
    pub message: String,
    pub timestamp_ms: u64,
}

impl From<&Event> for TraceEvent {
    fn from(event: &Event) -> Self {
        Self {
            task_id: event.task_id().clone(),
            message: event.describe(),
            timestamp_ms: event.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn from_events(events: &[Event]) -> Self {
        Self {
            events: events.iter().map(TraceEvent::from).collect(),
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                task_id: event.task_id.clone(),
                message: event.message.clone(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(output, "{}. {} -> {}", step.index, step.task_id, step.message);
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n");
        for step in &self.steps {
            let label = sanitize_mermaid(&format!("{}: {}", step.task_id, step.message));
            let _ = writeln!(output, "  step{}[\"{label}\"]", step.index);
        }
        for idx in 1..self.steps.len() {
            let _ = writeln!(output, "  step{idx} --> step{}", idx + 1);
        }
        output
    }

    pub fn render_graphviz(&self) -> String {
        if self.steps.is_empty() {
            return "digraph Trace {\n  // no trace events captured\n}".to_string();
        }

        let mut output = String::from("digraph Trace {\n  rankdir=LR;\n  node [shape=box];\n");
        for step in &self.steps {
            let label = format!("{}: {}", step.task_id, escape_graphviz(&step.message));
            let _ = writeln!(output, "  step{} [label=\"{label}\"];", step.index);
        }
        for idx in 1..self.steps.len() {
            let _ = writeln!(output, "  step{idx} -> step{};", idx + 1);
        }
        output.push_str("}\n");
        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

fn escape_graphviz(text: &str) -> String {
    text.replace('"', "\\\"").replace('\n', " ")
}

pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventCollector, TaskOutcome, drain_events};

    fn sample() -> TraceCollector {
        let (collector, mut receiver) = EventCollector::new();
        collector.emit_start("background", "company_analysis", "company_researcher");
        collector.emit_finish(
            "background",
            "company_analysis",
            "company_researcher",
            TaskOutcome::Success,
            40,
        );
        TraceCollector::from_events(&drain_events(&mut receiver))
    }

    #[test]
    fn markdown_renders_steps() {
        let markdown = sample().summary().render_markdown();

        assert!(markdown.contains("1. company_analysis -> started by company_researcher"));
        assert!(markdown.contains("2. company_analysis -> completed in 40 ms"));
    }

    #[test]
    fn mermaid_and_graphviz_render_sequences() {
        let summary = sample().summary();

        let mermaid = summary.render_mermaid();
        assert!(mermaid.starts_with("flowchart TD"));
        assert!(mermaid.contains("step1 --> step2"));

        let graphviz = summary.render_graphviz();
        assert!(graphviz.contains("digraph Trace"));
        assert!(graphviz.contains("step1 -> step2;"));
    }

    #[test]
    fn trace_is_persisted_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let trace = sample();
        let path = persist_trace(dir.path().join("traces"), "run-1", trace.events()).unwrap();

        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: Vec<TraceEvent> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
