//! Run entry point: one free-form input, every crew of the pipeline in order,
//! then the designated report tasks handed to the report writer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::CrewflowError;
use crate::crew::Pipeline;
use crate::error::PersistenceError;
use crate::executor::CrewExecutor;
use crate::graph::TaskId;
use crate::render::Inputs;
use crate::report::{ReportTarget, ReportWriter};
use crate::store::OutputStore;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed {
        crew: String,
        task: TaskId,
        error: String,
    },
}

/// Everything a caller needs after a run, successful or not.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub input: String,
    pub status: RunStatus,
    /// Raw text of the last crew's final task.
    pub final_output: Option<String>,
    /// Every recorded output, keyed by task id.
    pub outputs: BTreeMap<TaskId, String>,
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<PersistenceError>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Human-readable status line for the caller.
    pub fn status_message(&self) -> String {
        match &self.status {
            RunStatus::Completed => {
                let mut message = if self.artifacts.is_empty() {
                    format!("Pipeline executed successfully for '{}'. No reports were saved.", self.input)
                } else {
                    let paths = self
                        .artifacts
                        .iter()
                        .map(|path| path.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "Pipeline executed successfully for '{}'. Reports saved to: {paths}",
                        self.input
                    )
                };
                if !self.warnings.is_empty() {
                    message.push_str(&format!(" ({} warning(s))", self.warnings.len()));
                }
                message
            }
            RunStatus::Failed { crew, task, error } => format!(
                "Pipeline failed for '{}': crew '{crew}' stopped at task '{task}': {error}",
                self.input
            ),
        }
    }
}

pub struct Orchestrator {
    pipeline: Pipeline,
    executor: CrewExecutor,
    reports: Arc<dyn ReportWriter>,
    targets: Vec<ReportTarget>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, executor: CrewExecutor, reports: Arc<dyn ReportWriter>) -> Self {
        Self {
            pipeline,
            executor,
            reports,
            targets: Vec::new(),
        }
    }

    pub fn with_report(mut self, target: ReportTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_reports(mut self, targets: impl IntoIterator<Item = ReportTarget>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run every crew against one shared store. A crew failure ends the run
    /// and is reported in [`RunReport::status`]; `Err` is reserved for
    /// problems found before anything executes.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run(&self, input: &str) -> Result<RunReport, CrewflowError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CrewflowError::InvalidConfiguration(
                "input must not be blank".to_string(),
            ));
        }
        self.check_targets()?;

        let run_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        info!(crews = self.pipeline.crews().len(), "Starting run");

        let graph = self.pipeline.graph();
        let inputs = Inputs::single(graph.input_key(), input);
        let store = OutputStore::new();
        let started = Instant::now();

        let mut status = RunStatus::Completed;
        let mut final_output = None;
        let mut warnings = Vec::new();

        for plan in self.pipeline.crews() {
            match self.executor.run_crew(graph, plan, &inputs, &store).await {
                Ok(output) => {
                    warnings.extend(output.warnings);
                    final_output = Some(output.final_output);
                }
                Err(failure) => {
                    warn!(crew = %failure.crew, task_id = %failure.task, error = %failure.error, "Run failed");
                    status = RunStatus::Failed {
                        crew: failure.crew,
                        task: failure.task,
                        error: failure.error.to_string(),
                    };
                    final_output = None;
                    break;
                }
            }
        }

        let outputs = store.snapshot();
        let mut artifacts = Vec::new();
        if status == RunStatus::Completed && !self.targets.is_empty() {
            let written = self.reports.write_reports(&self.targets, &outputs);
            artifacts = written.artifacts;
            warnings.extend(written.warnings);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            duration_ms,
            outputs = outputs.len(),
            artifacts = artifacts.len(),
            warnings = warnings.len(),
            "Run finished"
        );

        Ok(RunReport {
            run_id,
            input: input.to_string(),
            status,
            final_output,
            outputs,
            artifacts,
            warnings,
            duration_ms,
        })
    }

    fn check_targets(&self) -> Result<(), CrewflowError> {
        let producible = |task_id: &str| {
            self.pipeline.graph().task(task_id).is_some()
                || self
                    .pipeline
                    .crews()
                    .iter()
                    .any(|plan| plan.final_task() == task_id)
        };
        match self.targets.iter().find(|target| !producible(&target.task_id)) {
            Some(target) => Err(CrewflowError::InvalidConfiguration(format!(
                "report '{}' refers to unknown task '{}'",
                target.file_name, target.task_id
            ))),
            None => Ok(()),
        }
    }
}
