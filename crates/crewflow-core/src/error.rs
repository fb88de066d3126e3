use std::path::PathBuf;

use thiserror::Error;

use crate::graph::{AgentId, TaskId};

/// Core error type for Crewflow.
#[derive(Debug, Error)]
pub enum CrewflowError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrewflowError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Build-time validation failures of the task topology.
///
/// Any of these is fatal: nothing executes once one is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),
    #[error("duplicate agent id '{0}'")]
    DuplicateAgent(AgentId),
    #[error("task '{task}' is assigned to unknown agent '{agent}'")]
    UnknownAgent { task: TaskId, agent: AgentId },
    #[error("'{owner}' references unknown tool '{tool}'")]
    UnknownTool { owner: String, tool: String },
    #[error("task '{task}' lists unknown context task '{missing}'")]
    DanglingContext { task: TaskId, missing: TaskId },
    #[error("dependency cycle detected involving task '{0}'")]
    Cycle(TaskId),
    #[error("template of '{owner}' is invalid: {reason}")]
    Template { owner: String, reason: String },
    #[error("unknown task '{0}' requested in execution plan")]
    UnknownTask(TaskId),
    #[error("crew '{crew}' is invalid: {reason}")]
    InvalidCrew { crew: String, reason: String },
    #[error("task '{task}' is listed by both crew '{first}' and crew '{second}'")]
    SharedTask {
        task: TaskId,
        first: String,
        second: String,
    },
    #[error(
        "task '{task}' in crew '{crew}' depends on '{dependency}', which does not run earlier"
    )]
    ContextOutOfOrder {
        crew: String,
        task: TaskId,
        dependency: TaskId,
    },
}

/// Template parsing or substitution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    #[error("invalid placeholder name '{0}'")]
    InvalidName(String),
    #[error("no value supplied for placeholder '{0}'")]
    MissingInput(String),
}

/// Failure raised by a bound tool.
///
/// Tool failures are reported back to the backend as observations, so they
/// are recoverable unless the backend gives up.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },
    #[error("tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },
    #[error("tool '{tool}' I/O error on {path}: {source}")]
    Io {
        tool: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Inference backend failure. Aborts the current crew run.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend returned malformed content: {0}")]
    Malformed(String),
    #[error("tool loop exceeded {0} iterations without a final answer")]
    IterationLimit(usize),
    #[error("failed to render prompt: {0}")]
    Template(#[from] TemplateError),
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Request(_) => true,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failure to persist a task output or report. Surfaced as a warning.
#[derive(Debug, Error)]
#[error("failed to persist '{subject}' to {path}: {reason}")]
pub struct PersistenceError {
    pub subject: String,
    pub path: PathBuf,
    pub reason: String,
}

impl PersistenceError {
    pub fn new(subject: impl Into<String>, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            subject: subject.into(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Violation of the write-once rule for task outputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("output for task '{0}' was already recorded")]
    AlreadyRecorded(TaskId),
}

/// Why a single task did not produce an output.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("context task '{0}' has no recorded output")]
    MissingContext(TaskId),
    #[error("agent '{0}' is not declared")]
    UnknownAgent(AgentId),
}

impl From<TemplateError> for TaskError {
    fn from(err: TemplateError) -> Self {
        TaskError::Backend(BackendError::Template(err))
    }
}

/// A crew run that stopped because one of its tasks failed.
#[derive(Debug, Error)]
#[error("crew '{crew}' aborted at task '{task}': {error}")]
pub struct CrewFailure {
    pub crew: String,
    pub task: TaskId,
    #[source]
    pub error: TaskError,
}
