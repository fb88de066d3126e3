//! Crewflow core: a task-dependency and execution-ordering engine for crews
//! of LLM-backed agents.
//!
//! Agents and tasks are declared as data, compiled into a validated
//! [`TaskGraph`], grouped into crews by a [`PipelineBuilder`] and executed by
//! the [`CrewExecutor`]. The [`Orchestrator`] runs a whole pipeline for one
//! input and hands the designated outputs to a [`ReportWriter`].

pub mod backend;
pub mod config;
pub mod crew;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod render;
pub mod report;
pub mod research;
mod security;
pub mod store;
pub mod telemetry;
pub mod tools;
mod trace;

pub use backend::{
    BackendReply, CohereBackend, CompletionRequest, InferenceBackend, ToolCall, ToolExchange,
};
pub use config::{Config, ConfigLoader};
pub use crew::{Crew, CrewPlan, Pipeline, PipelineBuilder, Strategy};
pub use error::{
    BackendError, CrewFailure, CrewflowError, GraphError, PersistenceError, StoreError, TaskError,
    TemplateError, ToolError,
};
pub use events::{Event, EventCollector, TaskOutcome, drain_events};
pub use executor::{CrewExecutor, CrewOutput};
pub use graph::{
    Agent, AgentId, ExecutionGroup, ExecutionPlan, OutputTarget, TaskGraph, TaskGraphBuilder,
    TaskId, TaskSpec,
};
pub use logging::{RunLogInput, log_run_completion};
pub use orchestrator::{Orchestrator, RunReport, RunStatus};
pub use render::{Inputs, Template};
pub use report::{ReportOutcome, ReportTarget, ReportWriter, TextReportWriter};
pub use research::{report_targets, research_pipeline};
pub use security::{SecretValue, require_env};
pub use store::{OutputStore, TaskOutput};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use tools::{
    FileWriterTool, SearchHit, SearchProvider, SerperSearch, Tool, ToolDescriptor, ToolRegistry,
    WebSearchTool,
};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
