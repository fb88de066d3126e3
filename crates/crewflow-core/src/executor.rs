//! Crew executor: runs a validated crew plan against the shared output store.
//!
//! Sequential crews walk their execution groups in order. Within a group the
//! `concurrent` tasks are polled together with the serial chain of the
//! remaining tasks, bounded by a semaphore. Hierarchical crews delegate every
//! task in plan order and finish with a synthesis by the manager agent.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::backend::{BackendReply, CompletionRequest, InferenceBackend, ToolCall, ToolExchange};
use crate::config::ExecutorConfig;
use crate::crew::{CrewPlan, Strategy};
use crate::error::{BackendError, CrewFailure, PersistenceError, TaskError};
use crate::events::{EventCollector, TaskOutcome};
use crate::graph::{AgentNode, OutputTarget, TaskGraph, TaskId, TaskNode};
use crate::metrics::{record_crew_run, record_task_run, record_tool_call};
use crate::render::{ContextEntry, Inputs, PromptParts, Template, render_prompt};
use crate::store::{OutputStore, TaskOutput};
use crate::tools::{ToolRegistry, write_file};

/// Result of a crew that ran to completion.
#[derive(Debug)]
pub struct CrewOutput {
    pub crew: String,
    pub final_task: TaskId,
    /// Raw text of the final task.
    pub final_output: String,
    /// Outputs produced by this crew, keyed by task id.
    pub task_outputs: BTreeMap<TaskId, String>,
    pub warnings: Vec<PersistenceError>,
    pub duration_ms: u64,
}

/// What a single agent turn needs, whether it comes from a declared task or
/// from a manager synthesis.
struct Job<'a> {
    task_id: &'a str,
    owner: &'a AgentNode,
    brief: Brief<'a>,
    expected_output: &'a str,
    context: Vec<&'a str>,
    tools: &'a [String],
    output: Option<&'a OutputTarget>,
}

enum Brief<'a> {
    Template(&'a Template),
    Text(String),
}

impl<'a> Job<'a> {
    fn for_task(graph: &'a TaskGraph, node: &'a TaskNode) -> Self {
        let owner = graph.owner(node);
        Self {
            task_id: node.id(),
            owner,
            brief: Brief::Template(&node.description),
            expected_output: &node.spec.expected_output,
            context: graph.context_of(node).map(TaskNode::id).collect(),
            tools: node.spec.tools.as_deref().unwrap_or(&owner.agent.tools),
            output: node.spec.output.as_ref(),
        }
    }
}

pub struct CrewExecutor {
    config: ExecutorConfig,
    tools: ToolRegistry,
    events: EventCollector,
    semaphore: Arc<Semaphore>,
}

impl CrewExecutor {
    pub fn new(config: ExecutorConfig, tools: ToolRegistry, events: EventCollector) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            config,
            tools,
            events,
            semaphore,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn events(&self) -> &EventCollector {
        &self.events
    }

    /// Execute every task of `plan`. The first failure aborts the rest of the
    /// crew; outputs already recorded stay in `store`.
    #[instrument(skip_all, fields(crew = %plan.crew().name))]
    pub async fn run_crew(
        &self,
        graph: &TaskGraph,
        plan: &CrewPlan,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<CrewOutput, CrewFailure> {
        let crew = &plan.crew().name;
        info!(task_count = plan.plan().len(), "Starting crew");
        let started = Instant::now();

        let result = match &plan.crew().strategy {
            Strategy::Sequential => self.run_sequential(graph, plan, inputs, store).await,
            Strategy::Hierarchical { manager } => {
                self.run_hierarchical(graph, plan, manager, inputs, store)
                    .await
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let warnings = match result {
            Ok(warnings) => warnings,
            Err(failure) => {
                warn!(task_id = %failure.task, error = %failure.error, "Crew aborted");
                record_crew_run(crew, "failure");
                return Err(failure);
            }
        };

        let final_task = plan.final_task();
        let mut task_outputs: BTreeMap<TaskId, String> = plan
            .crew()
            .tasks
            .iter()
            .filter_map(|id| store.raw(id).map(|raw| (id.clone(), raw)))
            .collect();
        if let Some(raw) = store.raw(&final_task) {
            task_outputs.insert(final_task.clone(), raw);
        }
        let final_output = task_outputs.get(&final_task).cloned().unwrap_or_default();

        info!(
            duration_ms,
            warnings = warnings.len(),
            final_task = %final_task,
            "Crew complete"
        );
        record_crew_run(crew, "success");

        Ok(CrewOutput {
            crew: crew.clone(),
            final_task,
            final_output,
            task_outputs,
            warnings,
            duration_ms,
        })
    }

    async fn run_sequential(
        &self,
        graph: &TaskGraph,
        plan: &CrewPlan,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<Vec<PersistenceError>, CrewFailure> {
        let crew = plan.crew().name.as_str();
        let mut warnings = Vec::new();

        for (index, group) in plan.plan().groups.iter().enumerate() {
            let nodes: Vec<&TaskNode> = group
                .tasks
                .iter()
                .filter_map(|id| graph.task(id))
                .collect();
            let (parallel, serial): (Vec<&TaskNode>, Vec<&TaskNode>) =
                nodes.into_iter().partition(|node| node.spec.concurrent);
            debug!(
                group = index,
                concurrent = parallel.len(),
                serial = serial.len(),
                "Executing group"
            );

            let halted = AtomicBool::new(false);
            let halted = &halted;
            let concurrent = join_all(parallel.iter().map(|node| async move {
                self.execute_unless_halted(crew, Job::for_task(graph, node), inputs, store, halted)
                    .await
                    .map(|result| (*node, result))
            }));
            let chain = async {
                let mut results = Vec::with_capacity(serial.len());
                for node in &serial {
                    let job = Job::for_task(graph, node);
                    match self
                        .execute_unless_halted(crew, job, inputs, store, halted)
                        .await
                    {
                        Some(result) => results.push((*node, result)),
                        None => break,
                    }
                }
                results
            };

            let (concurrent_results, mut results) = futures::join!(concurrent, chain);
            results.extend(concurrent_results.into_iter().flatten());
            results.sort_by_key(|(node, _)| node.order);

            for (node, result) in results {
                match result {
                    Ok(warning) => warnings.extend(warning),
                    Err(error) => {
                        return Err(CrewFailure {
                            crew: crew.to_string(),
                            task: node.id().to_string(),
                            error,
                        });
                    }
                }
            }
        }

        Ok(warnings)
    }

    async fn run_hierarchical(
        &self,
        graph: &TaskGraph,
        plan: &CrewPlan,
        manager_id: &str,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<Vec<PersistenceError>, CrewFailure> {
        let crew = plan.crew().name.as_str();
        let synthesis_id = plan.crew().manager_task_id();
        let fail = |task: &str, error: TaskError| CrewFailure {
            crew: crew.to_string(),
            task: task.to_string(),
            error,
        };
        let manager = graph
            .agent(manager_id)
            .ok_or_else(|| fail(&synthesis_id, TaskError::UnknownAgent(manager_id.to_string())))?;

        let mut warnings = Vec::new();
        let order = plan.plan().order();
        for task_id in &order {
            let Some(node) = graph.task(task_id) else {
                continue;
            };
            self.events.emit_delegation(crew, manager_id, node.id());
            debug!(manager = manager_id, task_id = %node.id(), "Delegating task");
            let warning = self
                .execute(crew, Job::for_task(graph, node), inputs, store)
                .await
                .map_err(|error| fail(node.id(), error))?;
            warnings.extend(warning);
        }

        let brief = synthesis_brief(graph, crew, &order, inputs)
            .map_err(|error| fail(&synthesis_id, error))?;
        let expected_output = order
            .last()
            .and_then(|id| graph.task(id))
            .map(|node| node.spec.expected_output.as_str())
            .unwrap_or_default();
        let job = Job {
            task_id: &synthesis_id,
            owner: manager,
            brief: Brief::Text(brief),
            expected_output,
            context: order.iter().map(|id| id.as_str()).collect(),
            tools: &manager.agent.tools,
            output: None,
        };
        let warning = self
            .execute(crew, job, inputs, store)
            .await
            .map_err(|error| fail(&synthesis_id, error))?;
        warnings.extend(warning);

        Ok(warnings)
    }

    async fn execute(
        &self,
        crew: &str,
        job: Job<'_>,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<Option<PersistenceError>, TaskError> {
        // The semaphore is never closed.
        let _permit = self.semaphore.acquire().await.ok();
        self.run_job(crew, job, inputs, store).await
    }

    /// Like [`Self::execute`], but returns `None` without starting the job
    /// once a sibling in the group has failed. A failure sets `halted`.
    async fn execute_unless_halted(
        &self,
        crew: &str,
        job: Job<'_>,
        inputs: &Inputs,
        store: &OutputStore,
        halted: &AtomicBool,
    ) -> Option<Result<Option<PersistenceError>, TaskError>> {
        let _permit = self.semaphore.acquire().await.ok();
        if halted.load(Ordering::SeqCst) {
            debug!(task_id = %job.task_id, "Skipping task after failure in group");
            return None;
        }
        let result = self.run_job(crew, job, inputs, store).await;
        if result.is_err() {
            halted.store(true, Ordering::SeqCst);
        }
        Some(result)
    }

    /// Run one job end to end: events, metrics, output recording and the
    /// optional write to its destination.
    async fn run_job(
        &self,
        crew: &str,
        job: Job<'_>,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<Option<PersistenceError>, TaskError> {
        let agent = job.owner.agent.id.as_str();
        let span = info_span!("task", task_id = %job.task_id, agent = %agent);

        async {
            self.events.emit_start(crew, job.task_id, agent);
            let started = Instant::now();
            let result = self.produce(&job, inputs, store).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(raw) => {
                    info!(duration_ms, bytes = raw.len(), "Task complete");
                    self.events.emit_finish(
                        crew,
                        job.task_id,
                        agent,
                        TaskOutcome::Success,
                        duration_ms,
                    );
                    record_task_run(crew, "success", duration_ms);
                    Ok(match job.output {
                        Some(target) => self.persist(job.task_id, target, raw).await,
                        None => None,
                    })
                }
                Err(err) => {
                    warn!(duration_ms, error = %err, "Task failed");
                    self.events.emit_finish(
                        crew,
                        job.task_id,
                        agent,
                        TaskOutcome::Failure {
                            reason: err.to_string(),
                        },
                        duration_ms,
                    );
                    record_task_run(crew, "failure", duration_ms);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn produce(
        &self,
        job: &Job<'_>,
        inputs: &Inputs,
        store: &OutputStore,
    ) -> Result<String, TaskError> {
        let mut upstream = Vec::with_capacity(job.context.len());
        for dep in &job.context {
            let output = store
                .raw(dep)
                .ok_or_else(|| TaskError::MissingContext(dep.to_string()))?;
            upstream.push((*dep, output));
        }
        let context: Vec<ContextEntry<'_>> = upstream
            .iter()
            .map(|(task_id, output)| ContextEntry {
                task_id: *task_id,
                output: output.as_str(),
            })
            .collect();

        let goal = job.owner.goal.render(inputs)?;
        let backstory = job.owner.backstory.render(inputs)?;
        let description = match &job.brief {
            Brief::Template(template) => template.render(inputs)?,
            Brief::Text(text) => text.clone(),
        };
        let tools = self.tools.descriptors(job.tools);

        let prompt = render_prompt(&PromptParts {
            role: &job.owner.agent.role,
            goal: &goal,
            backstory: &backstory,
            description: &description,
            expected_output: job.expected_output,
            context: &context,
            tools: &tools,
        });

        let request = CompletionRequest::new(job.task_id, prompt, tools);
        let raw = self
            .converse(job.owner.agent.backend.as_ref(), request)
            .await?;

        store.record(TaskOutput::new(job.task_id, &job.owner.agent.id, raw.clone()))?;
        Ok(raw)
    }

    /// Bounded tool loop: every tool call is answered with an observation
    /// until the backend gives a final answer or the iteration cap is hit.
    async fn converse(
        &self,
        backend: &dyn InferenceBackend,
        mut request: CompletionRequest,
    ) -> Result<String, BackendError> {
        let limit = self.config.max_tool_iterations;
        let mut iterations = 0;

        loop {
            match backend.complete(&request).await? {
                BackendReply::Final(text) => return Ok(text),
                BackendReply::ToolCall(call) => {
                    if iterations >= limit {
                        return Err(BackendError::IterationLimit(limit));
                    }
                    iterations += 1;
                    let observation = self.dispatch(&request, &call).await;
                    request.exchanges.push(ToolExchange {
                        tool: call.tool,
                        input: call.input,
                        observation,
                    });
                }
            }
        }
    }

    async fn dispatch(&self, request: &CompletionRequest, call: &ToolCall) -> String {
        let bound = request.tools.iter().any(|tool| tool.name == call.tool);
        let tool = if bound { self.tools.get(&call.tool) } else { None };

        let (observation, succeeded) = match tool {
            None => {
                let available = request
                    .tools
                    .iter()
                    .map(|tool| tool.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    format!(
                        "Error: tool '{}' is not available. Available tools: [{available}]",
                        call.tool
                    ),
                    false,
                )
            }
            Some(tool) => match tool.invoke(&call.input).await {
                Ok(output) => (output, true),
                Err(err) => (format!("Error: {err}"), false),
            },
        };

        debug!(
            task_id = %request.task_id,
            tool = %call.tool,
            succeeded,
            "Tool call finished"
        );
        self.events
            .emit_tool_call(&request.task_id, &call.tool, &call.input, succeeded);
        record_tool_call(&call.tool, succeeded);
        observation
    }

    async fn persist(
        &self,
        task_id: &str,
        target: &OutputTarget,
        raw: String,
    ) -> Option<PersistenceError> {
        let path: PathBuf = target.path.clone();
        let create_directory = target.create_directory;
        let destination = path.clone();
        let written =
            tokio::task::spawn_blocking(move || write_file(&destination, &raw, create_directory))
                .await;
        let result = match written {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(join) => Err(join.to_string()),
        };

        let shown = path.display().to_string();
        self.events
            .emit_persisted(task_id, &shown, result.is_ok());
        match result {
            Ok(()) => {
                info!(task_id, path = %shown, "Task output saved");
                None
            }
            Err(reason) => {
                warn!(task_id, path = %shown, error = %reason, "Unable to save task output");
                Some(PersistenceError::new(task_id, path, reason))
            }
        }
    }
}

fn synthesis_brief(
    graph: &TaskGraph,
    crew: &str,
    order: &[&TaskId],
    inputs: &Inputs,
) -> Result<String, TaskError> {
    let mut brief = format!(
        "You manage the crew `{crew}`. Your team completed the delegated tasks below; \
         their outputs are in the context."
    );
    brief.push('\n');
    for task_id in order {
        let Some(node) = graph.task(task_id) else {
            continue;
        };
        let description = node.description.render(inputs)?;
        let _ = writeln!(
            brief,
            "- `{}` ({}): {}",
            node.id(),
            graph.owner(node).agent.role,
            description.trim()
        );
    }
    brief.push_str("Combine these outputs into the crew's final result.");
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::Crew;
    use crate::error::ToolError;
    use crate::events::{Event, drain_events};
    use crate::graph::{Agent, TaskGraphBuilder, TaskSpec};
    use crate::tools::{Tool, ToolDescriptor};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Barrier;

    type Reply = Result<BackendReply, BackendError>;

    /// Answers `output of <task>` unless a reply was scripted for the task.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn with(self, task: &str, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(task.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.task_id.clone())
                .collect()
        }

        fn requests_for(&self, task: &str) -> Vec<CompletionRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|request| request.task_id == task)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl InferenceBackend for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<BackendReply, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            let scripted = self
                .replies
                .lock()
                .unwrap()
                .get_mut(&request.task_id)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| {
                Ok(BackendReply::Final(format!("output of {}", request.task_id)))
            })
        }
    }

    /// Blocks until every concurrent participant has arrived.
    struct Rendezvous {
        barrier: Barrier,
    }

    #[async_trait]
    impl InferenceBackend for Rendezvous {
        fn model(&self) -> &str {
            "rendezvous"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<BackendReply, BackendError> {
            self.barrier.wait().await;
            Ok(BackendReply::Final(request.task_id.clone()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".into(),
                description: "Repeat the input.".into(),
                input_hint: "any text".into(),
            }
        }

        async fn invoke(&self, input: &str) -> Result<String, ToolError> {
            if input.is_empty() {
                return Err(ToolError::InvalidInput {
                    tool: "echo".into(),
                    reason: "empty".into(),
                });
            }
            Ok(format!("echo: {input}"))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new().with_tool(Arc::new(Echo))
    }

    fn agent(id: &str, backend: Arc<dyn InferenceBackend>) -> Agent {
        Agent::new(id, format!("{id} role"), "Research {question}", "Veteran", backend)
            .with_tool("echo")
    }

    fn executor(max_tool_iterations: usize) -> (CrewExecutor, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (events, receiver) = EventCollector::new();
        let config = ExecutorConfig {
            max_concurrent_tasks: 4,
            max_tool_iterations,
        };
        (CrewExecutor::new(config, registry(), events), receiver)
    }

    fn inputs() -> Inputs {
        Inputs::single("question", "Acme")
    }

    fn diamond(backend: Arc<dyn InferenceBackend>) -> (TaskGraph, CrewPlan) {
        let graph = TaskGraphBuilder::new("question")
            .agent(agent("analyst", backend))
            .task(TaskSpec::new("a", "analyst", "Study {question}", "notes"))
            .task(TaskSpec::new("b", "analyst", "Compare {question}", "notes"))
            .task(
                TaskSpec::new("c", "analyst", "Summarize", "summary")
                    .with_context("a")
                    .with_context("b"),
            )
            .build(&registry())
            .unwrap();
        let crew = Crew::sequential("research")
            .with_agent("analyst")
            .with_task("a")
            .with_task("b")
            .with_task("c");
        let plan = CrewPlan::new(&graph, crew, &HashSet::new()).unwrap();
        (graph, plan)
    }

    #[tokio::test]
    async fn context_task_runs_after_its_dependencies() {
        let backend = Arc::new(Scripted::default());
        let (graph, plan) = diamond(backend.clone());
        let (executor, mut receiver) = executor(4);
        let store = OutputStore::new();

        let output = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap();

        assert_eq!(backend.calls(), vec!["a", "b", "c"]);
        assert_eq!(output.final_task, "c");
        assert_eq!(output.final_output, "output of c");
        assert_eq!(output.task_outputs.len(), 3);

        let prompt = &backend.requests_for("c")[0].prompt;
        let a = prompt.find("output of a").unwrap();
        let b = prompt.find("output of b").unwrap();
        assert!(a < b);
        assert!(backend.requests_for("a")[0].prompt.contains("Study Acme"));

        let events = drain_events(&mut receiver);
        let finishes = events
            .iter()
            .filter(|event| matches!(event, Event::Finish { .. }))
            .count();
        assert_eq!(finishes, 3);
    }

    #[tokio::test]
    async fn backend_failure_aborts_remaining_tasks() {
        let backend = Arc::new(Scripted::default().with(
            "b",
            Err(BackendError::Status {
                status: 500,
                body: "boom".into(),
            }),
        ));
        let (graph, plan) = diamond(backend.clone());
        let (executor, _receiver) = executor(4);
        let store = OutputStore::new();

        let failure = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap_err();

        assert_eq!(failure.crew, "research");
        assert_eq!(failure.task, "b");
        assert!(matches!(
            failure.error,
            TaskError::Backend(BackendError::Status { status: 500, .. })
        ));
        assert_eq!(store.raw("a").as_deref(), Some("output of a"));
        assert!(!store.contains("b"));
        assert!(!store.contains("c"));
        assert!(!backend.calls().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn concurrent_failure_stops_serial_siblings() {
        let backend = Arc::new(Scripted::default().with(
            "a",
            Err(BackendError::Request("connection reset".into())),
        ));
        let shared: Arc<dyn InferenceBackend> = backend.clone();
        let graph = TaskGraphBuilder::new("question")
            .agent(agent("analyst", shared))
            .task(TaskSpec::new("a", "analyst", "Scan {question}", "x").concurrent())
            .task(TaskSpec::new("b", "analyst", "Profile", "x"))
            .task(TaskSpec::new("c", "analyst", "Review", "x"))
            .build(&registry())
            .unwrap();
        let crew = Crew::sequential("research")
            .with_task("a")
            .with_task("b")
            .with_task("c");
        let plan = CrewPlan::new(&graph, crew, &HashSet::new()).unwrap();
        assert_eq!(plan.plan().groups.len(), 1);
        let (executor, mut receiver) = executor(4);
        let store = OutputStore::new();

        let failure = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap_err();

        assert_eq!(failure.task, "a");
        assert_eq!(backend.calls(), vec!["a"]);
        assert!(store.is_empty());
        let starts = drain_events(&mut receiver)
            .into_iter()
            .filter(|event| matches!(event, Event::Start { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn output_is_written_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out").join("report.txt");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let backend: Arc<dyn InferenceBackend> = Arc::new(Scripted::default());
        let graph = TaskGraphBuilder::new("question")
            .agent(agent("writer", backend))
            .task(
                TaskSpec::new("report", "writer", "Write", "text")
                    .with_output(&destination, true),
            )
            .task(
                TaskSpec::new("broken", "writer", "Write", "text")
                    .with_context("report")
                    .with_output(blocker.join("x.txt"), true),
            )
            .build(&registry())
            .unwrap();
        let crew = Crew::sequential("writing")
            .with_task("report")
            .with_task("broken");
        let plan = CrewPlan::new(&graph, crew, &HashSet::new()).unwrap();
        let (executor, _receiver) = executor(4);
        let store = OutputStore::new();

        let output = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "output of report"
        );
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].subject, "broken");
        assert_eq!(store.raw("broken").as_deref(), Some("output of broken"));
    }

    #[tokio::test]
    async fn concurrent_siblings_start_together() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(Rendezvous {
            barrier: Barrier::new(2),
        });
        let graph = TaskGraphBuilder::new("question")
            .agent(agent("researcher", backend))
            .task(TaskSpec::new("company", "researcher", "c", "x").concurrent())
            .task(TaskSpec::new("industry", "researcher", "i", "x").concurrent())
            .build(&registry())
            .unwrap();
        let crew = Crew::sequential("background")
            .with_task("company")
            .with_task("industry");
        let plan = CrewPlan::new(&graph, crew, &HashSet::new()).unwrap();
        let (executor, _receiver) = executor(4);
        let store = OutputStore::new();

        let output = tokio::time::timeout(
            Duration::from_secs(5),
            executor.run_crew(&graph, &plan, &inputs(), &store),
        )
        .await
        .expect("concurrent tasks waited on each other")
        .unwrap();

        assert_eq!(output.task_outputs.len(), 2);
        assert_eq!(output.final_output, "industry");
    }

    #[tokio::test]
    async fn tool_observations_are_fed_back() {
        let backend = Arc::new(
            Scripted::default()
                .with(
                    "a",
                    Ok(BackendReply::ToolCall(ToolCall {
                        tool: "echo".into(),
                        input: "hi".into(),
                    })),
                )
                .with(
                    "a",
                    Ok(BackendReply::ToolCall(ToolCall {
                        tool: "search".into(),
                        input: "acme".into(),
                    })),
                )
                .with("a", Ok(BackendReply::Final("done".into()))),
        );
        let (graph, _) = diamond(backend.clone());
        let plan = CrewPlan::new(
            &graph,
            Crew::sequential("solo").with_task("a"),
            &HashSet::new(),
        )
        .unwrap();
        let (executor, mut receiver) = executor(4);
        let store = OutputStore::new();

        let output = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap();
        assert_eq!(output.final_output, "done");

        let requests = backend.requests_for("a");
        assert_eq!(requests.len(), 3);
        let last = &requests[2].exchanges;
        assert_eq!(last[0].observation, "echo: hi");
        assert!(last[1].observation.starts_with("Error: tool 'search' is not available"));

        let tool_events: Vec<bool> = drain_events(&mut receiver)
            .into_iter()
            .filter_map(|event| match event {
                Event::ToolCall { succeeded, .. } => Some(succeeded),
                _ => None,
            })
            .collect();
        assert_eq!(tool_events, vec![true, false]);
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_iteration_limit() {
        let call = || {
            Ok(BackendReply::ToolCall(ToolCall {
                tool: "echo".into(),
                input: String::new(),
            }))
        };
        let backend = Arc::new(
            Scripted::default()
                .with("a", call())
                .with("a", call())
                .with("a", call()),
        );
        let (graph, _) = diamond(backend.clone());
        let plan = CrewPlan::new(
            &graph,
            Crew::sequential("solo").with_task("a"),
            &HashSet::new(),
        )
        .unwrap();
        let (executor, _receiver) = executor(2);
        let store = OutputStore::new();

        let failure = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            TaskError::Backend(BackendError::IterationLimit(2))
        ));
        assert_eq!(backend.requests_for("a").len(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn hierarchical_manager_delegates_then_synthesizes() {
        let backend = Arc::new(Scripted::default());
        let shared: Arc<dyn InferenceBackend> = backend.clone();
        let graph = TaskGraphBuilder::new("question")
            .agent(agent("lead", shared.clone()))
            .agent(agent("analyst", shared))
            .task(TaskSpec::new("a", "analyst", "First", "x"))
            .task(TaskSpec::new("b", "analyst", "Second on {question}", "x").with_context("a"))
            .build(&registry())
            .unwrap();
        let crew = Crew::hierarchical("board", "lead")
            .with_agent("analyst")
            .with_task("b")
            .with_task("a");
        let plan = CrewPlan::new(&graph, crew, &HashSet::new()).unwrap();
        let (executor, mut receiver) = executor(4);
        let store = OutputStore::new();

        let output = executor
            .run_crew(&graph, &plan, &inputs(), &store)
            .await
            .unwrap();

        assert_eq!(backend.calls(), vec!["a", "b", "board::manager"]);
        assert_eq!(output.final_task, "board::manager");
        assert_eq!(output.final_output, "output of board::manager");
        assert_eq!(output.task_outputs.len(), 3);

        let synthesis = &backend.requests_for("board::manager")[0].prompt;
        assert!(synthesis.contains("Second on Acme"));
        assert!(synthesis.contains("## Output of task `b`"));

        let delegations = drain_events(&mut receiver)
            .into_iter()
            .filter(|event| matches!(event, Event::Delegation { .. }))
            .count();
        assert_eq!(delegations, 2);
    }
}
