//! Agent and task declarations and the validated dependency graph.
//!
//! Declarations (`Agent`, `TaskSpec`) are plain data. `TaskGraphBuilder`
//! compiles them into an arena (`TaskGraph`) whose context links are checked
//! up front, and the graph then hands out execution plans: ordered groups of
//! mutually independent tasks.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::InferenceBackend;
use crate::error::GraphError;
use crate::render::Template;
use crate::tools::ToolRegistry;

/// Unique identifier for a task node
pub type TaskId = String;

/// Unique identifier for an agent
pub type AgentId = String;

/// A role-bound actor with its own inference backend.
#[derive(Clone)]
pub struct Agent {
    pub id: AgentId,
    pub role: String,
    /// Template with the run-time input as its only placeholder.
    pub goal: String,
    pub backstory: String,
    pub tools: Vec<String>,
    pub backend: Arc<dyn InferenceBackend>,
}

impl Agent {
    pub fn new(
        id: impl Into<AgentId>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            tools: Vec::new(),
            backend,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("tools", &self.tools)
            .field("model", &self.backend.model())
            .finish()
    }
}

/// Where a task's raw output is written once it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub create_directory: bool,
}

/// A unit of work owned by exactly one agent.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: TaskId,
    pub description: String,
    pub expected_output: String,
    pub agent: AgentId,
    /// Upstream tasks whose outputs are injected into the prompt, in order.
    pub context: Vec<TaskId>,
    pub concurrent: bool,
    pub output: Option<OutputTarget>,
    /// Overrides the agent's tool set when present.
    pub tools: Option<Vec<String>>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<TaskId>,
        agent: impl Into<AgentId>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent: agent.into(),
            context: Vec::new(),
            concurrent: false,
            output: None,
            tools: None,
        }
    }

    pub fn with_context(mut self, dep_id: impl Into<TaskId>) -> Self {
        self.context.push(dep_id.into());
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>, create_directory: bool) -> Self {
        self.output = Some(OutputTarget {
            path: path.into(),
            create_directory,
        });
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }
}

/// Agent after template validation.
#[derive(Debug, Clone)]
pub struct AgentNode {
    pub agent: Agent,
    pub goal: Template,
    pub backstory: Template,
}

/// Task after reference and template validation.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub spec: TaskSpec,
    pub description: Template,
    /// Position in declaration order; used to break ties.
    pub order: usize,
    agent: usize,
    context: Vec<usize>,
}

impl TaskNode {
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

/// Collects declarations and validates them into a [`TaskGraph`].
pub struct TaskGraphBuilder {
    input_key: String,
    agents: Vec<Agent>,
    tasks: Vec<TaskSpec>,
}

impl TaskGraphBuilder {
    /// `input_key` is the single placeholder name templates may reference.
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            agents: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn build(self, tools: &ToolRegistry) -> Result<TaskGraph, GraphError> {
        let mut agent_index = HashMap::new();
        let mut agents = Vec::with_capacity(self.agents.len());
        for agent in self.agents {
            if agent_index.contains_key(&agent.id) {
                return Err(GraphError::DuplicateAgent(agent.id));
            }
            for tool in &agent.tools {
                if !tools.contains(tool) {
                    return Err(GraphError::UnknownTool {
                        owner: format!("agent {}", agent.id),
                        tool: tool.clone(),
                    });
                }
            }
            let owner = format!("agent {}", agent.id);
            let goal = compile(&owner, &agent.goal, &self.input_key, true)?;
            let backstory = compile(&owner, &agent.backstory, &self.input_key, false)?;
            agent_index.insert(agent.id.clone(), agents.len());
            agents.push(AgentNode {
                agent,
                goal,
                backstory,
            });
        }

        let mut task_index = HashMap::new();
        for (idx, spec) in self.tasks.iter().enumerate() {
            if task_index.insert(spec.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateTask(spec.id.clone()));
            }
        }

        let mut tasks = Vec::with_capacity(self.tasks.len());
        for (order, spec) in self.tasks.into_iter().enumerate() {
            let agent = *agent_index
                .get(&spec.agent)
                .ok_or_else(|| GraphError::UnknownAgent {
                    task: spec.id.clone(),
                    agent: spec.agent.clone(),
                })?;

            if let Some(overrides) = &spec.tools {
                if let Some(tool) = overrides.iter().find(|tool| !tools.contains(tool)) {
                    return Err(GraphError::UnknownTool {
                        owner: format!("task {}", spec.id),
                        tool: tool.clone(),
                    });
                }
            }

            let mut context = Vec::with_capacity(spec.context.len());
            for dep_id in &spec.context {
                let dep = *task_index
                    .get(dep_id)
                    .ok_or_else(|| GraphError::DanglingContext {
                        task: spec.id.clone(),
                        missing: dep_id.clone(),
                    })?;
                if !context.contains(&dep) {
                    context.push(dep);
                }
            }

            let description =
                compile(&format!("task {}", spec.id), &spec.description, &self.input_key, false)?;

            tasks.push(TaskNode {
                spec,
                description,
                order,
                agent,
                context,
            });
        }

        let graph = TaskGraph {
            input_key: self.input_key,
            agents,
            agent_index,
            tasks,
            task_index,
        };
        graph.validate()?;
        graph.check_declaration_order()?;

        tracing::debug!(
            task_count = graph.len(),
            agent_count = graph.agents.len(),
            "Task graph constructed successfully"
        );

        Ok(graph)
    }
}

fn compile(
    owner: &str,
    source: &str,
    input_key: &str,
    require_input: bool,
) -> Result<Template, GraphError> {
    let template = Template::parse(source).map_err(|err| GraphError::Template {
        owner: owner.to_string(),
        reason: err.to_string(),
    })?;

    let placeholders = template.placeholders();
    if let Some(unknown) = placeholders.iter().find(|name| **name != input_key) {
        return Err(GraphError::Template {
            owner: owner.to_string(),
            reason: format!("placeholder '{{{unknown}}}' is not the run-time input '{{{input_key}}}'"),
        });
    }
    if require_input && placeholders.is_empty() {
        return Err(GraphError::Template {
            owner: owner.to_string(),
            reason: format!("goal must reference the run-time input '{{{input_key}}}'"),
        });
    }
    Ok(template)
}

/// Ordered execution plan for a set of tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
}

impl ExecutionPlan {
    /// All tasks in execution order.
    pub fn order(&self) -> Vec<&TaskId> {
        self.groups.iter().flat_map(|group| group.tasks.iter()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Mutually independent tasks whose dependencies are all satisfied, in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub tasks: Vec<TaskId>,
}

/// Validated arena of agents and tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    input_key: String,
    agents: Vec<AgentNode>,
    agent_index: HashMap<AgentId, usize>,
    tasks: Vec<TaskNode>,
    task_index: HashMap<TaskId, usize>,
}

impl TaskGraph {
    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    /// Get a task node by ID
    pub fn task(&self, id: &str) -> Option<&TaskNode> {
        self.task_index.get(id).map(|&idx| &self.tasks[idx])
    }

    pub fn agent(&self, id: &str) -> Option<&AgentNode> {
        self.agent_index.get(id).map(|&idx| &self.agents[idx])
    }

    /// Agent that owns the task.
    pub fn owner(&self, task: &TaskNode) -> &AgentNode {
        &self.agents[task.agent]
    }

    /// Context tasks of `task`, in declared order.
    pub fn context_of<'a>(&'a self, task: &'a TaskNode) -> impl Iterator<Item = &'a TaskNode> + 'a {
        task.context.iter().map(move |&idx| &self.tasks[idx])
    }

    /// Get all task nodes in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.tasks.iter()
    }

    /// Get number of nodes in graph
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate that the graph is acyclic
    fn validate(&self) -> Result<(), GraphError> {
        let all: Vec<usize> = (0..self.tasks.len()).collect();
        let groups = self.layers(&all);
        let visited: HashSet<usize> = groups.into_iter().flatten().collect();
        if visited.len() == self.tasks.len() {
            return Ok(());
        }

        // Every unvisited task has an unvisited dependency, so following those
        // links must revisit a task that sits on a cycle.
        let mut seen = HashSet::new();
        let mut current = (0..self.tasks.len())
            .find(|idx| !visited.contains(idx))
            .unwrap_or_default();
        while seen.insert(current) {
            match self.tasks[current]
                .context
                .iter()
                .find(|dep| !visited.contains(dep))
            {
                Some(&next) => current = next,
                None => break,
            }
        }
        Err(GraphError::Cycle(self.tasks[current].spec.id.clone()))
    }

    /// Context must name tasks declared before the dependent task.
    fn check_declaration_order(&self) -> Result<(), GraphError> {
        for node in &self.tasks {
            if let Some(&dep) = node.context.iter().find(|&&dep| dep >= node.order) {
                return Err(GraphError::DanglingContext {
                    task: node.spec.id.clone(),
                    missing: self.tasks[dep].spec.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Plan every task in the graph.
    pub fn full_plan(&self) -> ExecutionPlan {
        let all: Vec<usize> = (0..self.tasks.len()).collect();
        self.to_plan(self.layers(&all))
    }

    /// Plan a subset of tasks. Dependencies outside the subset are treated as
    /// already satisfied.
    pub fn plan<S: AsRef<str>>(&self, ids: &[S]) -> Result<ExecutionPlan, GraphError> {
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            let idx = *self
                .task_index
                .get(id)
                .ok_or_else(|| GraphError::UnknownTask(id.to_string()))?;
            if members.contains(&idx) {
                return Err(GraphError::DuplicateTask(id.to_string()));
            }
            members.push(idx);
        }
        Ok(self.to_plan(self.layers(&members)))
    }

    /// Layered Kahn topological sort over `members`, ties broken by
    /// declaration order. Members on a cycle never appear in the output.
    fn layers(&self, members: &[usize]) -> Vec<Vec<usize>> {
        let member_set: HashSet<usize> = members.iter().copied().collect();
        let mut in_degree: HashMap<usize, usize> = HashMap::new();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();

        for &idx in members {
            let internal: Vec<usize> = self.tasks[idx]
                .context
                .iter()
                .copied()
                .filter(|dep| member_set.contains(dep))
                .collect();
            in_degree.insert(idx, internal.len());
            for dep in internal {
                dependents.entry(dep).or_default().push(idx);
            }
        }

        let mut ready: Vec<usize> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(idx, _)| *idx)
            .collect();
        let mut groups = Vec::new();

        while !ready.is_empty() {
            ready.sort_by_key(|idx| self.tasks[*idx].order);
            let mut next = Vec::new();
            for idx in &ready {
                for dependent in dependents.get(idx).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            groups.push(std::mem::replace(&mut ready, next));
        }

        groups
    }

    fn to_plan(&self, layers: Vec<Vec<usize>>) -> ExecutionPlan {
        ExecutionPlan {
            groups: layers
                .into_iter()
                .map(|layer| ExecutionGroup {
                    tasks: layer
                        .into_iter()
                        .map(|idx| self.tasks[idx].spec.id.clone())
                        .collect(),
                })
                .collect(),
        }
    }
}
