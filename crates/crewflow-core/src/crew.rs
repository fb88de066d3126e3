//! Crews group tasks under one coordination strategy; a pipeline is the
//! fixed sequence of crews an orchestrator runs.

use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::graph::{AgentId, ExecutionPlan, TaskGraph, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Execution groups run in order; only `concurrent` tasks overlap.
    Sequential,
    /// A manager agent delegates every task, then synthesizes the results.
    Hierarchical { manager: AgentId },
}

#[derive(Debug, Clone)]
pub struct Crew {
    pub name: String,
    pub agents: Vec<AgentId>,
    pub tasks: Vec<TaskId>,
    pub strategy: Strategy,
}

impl Crew {
    pub fn sequential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agents: Vec::new(),
            tasks: Vec::new(),
            strategy: Strategy::Sequential,
        }
    }

    pub fn hierarchical(name: impl Into<String>, manager: impl Into<AgentId>) -> Self {
        let manager = manager.into();
        Self {
            name: name.into(),
            agents: vec![manager.clone()],
            tasks: Vec::new(),
            strategy: Strategy::Hierarchical { manager },
        }
    }

    pub fn with_agent(mut self, agent: impl Into<AgentId>) -> Self {
        let agent = agent.into();
        if !self.agents.contains(&agent) {
            self.agents.push(agent);
        }
        self
    }

    pub fn with_task(mut self, task: impl Into<TaskId>) -> Self {
        self.tasks.push(task.into());
        self
    }

    /// Synthetic task id under which a hierarchical manager's synthesis is stored.
    pub fn manager_task_id(&self) -> String {
        format!("{}::manager", self.name)
    }
}

/// A crew validated against a graph, with its execution plan.
#[derive(Debug, Clone)]
pub struct CrewPlan {
    crew: Crew,
    plan: ExecutionPlan,
}

impl CrewPlan {
    /// Validate `crew` given the tasks that earlier crews will already have
    /// completed.
    pub fn new(
        graph: &TaskGraph,
        crew: Crew,
        completed_before: &HashSet<TaskId>,
    ) -> Result<Self, GraphError> {
        let invalid = |reason: String| GraphError::InvalidCrew {
            crew: crew.name.clone(),
            reason,
        };

        if crew.tasks.is_empty() {
            return Err(invalid("crew has no tasks".to_string()));
        }
        if let Some(agent) = crew.agents.iter().find(|agent| graph.agent(agent).is_none()) {
            return Err(invalid(format!("unknown agent '{agent}'")));
        }
        if let Strategy::Hierarchical { manager } = &crew.strategy {
            if !crew.agents.contains(manager) {
                return Err(invalid(format!(
                    "manager '{manager}' is not one of the crew's agents"
                )));
            }
        }

        let positions: HashMap<&str, usize> = crew
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let sequential = crew.strategy == Strategy::Sequential;

        for (position, task_id) in crew.tasks.iter().enumerate() {
            let node = graph
                .task(task_id)
                .ok_or_else(|| GraphError::UnknownTask(task_id.clone()))?;
            if task_id.as_str() == crew.manager_task_id() {
                return Err(invalid(format!(
                    "task id '{task_id}' is reserved for the manager"
                )));
            }

            for dep in graph.context_of(node) {
                let satisfied = match positions.get(dep.id()) {
                    Some(&dep_position) => !sequential || dep_position < position,
                    None => completed_before.contains(dep.id()),
                };
                if !satisfied {
                    return Err(GraphError::ContextOutOfOrder {
                        crew: crew.name.clone(),
                        task: task_id.clone(),
                        dependency: dep.id().to_string(),
                    });
                }
            }
        }

        let plan = graph.plan(&crew.tasks)?;
        Ok(Self { crew, plan })
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Task whose output is the crew's result.
    pub fn final_task(&self) -> String {
        match &self.crew.strategy {
            Strategy::Sequential => self.crew.tasks.last().cloned().unwrap_or_default(),
            Strategy::Hierarchical { .. } => self.crew.manager_task_id(),
        }
    }
}

/// Fixed sequence of crews over one task graph.
#[derive(Debug, Clone)]
pub struct Pipeline {
    graph: TaskGraph,
    crews: Vec<CrewPlan>,
}

impl Pipeline {
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn crews(&self) -> &[CrewPlan] {
        &self.crews
    }
}

pub struct PipelineBuilder {
    graph: TaskGraph,
    crews: Vec<Crew>,
}

impl PipelineBuilder {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph,
            crews: Vec::new(),
        }
    }

    pub fn crew(mut self, crew: Crew) -> Self {
        self.crews.push(crew);
        self
    }

    pub fn build(self) -> Result<Pipeline, GraphError> {
        if self.crews.is_empty() {
            return Err(GraphError::InvalidCrew {
                crew: String::new(),
                reason: "pipeline has no crews".to_string(),
            });
        }

        let mut owners: HashMap<TaskId, String> = HashMap::new();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut plans = Vec::with_capacity(self.crews.len());
        let mut names = HashSet::new();

        for crew in self.crews {
            if !names.insert(crew.name.clone()) {
                return Err(GraphError::InvalidCrew {
                    crew: crew.name.clone(),
                    reason: "crew name is used twice".to_string(),
                });
            }
            for task in &crew.tasks {
                if let Some(first) = owners.get(task) {
                    if first == &crew.name {
                        return Err(GraphError::DuplicateTask(task.clone()));
                    }
                    return Err(GraphError::SharedTask {
                        task: task.clone(),
                        first: first.clone(),
                        second: crew.name.clone(),
                    });
                }
                owners.insert(task.clone(), crew.name.clone());
            }

            let plan = CrewPlan::new(&self.graph, crew, &completed)?;
            completed.extend(plan.crew.tasks.iter().cloned());
            plans.push(plan);
        }

        Ok(Pipeline {
            graph: self.graph,
            crews: plans,
        })
    }
}
