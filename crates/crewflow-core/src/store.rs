//! Write-once storage for task outputs shared across the crews of one run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::graph::{AgentId, TaskId};

/// Raw text produced by a task, immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task_id: TaskId,
    pub agent: AgentId,
    pub raw: String,
    pub completed_at: DateTime<Utc>,
}

impl TaskOutput {
    pub fn new(task_id: impl Into<TaskId>, agent: impl Into<AgentId>, raw: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            raw: raw.into(),
            completed_at: Utc::now(),
        }
    }
}

/// Outputs keyed by task id. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct OutputStore {
    outputs: Arc<DashMap<TaskId, TaskOutput>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an output; a second write for the same task is rejected.
    pub fn record(&self, output: TaskOutput) -> Result<(), StoreError> {
        match self.outputs.entry(output.task_id.clone()) {
            Entry::Occupied(entry) => Err(StoreError::AlreadyRecorded(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(output);
                Ok(())
            }
        }
    }

    pub fn raw(&self, task_id: &str) -> Option<String> {
        self.outputs.get(task_id).map(|entry| entry.raw.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.outputs.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// `task_id -> raw text` for everything recorded so far.
    pub fn snapshot(&self) -> BTreeMap<TaskId, String> {
        self.outputs
            .iter()
            .map(|entry| (entry.key().clone(), entry.raw.clone()))
            .collect()
    }
}
