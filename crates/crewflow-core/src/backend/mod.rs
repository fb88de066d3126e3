//! Inference backend contract.
//!
//! A backend turns a rendered prompt into either a final answer or a request
//! to invoke one of the bound tools. The executor owns the loop that feeds
//! tool observations back; backends stay stateless between calls.

mod cohere;
pub mod react;

pub use cohere::CohereBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::render::render_scratchpad;
use crate::tools::ToolDescriptor;

/// A tool invocation requested by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub input: String,
}

/// A completed tool round trip, replayed to the backend on the next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExchange {
    pub tool: String,
    pub input: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendReply {
    Final(String),
    ToolCall(ToolCall),
}

/// Everything a backend needs for one turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub task_id: String,
    pub prompt: String,
    pub tools: Vec<ToolDescriptor>,
    pub exchanges: Vec<ToolExchange>,
}

impl CompletionRequest {
    pub fn new(task_id: impl Into<String>, prompt: String, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            task_id: task_id.into(),
            prompt,
            tools,
            exchanges: Vec::new(),
        }
    }

    /// Prompt followed by the scratchpad of previous tool exchanges.
    pub fn transcript(&self) -> String {
        if self.exchanges.is_empty() {
            return self.prompt.clone();
        }
        format!("{}\n{}", self.prompt, render_scratchpad(&self.exchanges))
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Model identifier, used for logging and metrics.
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<BackendReply, BackendError>;
}
