//! Parser for the `Action:` / `Action Input:` / `Final Answer:` text protocol.

use crate::error::BackendError;

use super::{BackendReply, ToolCall};

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";
const OBSERVATION: &str = "Observation:";

/// Interpret raw completion text.
///
/// A `Final Answer:` marker wins over any action. Plain text without markers is
/// taken as the final answer; empty text is malformed.
pub fn parse_reply(text: &str) -> Result<BackendReply, BackendError> {
    if let Some(idx) = text.find(FINAL_ANSWER) {
        let answer = text[idx + FINAL_ANSWER.len()..].trim();
        if answer.is_empty() {
            return Err(BackendError::Malformed("empty final answer".into()));
        }
        return Ok(BackendReply::Final(answer.to_string()));
    }

    if let Some(action) = find_action(text) {
        let after_action = &text[action..];
        let tool = after_action[ACTION.len()..]
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        if tool.is_empty() {
            return Err(BackendError::Malformed("action without a tool name".into()));
        }

        let input_start = after_action.find(ACTION_INPUT).ok_or_else(|| {
            BackendError::Malformed(format!("action '{tool}' is missing `{ACTION_INPUT}`"))
        })?;
        let input = &after_action[input_start + ACTION_INPUT.len()..];
        let input = match input.find(OBSERVATION) {
            Some(end) => &input[..end],
            None => input,
        };

        return Ok(BackendReply::ToolCall(ToolCall {
            tool,
            input: strip_fences(input.trim()).to_string(),
        }));
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BackendError::Malformed("empty completion".into()));
    }
    Ok(BackendReply::Final(trimmed.to_string()))
}

/// Byte offset of the first `Action:` marker that is not part of `Action Input:`.
fn find_action(text: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(idx) = text[offset..].find(ACTION) {
        let absolute = offset + idx;
        if !text[absolute..].starts_with(ACTION_INPUT) {
            return Some(absolute);
        }
        offset = absolute + ACTION_INPUT.len();
    }
    None
}

fn strip_fences(input: &str) -> &str {
    let input = input.trim();
    let stripped = input
        .strip_prefix("```json")
        .or_else(|| input.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"));
    match stripped {
        Some(inner) => inner.trim(),
        None => input.trim_matches('"'),
    }
}
