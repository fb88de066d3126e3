//! Template substitution and prompt assembly.
//!
//! Everything in here is pure: identical inputs always produce identical
//! prompt text. Upstream outputs are concatenated in `context` order and each
//! block is delimited by the id of the task that produced it.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::ToolExchange;
use crate::error::TemplateError;
use crate::tools::ToolDescriptor;

static PLACEHOLDER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("invalid placeholder regex")
});

/// Run-time values substituted into templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs(BTreeMap<String, String>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A string with `{name}` placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated(idx));
                    }
                    let name = name.trim().to_string();
                    if !PLACEHOLDER_NAME.is_match(&name) {
                        return Err(TemplateError::InvalidName(name));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn render(&self, inputs: &Inputs) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Placeholder(name) => {
                    let value = inputs
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingInput(name.clone()))?;
                    output.push_str(value);
                }
            }
        }
        Ok(output)
    }
}

/// Output of one upstream task, labelled by its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry<'a> {
    pub task_id: &'a str,
    pub output: &'a str,
}

/// Already-rendered pieces of a task prompt.
#[derive(Debug, Clone)]
pub struct PromptParts<'a> {
    pub role: &'a str,
    pub goal: &'a str,
    pub backstory: &'a str,
    pub description: &'a str,
    pub expected_output: &'a str,
    pub context: &'a [ContextEntry<'a>],
    pub tools: &'a [ToolDescriptor],
}

pub fn render_prompt(parts: &PromptParts<'_>) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are {}.", parts.role.trim());
    let _ = writeln!(prompt, "{}", parts.backstory.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Your personal goal is: {}", parts.goal.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Current Task: {}", parts.description.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "This is the expected criteria for your final answer: {}",
        parts.expected_output.trim()
    );
    let _ = writeln!(
        prompt,
        "You MUST return the actual complete content as the final answer, not a summary."
    );

    if !parts.context.is_empty() {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "# Context from upstream tasks");
        for entry in parts.context {
            let _ = writeln!(prompt);
            let _ = writeln!(prompt, "## Output of task `{}`", entry.task_id);
            let _ = writeln!(prompt, "{}", entry.output.trim_end());
            let _ = writeln!(prompt, "## End of `{}`", entry.task_id);
        }
    }

    let _ = writeln!(prompt);
    if parts.tools.is_empty() {
        let _ = writeln!(prompt, "Reply using exactly this format:");
        let _ = writeln!(prompt, "Final Answer: <your complete answer>");
    } else {
        let _ = writeln!(prompt, "You have access to the following tools:");
        for tool in parts.tools {
            let _ = writeln!(
                prompt,
                "- {}: {} Input: {}",
                tool.name, tool.description, tool.input_hint
            );
        }
        let names = parts
            .tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "To use a tool, reply using exactly this format:");
        let _ = writeln!(prompt, "Thought: <your reasoning>");
        let _ = writeln!(prompt, "Action: <one of [{names}]>");
        let _ = writeln!(prompt, "Action Input: <input for the tool>");
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "Once you know the final answer, reply with:");
        let _ = writeln!(prompt, "Thought: I now know the final answer");
        let _ = writeln!(prompt, "Final Answer: <your complete answer>");
    }

    prompt
}

/// Previous tool exchanges, in the order they happened.
pub fn render_scratchpad(exchanges: &[ToolExchange]) -> String {
    let mut output = String::new();
    for exchange in exchanges {
        let _ = writeln!(output, "Action: {}", exchange.tool);
        let _ = writeln!(output, "Action Input: {}", exchange.input.trim());
        let _ = writeln!(output, "Observation: {}", exchange.observation.trim_end());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(context: &'a [ContextEntry<'a>], tools: &'a [ToolDescriptor]) -> PromptParts<'a> {
        PromptParts {
            role: "Company and Industry Researcher",
            goal: "Understand Acme",
            backstory: "An expert analyst.",
            description: "Analyse the industry",
            expected_output: "A summary",
            context,
            tools,
        }
    }

    #[test]
    fn template_substitutes_repeated_placeholder() {
        let template = Template::parse("Study {question} and the market of {question}?").unwrap();
        assert_eq!(template.placeholders(), vec!["question"]);

        let rendered = template.render(&Inputs::single("question", "Acme")).unwrap();
        assert_eq!(rendered, "Study Acme and the market of Acme?");
    }

    #[test]
    fn template_keeps_escaped_braces() {
        let template = Template::parse("json {{\"q\": \"{question}\"}}").unwrap();
        let rendered = template.render(&Inputs::single("question", "x")).unwrap();
        assert_eq!(rendered, "json {\"q\": \"x\"}");
    }

    #[test]
    fn template_rejects_malformed_placeholders() {
        assert_eq!(
            Template::parse("open {question").unwrap_err(),
            TemplateError::Unterminated(5)
        );
        assert!(matches!(
            Template::parse("bad {two words}"),
            Err(TemplateError::InvalidName(_))
        ));
    }

    #[test]
    fn template_reports_missing_input() {
        let template = Template::parse("{company}").unwrap();
        assert_eq!(
            template.render(&Inputs::new()).unwrap_err(),
            TemplateError::MissingInput("company".into())
        );
    }

    #[test]
    fn prompt_orders_context_by_declaration() {
        let context = [
            ContextEntry {
                task_id: "industry_analysis",
                output: "industry text",
            },
            ContextEntry {
                task_id: "company_analysis",
                output: "company text",
            },
        ];
        let prompt = render_prompt(&parts(&context, &[]));

        let industry = prompt.find("## Output of task `industry_analysis`").unwrap();
        let company = prompt.find("## Output of task `company_analysis`").unwrap();
        assert!(industry < company);
        assert!(prompt.contains("industry text\n## End of `industry_analysis`"));
        assert!(prompt.contains("Final Answer:"));
        assert!(!prompt.contains("Action Input"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let context = [ContextEntry {
            task_id: "a",
            output: "alpha",
        }];
        let tools = [ToolDescriptor {
            name: "search".into(),
            description: "Search the web.".into(),
            input_hint: "a search query".into(),
        }];

        let first = render_prompt(&parts(&context, &tools));
        let second = render_prompt(&parts(&context, &tools));
        assert_eq!(first, second);
        assert!(first.contains("Action: <one of [search]>"));
    }

    #[test]
    fn scratchpad_lists_exchanges() {
        let exchanges = vec![ToolExchange {
            tool: "search".into(),
            input: "acme revenue".into(),
            observation: "1. https://acme.test - revenue grew\n".into(),
        }];
        assert_eq!(
            render_scratchpad(&exchanges),
            "Action: search\nAction Input: acme revenue\nObservation: 1. https://acme.test - revenue grew\n"
        );
    }
}
