use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::{CrewflowError, ToolError};
use crate::security::{SecretValue, require_env};

use super::{SEARCH_TOOL, Tool, ToolDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// Web search backend. Results are ordered by relevance.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError>;
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// Google search through the serper.dev API.
pub struct SerperSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretValue,
    max_results: usize,
}

impl SerperSearch {
    pub fn from_config(config: &SearchConfig) -> Result<Self, CrewflowError> {
        let api_key = require_env(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| {
                CrewflowError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_results: config.max_results,
        })
    }

    fn failed(reason: impl ToString) -> ToolError {
        ToolError::Failed {
            tool: SEARCH_TOOL.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        debug!(%query, "querying serper");
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", self.api_key.expose())
            .json(&SerperRequest {
                q: query,
                num: self.max_results,
            })
            .send()
            .await
            .map_err(Self::failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::failed(format!("search returned status {status}")));
        }

        let payload: SerperResponse = response.json().await.map_err(Self::failed)?;
        Ok(payload
            .organic
            .into_iter()
            .take(self.max_results)
            .map(|hit| SearchHit {
                url: hit.link,
                title: hit.title,
                snippet: hit.snippet,
            })
            .collect())
    }
}

/// Exposes a [`SearchProvider`] to agents as the `search` tool.
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: SEARCH_TOOL.to_string(),
            description: "Search the internet and return the most relevant pages.".to_string(),
            input_hint: "a plain-text search query".to_string(),
        }
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let query = input.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput {
                tool: SEARCH_TOOL.to_string(),
                reason: "search query is empty".to_string(),
            });
        }

        let hits = self.provider.search(query).await?;
        if hits.is_empty() {
            return Ok(format!("No results found for '{query}'."));
        }

        let mut output = String::new();
        for (idx, hit) in hits.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", idx + 1, hit.title);
            let _ = writeln!(output, "   Link: {}", hit.url);
            let _ = writeln!(output, "   Snippet: {}", hit.snippet);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResults(Vec<SearchHit>);

    #[async_trait]
    impl SearchProvider for FixedResults {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ToolError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn formats_hits_in_order() {
        let tool = WebSearchTool::new(Arc::new(FixedResults(vec![
            SearchHit {
                url: "https://huggingface.co/acme".into(),
                title: "Acme models".into(),
                snippet: "Pretrained models".into(),
            },
            SearchHit {
                url: "https://github.com/acme".into(),
                title: "Acme repos".into(),
                snippet: "Source code".into(),
            },
        ])));

        let output = tool.invoke("acme").await.unwrap();
        let first = output.find("1. Acme models").unwrap();
        let second = output.find("2. Acme repos").unwrap();
        assert!(first < second);
        assert!(output.contains("Link: https://github.com/acme"));
    }

    #[tokio::test]
    async fn empty_query_and_empty_results() {
        let tool = WebSearchTool::new(Arc::new(FixedResults(Vec::new())));
        assert!(matches!(
            tool.invoke("  ").await,
            Err(ToolError::InvalidInput { .. })
        ));
        assert_eq!(
            tool.invoke("nothing").await.unwrap(),
            "No results found for 'nothing'."
        );
    }
}
