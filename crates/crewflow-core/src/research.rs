//! The company research pipeline: background analysis, market research and
//! use-case generation, then resource collection.

use std::path::Path;
use std::sync::Arc;

use crate::backend::InferenceBackend;
use crate::config::OutputConfig;
use crate::crew::{Crew, Pipeline, PipelineBuilder};
use crate::error::GraphError;
use crate::graph::{Agent, TaskGraphBuilder, TaskSpec};
use crate::report::ReportTarget;
use crate::tools::{FILE_WRITER_TOOL, SEARCH_TOOL, ToolRegistry};

/// Placeholder the company name is substituted into.
pub const INPUT_KEY: &str = "question";

pub const USE_CASE_TASK: &str = "structured_writer";
pub const RESOURCE_TASK: &str = "resource_writer";

const COMPANY_RESEARCHER: &str = "company_researcher";
const MARKET_RESEARCHER: &str = "market_researcher";
const USE_CASE_GENERATOR: &str = "use_case_generator";
const RESOURCE_COLLECTOR: &str = "resource_collector";

const RESOURCE_EXPECTED: &str = "Gathered URLs and brief descriptions of each relevant resource.";

/// Build the three-crew pipeline. Every agent shares `backend`; `tools` must
/// provide `search` and `file_writer`. Task outputs of the two writer tasks
/// are also saved under `output_dir`.
pub fn research_pipeline(
    backend: Arc<dyn InferenceBackend>,
    tools: &ToolRegistry,
    output_dir: &Path,
) -> Result<Pipeline, GraphError> {
    let graph = TaskGraphBuilder::new(INPUT_KEY)
        .agent(
            Agent::new(
                COMPANY_RESEARCHER,
                "Company and Industry Researcher",
                "Provide comprehensive insights into the company {question} and its industry, \
                 identify its key offerings, and understand the strategic focus areas of {question}.",
                "An expert analyst with a keen eye for market study and accurate insights about \
                 companies and industries, empowering companies with the knowledge needed to thrive \
                 and stay competitive in their industry.",
                backend.clone(),
            )
            .with_tool(SEARCH_TOOL),
        )
        .agent(
            Agent::new(
                MARKET_RESEARCHER,
                "Market Researcher",
                "Provide a comprehensive understanding of current market dynamics, competitor \
                 activities, regulatory standards, and emerging technologies that can influence \
                 the strategic decisions in AI, ML, and automation at {question}.",
                "An analytical researcher focused on gathering and synthesizing information about \
                 industry trends and standards related to AI, ML, and automation within the \
                 company's sector.",
                backend.clone(),
            )
            .with_tool(SEARCH_TOOL),
        )
        .agent(
            Agent::new(
                USE_CASE_GENERATOR,
                "Use Case Generation Agent",
                "Develop actionable use cases that leverage advanced AI technologies to improve \
                 company processes, enhance customer satisfaction, and boost operational \
                 efficiency at {question}.",
                "An innovative strategist responsible for conceptualizing and proposing practical \
                 applications of GenAI, LLMs, and ML technologies that address the company's \
                 specific needs.",
                backend.clone(),
            )
            .with_tool(SEARCH_TOOL),
        )
        .agent(
            Agent::new(
                RESOURCE_COLLECTOR,
                "Resource Asset Collection Agent",
                "Facilitate the implementation of the proposed use cases by collecting relevant \
                 resources from platforms like Kaggle, HuggingFace, and GitHub for {question}.",
                "A data and resource curator who sources and compiles datasets, models, and code \
                 repositories that align with the generated use cases.",
                backend,
            )
            .with_tool(SEARCH_TOOL),
        )
        // background
        .task(
            TaskSpec::new(
                "company_analysis",
                COMPANY_RESEARCHER,
                "Use the search tool to identify the key offerings and strategic focus areas of \
                 {question} and analyze them.",
                "A summary of the company including its vision, products, history, size, and \
                 global presence, with a detailed list of its products and services.",
            )
            .concurrent(),
        )
        .task(
            TaskSpec::new(
                "industry_analysis",
                COMPANY_RESEARCHER,
                "Use the search tool to understand the industry and segment {question} is working \
                 in (e.g. Automotive, Manufacturing, Finance, Retail, Healthcare) and analyze it.",
                "A summary of the industry including key characteristics, size, growth trends, and \
                 major players.",
            )
            .concurrent(),
        )
        .task(
            TaskSpec::new(
                "background_summary",
                COMPANY_RESEARCHER,
                "Provide a clear and simple representation of the context received.",
                "Structured information about the company and its industry.",
            )
            .with_context("industry_analysis")
            .with_context("company_analysis"),
        )
        // market_use_cases
        .task(
            TaskSpec::new(
                "market_research",
                MARKET_RESEARCHER,
                "Use the search tool to collect up-to-date data on AI, ML, and automation trends \
                 specific to the industry of {question}. Identify key competitors and analyze their \
                 adoption and implementation of AI, ML, and automation technologies.",
                "A detailed report summarizing findings, highlighting opportunities and threats \
                 within the market, with sources as clickable links.",
            )
            .with_context("background_summary"),
        )
        .task(
            TaskSpec::new(
                "use_case_generation",
                USE_CASE_GENERATOR,
                "Analyze the insights and data provided by the market research. Identify areas \
                 within the operations of {question} that can benefit from AI, ML, GenAI, and LLM \
                 technologies. Generate a list of relevant and feasible use cases with detailed \
                 descriptions of potential impacts, benefits, and their resource links. Prioritize \
                 the use cases by alignment with company goals, potential ROI, feasibility, and \
                 resource requirements.",
                "A prioritized list of use cases with impacts, benefits, and sources as clickable \
                 links.",
            )
            .with_context("market_research")
            .with_context("background_summary"),
        )
        .task(
            TaskSpec::new(
                USE_CASE_TASK,
                USE_CASE_GENERATOR,
                "Present the recommendations in a structured format that helps decision-makers \
                 evaluate and select initiatives for implementation, with clickable resource links.",
                "The complete structured recommendation document.",
            )
            .with_context("market_research")
            .with_context("use_case_generation")
            .with_tools([FILE_WRITER_TOOL])
            .with_output(output_dir.join("ai_usecase_summary.txt"), true),
        )
        // resources
        .task(
            TaskSpec::new(
                "huggingface_resources",
                RESOURCE_COLLECTOR,
                "Search HuggingFace for relevant resources, repositories, projects, blogs, and \
                 datasets for each use case.",
                RESOURCE_EXPECTED,
            )
            .with_context(USE_CASE_TASK),
        )
        .task(
            TaskSpec::new(
                "github_resources",
                RESOURCE_COLLECTOR,
                "Search GitHub for relevant resources, repositories, projects, and datasets for \
                 each use case.",
                RESOURCE_EXPECTED,
            )
            .with_context(USE_CASE_TASK),
        )
        .task(
            TaskSpec::new(
                "kaggle_resources",
                RESOURCE_COLLECTOR,
                "Search Kaggle for relevant resources and datasets for each use case.",
                RESOURCE_EXPECTED,
            )
            .with_context(USE_CASE_TASK),
        )
        .task(
            TaskSpec::new(
                RESOURCE_TASK,
                USE_CASE_GENERATOR,
                "Present the gathered resources in a structured format. Categorize them by the \
                 use case they support for easy navigation, with clickable resource links.",
                "The complete categorized resource document.",
            )
            .with_context("kaggle_resources")
            .with_context("github_resources")
            .with_context("huggingface_resources")
            .with_tools([FILE_WRITER_TOOL])
            .with_output(output_dir.join("ai_resources.txt"), true),
        )
        .build(tools)?;

    PipelineBuilder::new(graph)
        .crew(
            Crew::sequential("background")
                .with_agent(COMPANY_RESEARCHER)
                .with_task("company_analysis")
                .with_task("industry_analysis")
                .with_task("background_summary"),
        )
        .crew(
            Crew::sequential("market_use_cases")
                .with_agent(MARKET_RESEARCHER)
                .with_agent(USE_CASE_GENERATOR)
                .with_task("market_research")
                .with_task("use_case_generation")
                .with_task(USE_CASE_TASK),
        )
        .crew(
            Crew::sequential("resources")
                .with_agent(RESOURCE_COLLECTOR)
                .with_agent(USE_CASE_GENERATOR)
                .with_task("huggingface_resources")
                .with_task("github_resources")
                .with_task("kaggle_resources")
                .with_task(RESOURCE_TASK),
        )
        .build()
}

/// The two documents persisted after a successful run.
pub fn report_targets(config: &OutputConfig) -> Vec<ReportTarget> {
    vec![
        ReportTarget::new(USE_CASE_TASK, &config.use_case_file, "Suggested AI Use Cases"),
        ReportTarget::new(
            RESOURCE_TASK,
            &config.resource_file,
            "Final Resource Collection",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendReply, CompletionRequest};
    use crate::error::{BackendError, ToolError};
    use crate::tools::{FileWriterTool, SearchHit, SearchProvider, WebSearchTool};
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl InferenceBackend for Silent {
        fn model(&self) -> &str {
            "silent"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<BackendReply, BackendError> {
            Ok(BackendReply::Final(String::new()))
        }
    }

    struct NoHits;

    #[async_trait]
    impl SearchProvider for NoHits {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ToolError> {
            Ok(Vec::new())
        }
    }

    fn tools(root: &Path) -> ToolRegistry {
        ToolRegistry::new()
            .with_tool(Arc::new(WebSearchTool::new(Arc::new(NoHits))))
            .with_tool(Arc::new(FileWriterTool::new(root)))
    }

    #[test]
    fn blueprint_has_three_crews_in_dependency_order() {
        let root = Path::new("outputs");
        let pipeline = research_pipeline(Arc::new(Silent), &tools(root), root).unwrap();

        let crews: Vec<&str> = pipeline
            .crews()
            .iter()
            .map(|plan| plan.crew().name.as_str())
            .collect();
        assert_eq!(crews, vec!["background", "market_use_cases", "resources"]);

        let background = pipeline.crews()[0].plan();
        assert_eq!(
            background.groups[0].tasks,
            vec!["company_analysis".to_string(), "industry_analysis".to_string()]
        );
        assert_eq!(pipeline.crews()[1].final_task(), USE_CASE_TASK);
        assert_eq!(pipeline.crews()[2].final_task(), RESOURCE_TASK);
        assert_eq!(pipeline.graph().len(), 10);
    }

    #[test]
    fn blueprint_requires_both_tools() {
        let registry = ToolRegistry::new().with_tool(Arc::new(WebSearchTool::new(Arc::new(NoHits))));
        let err = research_pipeline(Arc::new(Silent), &registry, Path::new("outputs")).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTool { .. }));
    }

    #[test]
    fn report_targets_follow_config() {
        let targets = report_targets(&OutputConfig::default());
        assert_eq!(targets[0].task_id, USE_CASE_TASK);
        assert_eq!(targets[0].file_name, "use_cases_suggested.txt");
        assert_eq!(targets[1].file_name, "final_resource_collection.txt");
    }
}
