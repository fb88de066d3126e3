use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::CrewflowError;

const DEFAULT_CONFIG_PATH: &str = "crewflow.toml";
const CONFIG_PATH_ENV: &str = "CREWFLOW_CONFIG";

/// Top-level configuration structure. Every section is optional in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub executor: ExecutorConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `CREWFLOW_CONFIG` environment variable.
    /// 3. `crewflow.toml` in the current working directory, if present.
    /// 4. Built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, CrewflowError> {
        let config = match resolve_path(path) {
            Some(candidate) => Self::from_file(&candidate)?,
            None => Config::default(),
        };

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, CrewflowError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| CrewflowError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Config, CrewflowError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| CrewflowError::config_io(path.to_path_buf(), err))?;
        toml::from_str(&raw).map_err(|err| CrewflowError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), CrewflowError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(CrewflowError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.search.api_key_env.trim().is_empty() {
            return Err(CrewflowError::InvalidConfiguration(
                "search.api_key_env must reference an environment variable".into(),
            ));
        }
        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(CrewflowError::InvalidConfiguration(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                config.llm.temperature
            )));
        }
        if config.llm.initial_backoff_ms > config.llm.max_backoff_ms {
            return Err(CrewflowError::InvalidConfiguration(format!(
                "llm.initial_backoff_ms ({}) must not exceed llm.max_backoff_ms ({})",
                config.llm.initial_backoff_ms, config.llm.max_backoff_ms
            )));
        }
        if config.executor.max_concurrent_tasks == 0 {
            return Err(CrewflowError::InvalidConfiguration(
                "executor.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if config.executor.max_tool_iterations == 0 {
            return Err(CrewflowError::InvalidConfiguration(
                "executor.max_tool_iterations must be at least 1".into(),
            ));
        }
        if config.search.max_results == 0 {
            return Err(CrewflowError::InvalidConfiguration(
                "search.max_results must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let fallback = Path::new(DEFAULT_CONFIG_PATH);
    fallback.exists().then(|| fallback.to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub api_key_env: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "cohere".to_string(),
            model: "command-r-plus".to_string(),
            temperature: 0.0,
            api_key_env: "COHERE_API_KEY".to_string(),
            endpoint: "https://api.cohere.com/v1/chat".to_string(),
            timeout_secs: 120,
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub endpoint: String,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "SERPER_API_KEY".to_string(),
            endpoint: "https://google.serper.dev/search".to_string(),
            max_results: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on tasks running at the same time.
    pub max_concurrent_tasks: usize,
    /// Tool round trips allowed before a task is failed.
    pub max_tool_iterations: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_tool_iterations: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub use_case_file: String,
    pub resource_file: String,
    pub trace_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
            use_case_file: "use_cases_suggested.txt".to_string(),
            resource_file: "final_resource_collection.txt".to_string(),
            trace_dir: PathBuf::from("data/traces"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            model = "command-r"
            temperature = 0.3

            [executor]
            max_tool_iterations = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "command-r");
        assert_eq!(config.llm.provider, "cohere");
        assert_eq!(config.executor.max_tool_iterations, 3);
        assert_eq!(config.executor.max_concurrent_tasks, 5);
        assert_eq!(config.output.dir, PathBuf::from("outputs"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ConfigLoader::parse("[executor]\nmax_concurrent_tasks = 0\n").unwrap_err();
        assert!(matches!(err, CrewflowError::InvalidConfiguration(_)));

        let err = ConfigLoader::parse("[llm]\ntemperature = 3.5\n").unwrap_err();
        assert!(matches!(err, CrewflowError::InvalidConfiguration(_)));

        let err = ConfigLoader::parse("[llm]\napi_key_env = \" \"\n").unwrap_err();
        assert!(matches!(err, CrewflowError::InvalidConfiguration(_)));

        let err = ConfigLoader::parse(
            "[llm]\ninitial_backoff_ms = 60000\nmax_backoff_ms = 30000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("initial_backoff_ms"));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[output]\ndir = \"reports\"").unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("reports"));
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/crewflow.toml"))).unwrap_err();
        assert!(matches!(err, CrewflowError::ConfigIo { .. }));
    }
}
