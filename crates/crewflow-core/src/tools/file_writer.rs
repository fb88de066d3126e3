use std::fs::{self, create_dir_all};
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ToolError;

use super::{FILE_WRITER_TOOL, Tool, ToolDescriptor};

/// Write `content` to `path`, creating missing parent directories on request.
pub fn write_file(path: &Path, content: &str, create_directory: bool) -> io::Result<()> {
    if create_directory {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
    }
    fs::write(path, content)
}

#[derive(Deserialize)]
struct WriteRequest {
    path: String,
    content: String,
}

/// Lets an agent save text files below a fixed root directory.
/// Missing parent directories are created.
pub struct FileWriterTool {
    root: PathBuf,
}

impl FileWriterTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn invalid(reason: impl Into<String>) -> ToolError {
        ToolError::InvalidInput {
            tool: FILE_WRITER_TOOL.to_string(),
            reason: reason.into(),
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(relative.trim());
        if candidate.as_os_str().is_empty() {
            return Err(Self::invalid("path is empty"));
        }
        if candidate
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(Self::invalid(format!(
                "path '{relative}' must be relative and stay inside the output directory"
            )));
        }
        Ok(self.root.join(candidate))
    }
}

#[async_trait]
impl Tool for FileWriterTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: FILE_WRITER_TOOL.to_string(),
            description: "Save text content to a file in the output directory.".to_string(),
            input_hint: r#"JSON object {"path": "<relative file path>", "content": "<text>"}"#
                .to_string(),
        }
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let request: WriteRequest = serde_json::from_str(input.trim())
            .map_err(|err| Self::invalid(format!("expected JSON input: {err}")))?;
        let path = self.resolve(&request.path)?;

        let content = request.content;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_file(&target, &content, true))
            .await
            .map_err(|err| ToolError::Failed {
                tool: FILE_WRITER_TOOL.to_string(),
                reason: err.to_string(),
            })?
            .map_err(|source| ToolError::Io {
                tool: FILE_WRITER_TOOL.to_string(),
                path: path.clone(),
                source,
            })?;

        Ok(format!("File saved successfully to {}", path.display()))
    }
}
