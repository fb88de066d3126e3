//! Persistence of the designated report tasks as plain-text documents.

use std::collections::BTreeMap;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::graph::TaskId;

/// One document derived from exactly one task's raw output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTarget {
    pub task_id: TaskId,
    pub file_name: String,
    pub title: String,
}

impl ReportTarget {
    pub fn new(
        task_id: impl Into<TaskId>,
        file_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            file_name: file_name.into(),
            title: title.into(),
        }
    }
}

/// Result of writing a set of reports: saved paths plus per-target failures.
#[derive(Debug, Default)]
pub struct ReportOutcome {
    pub artifacts: Vec<PathBuf>,
    pub warnings: Vec<PersistenceError>,
}

pub trait ReportWriter: Send + Sync {
    fn write_reports(
        &self,
        targets: &[ReportTarget],
        outputs: &BTreeMap<TaskId, String>,
    ) -> ReportOutcome;
}

/// Writes each report as `<title>\n\n<raw output>\n` inside `dir`.
#[derive(Debug, Clone)]
pub struct TextReportWriter {
    dir: PathBuf,
}

impl TextReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_one(&self, target: &ReportTarget, raw: &str) -> std::io::Result<PathBuf> {
        create_dir_all(&self.dir)?;
        let path = self.dir.join(&target.file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        if !target.title.is_empty() {
            writeln!(file, "{}", target.title)?;
            writeln!(file)?;
        }
        writeln!(file, "{}", raw.trim_end())?;
        Ok(path)
    }
}

impl ReportWriter for TextReportWriter {
    fn write_reports(
        &self,
        targets: &[ReportTarget],
        outputs: &BTreeMap<TaskId, String>,
    ) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();
        for target in targets {
            let path = self.dir.join(&target.file_name);
            let Some(raw) = outputs.get(&target.task_id) else {
                warn!(task_id = %target.task_id, "no output recorded for report task");
                outcome.warnings.push(PersistenceError::new(
                    &target.task_id,
                    path,
                    "task produced no output",
                ));
                continue;
            };

            match self.write_one(target, raw) {
                Ok(path) => {
                    info!(task_id = %target.task_id, path = %path.display(), "report saved");
                    outcome.artifacts.push(path);
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "unable to write report");
                    outcome
                        .warnings
                        .push(PersistenceError::new(&target.task_id, path, err));
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_reports_and_collects_missing_outputs() {
        let dir = tempdir().unwrap();
        let writer = TextReportWriter::new(dir.path().join("outputs"));
        let targets = vec![
            ReportTarget::new("structured_writer", "use_cases_suggested.txt", "AI Use Cases"),
            ReportTarget::new("resource_writer", "final_resource_collection.txt", ""),
        ];
        let outputs = BTreeMap::from([(
            "structured_writer".to_string(),
            "1. Predictive maintenance\n".to_string(),
        )]);

        let outcome = writer.write_reports(&targets, &outputs);

        assert_eq!(outcome.artifacts.len(), 1);
        let contents = std::fs::read_to_string(&outcome.artifacts[0]).unwrap();
        assert_eq!(contents, "AI Use Cases\n\n1. Predictive maintenance\n");

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].subject, "resource_writer");
    }

    #[test]
    fn io_failures_become_warnings() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let writer = TextReportWriter::new(&blocker);
        let outputs = BTreeMap::from([("a".to_string(), "text".to_string())]);
        let outcome = writer.write_reports(&[ReportTarget::new("a", "a.txt", "A")], &outputs);

        assert!(outcome.artifacts.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
    }
}
