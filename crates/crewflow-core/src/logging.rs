use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

const LOG_DIR_ENV: &str = "CREWFLOW_LOG_DIR";
const RETENTION_ENV: &str = "CREWFLOW_LOG_RETENTION_DAYS";
const DEFAULT_LOG_DIR: &str = "data/logs";
const DEFAULT_RETENTION_DAYS: u64 = 90;

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

/// Data recorded for one finished `crewflow run`.
#[derive(Debug, Clone)]
pub struct RunLogInput {
    pub run_id: String,
    pub input: String,
    pub status: String,
    pub artifacts: Vec<String>,
    pub warnings: Vec<String>,
    pub trace_path: Option<String>,
}

#[derive(Serialize)]
struct RunLogRecord {
    timestamp: String,
    run_id: String,
    input: String,
    status: String,
    artifacts: Vec<String>,
    warnings: Vec<String>,
    trace_path: Option<String>,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    run_id: String,
    redactions: Vec<String>,
}

fn log_base_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

fn retention_days() -> u64 {
    std::env::var(RETENTION_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut BTreeSet<String>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(name.to_string());
        }
    }
    output
}

/// Append the run record to `runs.jsonl` under the monthly log directory.
/// Redacted fields are also written to `audit.jsonl`.
pub fn log_run_completion(input: RunLogInput) -> Result<PathBuf> {
    let timestamp = Utc::now();
    let mut redactions = BTreeSet::new();

    let run_input = sanitize_text(&input.input, &mut redactions);
    let status = sanitize_text(&input.status, &mut redactions);
    let warnings = input
        .warnings
        .iter()
        .map(|warning| sanitize_text(warning, &mut redactions))
        .collect();

    let record = RunLogRecord {
        timestamp: timestamp.to_rfc3339(),
        run_id: input.run_id.clone(),
        input: run_input,
        status,
        artifacts: input.artifacts,
        warnings,
        trace_path: input.trace_path,
        redactions: redactions.into_iter().collect(),
    };

    let base_dir = log_base_dir();
    let month_dir = base_dir
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()));
    let run_log_path = month_dir.join("runs.jsonl");
    append_json_line(&run_log_path, &record)?;

    if !record.redactions.is_empty() {
        let audit = AuditLogRecord {
            timestamp: record.timestamp.clone(),
            run_id: input.run_id.clone(),
            redactions: record.redactions.clone(),
        };
        append_json_line(&month_dir.join("audit.jsonl"), &audit)?;
        warn!(
            run_id = %input.run_id,
            fields = ?record.redactions,
            "redacted potential secrets from run log"
        );
    }

    enforce_retention(&base_dir)?;

    Ok(run_log_path)
}

fn enforce_retention(base_dir: &Path) -> Result<()> {
    let retention = retention_days();
    if retention == 0 || !base_dir.exists() {
        return Ok(());
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention.saturating_mul(86_400)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    prune_directory(base_dir, cutoff)
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn run_logging_sanitizes_and_persists() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        unsafe {
            std::env::set_var(LOG_DIR_ENV, temp.path());
            std::env::set_var(RETENTION_ENV, "0");
        }

        let path = log_run_completion(RunLogInput {
            run_id: "run-1".to_string(),
            input: "Acme api_key=abcd1234".to_string(),
            status: "Completed. Reports saved to outputs/use_cases_suggested.txt".to_string(),
            artifacts: vec!["outputs/use_cases_suggested.txt".to_string()],
            warnings: vec!["request failed: bearer XYZ".to_string()],
            trace_path: Some("data/traces/run-1.json".to_string()),
        })?;

        assert!(path.ends_with("runs.jsonl"));
        let line = std::fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["run_id"], "run-1");
        assert_eq!(record["input"], "Acme api_key=[REDACTED]");
        assert_eq!(record["warnings"][0], "request failed: bearer [REDACTED]");
        assert_eq!(record["redactions"], serde_json::json!(["api_key", "bearer"]));

        let audit = path.with_file_name("audit.jsonl");
        assert!(audit.exists());

        unsafe {
            std::env::remove_var(LOG_DIR_ENV);
            std::env::remove_var(RETENTION_ENV);
        }
        Ok(())
    }

    #[test]
    fn sk_tokens_are_fully_redacted() {
        let mut redactions = BTreeSet::new();
        let text = sanitize_text("key sk-abcdef1234567890XYZ end", &mut redactions);
        assert_eq!(text, "key [REDACTED] end");
        assert!(redactions.contains("sk_token"));
    }
}
