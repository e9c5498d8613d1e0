//! Filesystem-backed log store: one append-only UTF-8 file per job.
//!
//! The on-disk record outlives the in-memory process handle and is the
//! authoritative source for a job's terminal state. Files are never deleted
//! here; cleanup is an external concern.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::errors::{Error, Result};
use crate::types::{JobId, OutputFormat, PromptSpec};

/// Trailing marker appended when a job is cancelled by the operator.
pub const CANCELLED_MARKER: &str = "[JOB CANCELLED BY USER]";

/// Prefix of the marker sealing a reaped process's exit code into the log.
/// Once sealed, polls that only have the file report the same terminal state.
pub const EXIT_MARKER_PREFIX: &str = "[JOB EXITED WITH CODE ";

const METADATA_PREFIX: &str = "METADATA: ";

pub fn exit_marker(code: i32) -> String {
    format!("{}{}]", EXIT_MARKER_PREFIX, code)
}

/// Recover the sealed exit code, if any.
pub fn parse_exit_marker(raw: &str) -> Option<i32> {
    let start = raw.rfind(EXIT_MARKER_PREFIX)? + EXIT_MARKER_PREFIX.len();
    let rest = &raw[start..];
    rest[..rest.find(']')?].trim().parse().ok()
}

/// First line of every job log, as a structured encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<PromptParameters>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptParameters {
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// One entry in the completed portion of a job listing.
#[derive(Clone, Debug, Serialize)]
pub struct CompletedJob {
    pub job_id: String,
    pub log_path: PathBuf,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Clone, Debug)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prompt_log_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{}.txt", job_id))
    }

    pub fn shell_log_path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{}_shell.txt", job_id))
    }

    pub fn workflow_log_path(&self, run_id: JobId) -> PathBuf {
        self.dir.join(format!("{}_workflow.txt", run_id))
    }

    /// Locate the log for a job id, whichever kind it was.
    pub fn find(&self, job_id: JobId) -> Option<PathBuf> {
        [self.prompt_log_path(job_id), self.shell_log_path(job_id)]
            .into_iter()
            .find(|path| path.exists())
    }

    /// Write the metadata header plus prompt echo for a new prompt job.
    pub async fn write_prompt_header(
        &self,
        job_id: JobId,
        spec: &PromptSpec,
    ) -> io::Result<PathBuf> {
        let metadata = JobMetadata {
            job_id,
            model: Some(spec.model.clone()),
            command: None,
            timestamp: epoch_now(),
            parameters: Some(PromptParameters {
                temperature: spec.temperature,
                system_prompt: spec.system_prompt.clone(),
                max_tokens: spec.max_tokens,
                output_format: spec.output_format,
            }),
        };
        let path = self.prompt_log_path(job_id);
        let header = format!(
            "{}{}\n\nPROMPT: {}\n\nRESPONSE:\n",
            METADATA_PREFIX,
            serde_json::to_string(&metadata).map_err(io::Error::other)?,
            spec.prompt,
        );
        tokio::fs::write(&path, header).await?;
        Ok(path)
    }

    /// Write the metadata header plus command echo for a new shell job.
    pub async fn write_shell_header(&self, job_id: JobId, command: &str) -> io::Result<PathBuf> {
        let metadata = JobMetadata {
            job_id,
            model: None,
            command: Some(command.to_string()),
            timestamp: epoch_now(),
            parameters: None,
        };
        let path = self.shell_log_path(job_id);
        let header = format!(
            "{}{}\n\nCOMMAND: {}\n\nOUTPUT:\n",
            METADATA_PREFIX,
            serde_json::to_string(&metadata).map_err(io::Error::other)?,
            command,
        );
        tokio::fs::write(&path, header).await?;
        Ok(path)
    }

    pub async fn create(&self, path: &Path, contents: &str) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    pub async fn append(&self, path: &Path, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(path).await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }

    pub async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    /// Parse the metadata header line of a log file.
    pub async fn read_metadata(&self, path: &Path) -> Result<JobMetadata> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
        let first_line = content.lines().next().unwrap_or_default();
        let encoded = first_line
            .strip_prefix(METADATA_PREFIX)
            .ok_or_else(|| Error::Parse(format!("{}: missing metadata line", path.display())))?;
        serde_json::from_str(encoded)
            .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Scan the log directory for completed jobs, newest first. A file with
    /// an unreadable or malformed header still produces an entry, timestamped
    /// from filesystem mtime instead of the embedded metadata.
    pub async fn scan(&self) -> io::Result<Vec<CompletedJob>> {
        let mut completed = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            // workflow run logs are aggregate records, not jobs
            if stem.ends_with("_workflow") {
                continue;
            }
            let fallback_id = stem.strip_suffix("_shell").unwrap_or(stem).to_string();
            match self.read_metadata(&path).await {
                Ok(metadata) => completed.push(CompletedJob {
                    job_id: metadata.job_id.to_string(),
                    log_path: path,
                    timestamp: metadata.timestamp,
                    model: metadata.model,
                }),
                Err(_) => {
                    let timestamp = entry
                        .metadata()
                        .await
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs_f64())
                        .unwrap_or_default();
                    completed.push(CompletedJob {
                        job_id: fallback_id,
                        log_path: path,
                        timestamp,
                        model: None,
                    });
                }
            }
        }
        completed.sort_by(|a, b| {
            b.timestamp
                .partial_cmp(&a.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptSpec;
    use uuid::Uuid;

    fn spec() -> PromptSpec {
        PromptSpec {
            model: "tinyllama".into(),
            prompt: "What is the capital of France?".into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            output_format: Default::default(),
        }
    }

    #[tokio::test]
    async fn prompt_header_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let job_id = Uuid::new_v4();
        let path = store.write_prompt_header(job_id, &spec()).await.unwrap();

        let metadata = store.read_metadata(&path).await.unwrap();
        assert_eq!(metadata.job_id, job_id);
        assert_eq!(metadata.model.as_deref(), Some("tinyllama"));
        assert!(metadata.parameters.is_some());

        let content = store.read(&path).await.unwrap();
        assert!(content.contains("PROMPT: What is the capital of France?"));
        assert!(content.ends_with("RESPONSE:\n"));
    }

    #[tokio::test]
    async fn scan_sorts_newest_first_and_skips_workflow_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();

        let header = |id: Uuid, ts: f64| {
            format!(
                "METADATA: {{\"job_id\": \"{}\", \"timestamp\": {}}}\n\nOUTPUT:\n",
                id, ts
            )
        };
        store
            .create(&store.shell_log_path(older), &header(older, 100.0))
            .await
            .unwrap();
        store
            .create(&store.shell_log_path(newer), &header(newer, 200.0))
            .await
            .unwrap();
        store
            .create(&store.workflow_log_path(Uuid::new_v4()), "WORKFLOW RUN: {}\n")
            .await
            .unwrap();

        let completed = store.scan().await.unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].job_id, newer.to_string());
        assert_eq!(completed[1].job_id, older.to_string());
    }

    #[test]
    fn exit_marker_round_trips() {
        let raw = format!("OUTPUT:\nhi\n\n{}\n", exit_marker(3));
        assert_eq!(parse_exit_marker(&raw), Some(3));
        assert_eq!(parse_exit_marker(&exit_marker(-1)), Some(-1));
        assert_eq!(parse_exit_marker("OUTPUT:\nhi\n"), None);
    }

    #[tokio::test]
    async fn malformed_header_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let job_id = Uuid::new_v4();
        store
            .create(&store.shell_log_path(job_id), "not a metadata line\n")
            .await
            .unwrap();

        let completed = store.scan().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].job_id, job_id.to_string());
        assert!(completed[0].timestamp > 0.0);
    }
}
