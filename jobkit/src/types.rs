use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logfile::CompletedJob;

pub type JobId = Uuid;
pub type OutputBlob = bytes::Bytes;

/// Output format hint passed through to the inference CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

fn default_temperature() -> f32 {
    0.7
}

/// A prompt to run against a local model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptSpec {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// A shell command to run via `sh -c`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShellSpec {
    pub command: String,
}

/// Stdin payload handed to the inference CLI, one JSON object.
#[derive(Serialize)]
pub(crate) struct PromptPayload<'a> {
    pub prompt: &'a str,
    pub stream: bool,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'a str>,
}

/// Lifecycle state reported for a job. A job leaves `Running` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Complete,
    Error,
    Cancelled,
    Timeout,
    NotFound,
}

/// Receipt returned by a submit operation.
#[derive(Clone, Debug, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub log_path: PathBuf,
}

/// Structured answer to a status query. Never an error for expected
/// conditions; unknown ids yield `state: NotFound`.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn not_found(job_id: JobId) -> Self {
        Self {
            job_id,
            state: JobState::NotFound,
            log_path: None,
            exit_code: None,
            content: None,
            message: Some(format!("no job found with id {}", job_id)),
        }
    }

    pub fn running(job_id: JobId, log_path: PathBuf) -> Self {
        Self {
            job_id,
            state: JobState::Running,
            log_path: Some(log_path),
            exit_code: None,
            content: None,
            message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, JobState::Running)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { job_id: JobId },
    AlreadyComplete { job_id: JobId },
    NotFound { job_id: JobId },
}

/// Running jobs come from the live handle map, completed jobs from the log
/// directory scan. An id never appears in both.
#[derive(Clone, Debug, Serialize)]
pub struct JobListing {
    pub running: Vec<JobId>,
    pub completed: Vec<CompletedJob>,
}
