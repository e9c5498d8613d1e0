//! Workflow sequencer: run an ordered list of steps against the job
//! registry, recording every step's inputs and outcome into one aggregate
//! log. A failing step is recorded and the sequence continues, so a caller
//! always sees the full picture of a partially-failing pipeline.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actors::registry::{JobRegistryHandle, DEFAULT_MODEL_CLI};
use crate::logfile::{epoch_now, LogStore};
use crate::models;
use crate::types::{JobId, JobState, PromptSpec, ShellSpec};

/// One step of a workflow: a tool name, its parameters, and an optional
/// display name for the log.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkflowStep {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub name: Option<String>,
}

/// Closed dispatch table for workflow steps. Names outside this table are a
/// per-step error, never a fatal abort of the sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepOperation {
    RunPrompt,
    RunShell,
    GetStatus,
    CancelJob,
    ListJobs,
    ListModels,
}

impl StepOperation {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "run_prompt" => Some(Self::RunPrompt),
            "run_shell" => Some(Self::RunShell),
            "get_status" => Some(Self::GetStatus),
            "cancel_job" => Some(Self::CancelJob),
            "list_jobs" => Some(Self::ListJobs),
            "list_models" => Some(Self::ListModels),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepResult {
    pub step: usize,
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowReceipt {
    pub run_id: JobId,
    pub status: JobState,
    pub log_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<StepResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct JobIdParams {
    job_id: JobId,
}

pub struct WorkflowSequencer {
    registry: JobRegistryHandle,
    store: LogStore,
    model_cli: String,
    // background runs stay supervised so shutdown can join them
    running: Arc<Mutex<Vec<JoinHandle<Vec<StepResult>>>>>,
}

impl WorkflowSequencer {
    pub fn new(registry: JobRegistryHandle, store: LogStore) -> Self {
        Self::with_model_cli(registry, store, DEFAULT_MODEL_CLI)
    }

    pub fn with_model_cli(
        registry: JobRegistryHandle,
        store: LogStore,
        model_cli: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            model_cli: model_cli.into(),
            running: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Execute the steps strictly in order. With `wait` the call blocks
    /// until the last step finished and returns every step's result; without
    /// it the run continues in the background and the caller polls the
    /// aggregate log for progress.
    pub async fn run(&self, steps: Vec<WorkflowStep>, wait: bool) -> WorkflowReceipt {
        let run_id = Uuid::new_v4();
        let log_path = self.store.workflow_log_path(run_id);
        let metadata = serde_json::json!({
            "run_id": run_id,
            "started_at": epoch_now(),
            "steps_count": steps.len(),
        });
        let header = format!(
            "WORKFLOW RUN: {}\n\nOUTPUT DIR: {}\n\n",
            metadata,
            self.store.dir().display(),
        );
        if let Err(e) = self.store.create(&log_path, &header).await {
            return WorkflowReceipt {
                run_id,
                status: JobState::Error,
                log_path,
                results: None,
                message: Some(format!("cannot create workflow log: {}", e)),
            };
        }
        info!(%run_id, steps = steps.len(), wait, "workflow run started");

        let runner = StepRunner {
            registry: self.registry.clone(),
            model_cli: self.model_cli.clone(),
            store: self.store.clone(),
            log_path: log_path.clone(),
        };
        if wait {
            let results = runner.execute(steps).await;
            WorkflowReceipt {
                run_id,
                status: JobState::Complete,
                log_path,
                results: Some(results),
                message: None,
            }
        } else {
            let handle = tokio::spawn(async move { runner.execute(steps).await });
            self.running
                .lock()
                .expect("workflow handle lock poisoned")
                .push(handle);
            WorkflowReceipt {
                run_id,
                status: JobState::Running,
                log_path,
                results: None,
                message: Some("workflow started, poll the log file for progress".to_string()),
            }
        }
    }

    /// Join every background run started with `wait == false`.
    pub async fn join_all(&self) {
        let handles: Vec<_> = {
            let mut running = self.running.lock().expect("workflow handle lock poisoned");
            running.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

struct StepRunner {
    registry: JobRegistryHandle,
    model_cli: String,
    store: LogStore,
    log_path: PathBuf,
}

impl StepRunner {
    async fn execute(&self, steps: Vec<WorkflowStep>) -> Vec<StepResult> {
        let mut results = Vec::new();
        for (i, step) in steps.into_iter().enumerate() {
            let step_num = i + 1;
            let name = step
                .name
                .clone()
                .unwrap_or_else(|| format!("Step {}", step_num));
            self.append(&format!(
                "\n--- STEP {}: {} ---\nTool: {}\nParams: {}\n\n",
                step_num, name, step.tool, step.params,
            ))
            .await;

            match self.run_step(&step).await {
                Ok(value) => {
                    self.append(&format!("Result: {}\n", value)).await;
                    results.push(StepResult {
                        step: step_num,
                        name,
                        status: StepStatus::Success,
                        result: Some(value),
                        message: None,
                    });
                }
                Err(message) => {
                    let message = format!("ERROR executing {}: {}", step.tool, message);
                    self.append(&format!("{}\n", message)).await;
                    results.push(StepResult {
                        step: step_num,
                        name,
                        status: StepStatus::Error,
                        result: None,
                        message: Some(message),
                    });
                }
            }
        }
        self.append("\n--- WORKFLOW COMPLETED ---\n").await;
        results
    }

    async fn run_step(&self, step: &WorkflowStep) -> Result<Value, String> {
        let op = StepOperation::from_name(&step.tool)
            .ok_or_else(|| format!("Unknown tool: {}", step.tool))?;
        let params = if step.params.is_null() {
            Value::Object(Default::default())
        } else {
            step.params.clone()
        };
        match op {
            StepOperation::RunPrompt => {
                let spec: PromptSpec = serde_json::from_value(params).map_err(stringify)?;
                let submission = self.registry.submit_prompt(spec).await.map_err(stringify)?;
                // wait so this step's completion is logged before the next
                // step's header is written
                let report = self.registry.wait(submission.job_id, None).await;
                serde_json::to_value(report).map_err(stringify)
            }
            StepOperation::RunShell => {
                let params: ShellParams = serde_json::from_value(params).map_err(stringify)?;
                let timeout = params.timeout.map(Duration::from_secs);
                let submission = self
                    .registry
                    .submit_shell(ShellSpec {
                        command: params.command,
                    })
                    .await
                    .map_err(stringify)?;
                let report = self.registry.wait(submission.job_id, timeout).await;
                serde_json::to_value(report).map_err(stringify)
            }
            StepOperation::GetStatus => {
                let params: JobIdParams = serde_json::from_value(params).map_err(stringify)?;
                serde_json::to_value(self.registry.status(params.job_id).await).map_err(stringify)
            }
            StepOperation::CancelJob => {
                let params: JobIdParams = serde_json::from_value(params).map_err(stringify)?;
                serde_json::to_value(self.registry.cancel(params.job_id).await).map_err(stringify)
            }
            StepOperation::ListJobs => {
                serde_json::to_value(self.registry.list().await).map_err(stringify)
            }
            StepOperation::ListModels => {
                let models = models::list_models(&self.model_cli)
                    .await
                    .map_err(stringify)?;
                serde_json::to_value(models).map_err(stringify)
            }
        }
    }

    async fn append(&self, text: &str) {
        if let Err(e) = self.store.append(&self.log_path, text).await {
            warn!(path = %self.log_path.display(), error = %e, "workflow log append failed");
        }
    }
}

fn stringify(e: impl std::fmt::Display) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_step(command: &str, name: &str) -> WorkflowStep {
        WorkflowStep {
            tool: "run_shell".to_string(),
            params: serde_json::json!({ "command": command }),
            name: Some(name.to_string()),
        }
    }

    fn sequencer(dir: &std::path::Path) -> WorkflowSequencer {
        let store = LogStore::new(dir.to_path_buf());
        let registry = JobRegistryHandle::spawn(store.clone(), 16);
        WorkflowSequencer::new(registry, store)
    }

    #[tokio::test]
    async fn continues_past_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let sequencer = sequencer(dir.path());
        let steps = vec![
            shell_step("echo step one", "first"),
            WorkflowStep {
                tool: "bogus_tool".to_string(),
                params: Value::Null,
                name: None,
            },
            shell_step("echo step three", "third"),
        ];

        let receipt = sequencer.run(steps, true).await;
        assert_eq!(receipt.status, JobState::Complete);
        let results = receipt.results.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(results[1].status, StepStatus::Error);
        assert!(results[1]
            .message
            .as_deref()
            .unwrap()
            .contains("Unknown tool: bogus_tool"));
        assert_eq!(results[2].status, StepStatus::Success);

        let log = tokio::fs::read_to_string(&receipt.log_path).await.unwrap();
        let step1 = log.find("--- STEP 1: first ---").unwrap();
        let step2 = log.find("--- STEP 2: Step 2 ---").unwrap();
        let step3 = log.find("--- STEP 3: third ---").unwrap();
        assert!(step1 < step2 && step2 < step3);
        assert!(log.contains("Unknown tool: bogus_tool"));
        assert!(log.contains("--- WORKFLOW COMPLETED ---"));
    }

    #[tokio::test]
    async fn malformed_params_are_a_step_error() {
        let dir = tempfile::tempdir().unwrap();
        let sequencer = sequencer(dir.path());
        let steps = vec![WorkflowStep {
            tool: "run_shell".to_string(),
            params: serde_json::json!({ "command": 42 }),
            name: None,
        }];

        let receipt = sequencer.run(steps, true).await;
        let results = receipt.results.unwrap();
        assert_eq!(results[0].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn fire_and_forget_is_supervised() {
        let dir = tempfile::tempdir().unwrap();
        let sequencer = sequencer(dir.path());
        let receipt = sequencer
            .run(vec![shell_step("echo detached", "only")], false)
            .await;
        assert_eq!(receipt.status, JobState::Running);

        sequencer.join_all().await;
        let log = tokio::fs::read_to_string(&receipt.log_path).await.unwrap();
        assert!(log.contains("--- WORKFLOW COMPLETED ---"));
    }
}
