use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use super::messages::RegistryMessage;
use crate::actors::worker::WorkerHandle;
use crate::errors::{Error, Result};
use crate::events::JobStatus;
use crate::logfile::{exit_marker, parse_exit_marker, LogStore, CANCELLED_MARKER};
use crate::normalize::normalize;
use crate::types::{
    CancelOutcome, JobId, JobListing, JobState, OutputFormat, PromptPayload, PromptSpec,
    ShellSpec, StatusReport, Submission,
};

/// Grace period between SIGTERM and the forced kill during cancellation.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct JobRegistryActor {
    inbox: mpsc::Receiver<RegistryMessage>,
    sender: mpsc::Sender<RegistryMessage>,
    workers: HashMap<JobId, WorkerHandle>,
    store: LogStore,
    model_cli: String,
}

impl JobRegistryActor {
    pub fn spawn(
        inbox: mpsc::Receiver<RegistryMessage>,
        sender: mpsc::Sender<RegistryMessage>,
        store: LogStore,
        model_cli: String,
    ) {
        let actor = Self {
            inbox,
            sender,
            workers: HashMap::new(),
            store,
            model_cli,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use RegistryMessage::*;
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                SubmitPrompt { spec, response } => {
                    let _ = response.send(self.submit_prompt(spec).await);
                }
                SubmitShell { spec, response } => {
                    let _ = response.send(self.submit_shell(spec).await);
                }
                GetStatus { job_id, response } => {
                    let _ = response.send(self.get_status(job_id).await);
                }
                Cancel { job_id, response } => {
                    self.cancel(job_id, response);
                }
                CancelSettled {
                    job_id,
                    stopped,
                    response,
                } => {
                    let _ = response.send(self.cancel_settled(job_id, stopped).await);
                }
                List { response } => {
                    let _ = response.send(self.list().await);
                }
            }
        }
    }

    async fn submit_prompt(&mut self, spec: PromptSpec) -> Result<Submission> {
        let job_id = Uuid::new_v4();
        let log_path = self.store.write_prompt_header(job_id, &spec).await?;
        let payload = serde_json::to_string(&PromptPayload {
            prompt: &spec.prompt,
            stream: true,
            temperature: spec.temperature,
            system: spec.system_prompt.as_deref(),
            num_predict: spec.max_tokens,
            format: match spec.output_format {
                OutputFormat::Json => Some("json"),
                OutputFormat::Text => None,
            },
        })
        .map_err(|e| Error::Spawn(io::Error::other(e)))?;
        let args = vec![
            "run".to_string(),
            spec.model.clone(),
            "--format".to_string(),
            "json".to_string(),
        ];
        let worker =
            WorkerHandle::spawn(&self.model_cli, &args, Some(payload), log_path.clone())?;
        self.workers.insert(job_id, worker);
        info!(%job_id, model = %spec.model, "prompt job started");
        Ok(Submission { job_id, log_path })
    }

    async fn submit_shell(&mut self, spec: ShellSpec) -> Result<Submission> {
        let job_id = Uuid::new_v4();
        let log_path = self.store.write_shell_header(job_id, &spec.command).await?;
        let args = vec!["-c".to_string(), spec.command.clone()];
        let worker = WorkerHandle::spawn("sh", &args, None, log_path.clone())?;
        self.workers.insert(job_id, worker);
        info!(%job_id, command = %spec.command, "shell job started");
        Ok(Submission { job_id, log_path })
    }

    async fn get_status(&mut self, job_id: JobId) -> StatusReport {
        let log_path = self.store.find(job_id);
        if let Some(worker) = self.workers.get(&job_id) {
            return match worker.status().await {
                Some(JobStatus::Running) => {
                    let path = log_path.unwrap_or_else(|| self.store.prompt_log_path(job_id));
                    StatusReport::running(job_id, path)
                }
                Some(JobStatus::Exited { code }) => {
                    self.workers.remove(&job_id);
                    if let Some(path) = &log_path {
                        self.seal_exit(job_id, path, code).await;
                    }
                    self.finish(job_id, log_path, Some(code), false).await
                }
                Some(JobStatus::Killed { .. }) | None => {
                    self.workers.remove(&job_id);
                    if let Some(path) = &log_path {
                        self.seal_cancelled(job_id, path).await;
                    }
                    self.finish(job_id, log_path, None, true).await
                }
            };
        }
        match log_path {
            Some(path) => self.finish(job_id, Some(path), None, false).await,
            None => StatusReport::not_found(job_id),
        }
    }

    /// Seal the reaped exit code into the log, once, so polls after eviction
    /// keep reporting the same terminal state. A cancellation that landed
    /// first wins; sealing is skipped then.
    async fn seal_exit(&self, job_id: JobId, path: &Path, code: i32) {
        match self.store.read(path).await {
            Ok(raw) if raw.contains(CANCELLED_MARKER) || parse_exit_marker(&raw).is_some() => {}
            Ok(_) => {
                let marker = format!("\n\n{}\n", exit_marker(code));
                if let Err(e) = self.store.append(path, &marker).await {
                    warn!(%job_id, error = %e, "failed to append exit marker");
                }
            }
            Err(e) => warn!(%job_id, error = %e, "cannot seal exit status"),
        }
    }

    /// Seal a signal death observed by a status poll before the cancel task
    /// got to write its marker.
    async fn seal_cancelled(&self, job_id: JobId, path: &Path) {
        match self.store.read(path).await {
            Ok(raw) if raw.contains(CANCELLED_MARKER) => {}
            Ok(_) => {
                let marker = format!("\n\n{}\n", CANCELLED_MARKER);
                if let Err(e) = self.store.append(path, &marker).await {
                    warn!(%job_id, error = %e, "failed to append cancellation marker");
                }
            }
            Err(e) => warn!(%job_id, error = %e, "cannot seal cancellation"),
        }
    }

    /// Derive the terminal report from the log file. Read failures degrade
    /// to an error report; they never abort the query.
    async fn finish(
        &self,
        job_id: JobId,
        log_path: Option<PathBuf>,
        exit_code: Option<i32>,
        killed: bool,
    ) -> StatusReport {
        let path = match log_path {
            Some(path) => path,
            None => return StatusReport::not_found(job_id),
        };
        let raw = match self.store.read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                return StatusReport {
                    job_id,
                    state: JobState::Error,
                    log_path: Some(path),
                    exit_code,
                    content: None,
                    message: Some(format!("error reading output file: {}", e)),
                }
            }
        };
        let exit_code = exit_code.or_else(|| parse_exit_marker(&raw));
        let cancelled = killed || raw.contains(CANCELLED_MARKER);
        let content = Some(normalize(&raw));
        let (state, message) = if cancelled {
            (JobState::Cancelled, Some("process was terminated".to_string()))
        } else {
            match exit_code {
                Some(code) if code != 0 => (
                    JobState::Error,
                    Some(format!("process exited with code {}", code)),
                ),
                _ => (JobState::Complete, None),
            }
        };
        StatusReport {
            job_id,
            state,
            log_path: Some(path),
            exit_code,
            content,
            message,
        }
    }

    /// The wait for process death happens off the actor loop so a slow
    /// termination never blocks queries for other jobs. The outcome routes
    /// back as a `CancelSettled` message, so the marker append is serialized
    /// with poll-side eviction.
    fn cancel(&mut self, job_id: JobId, response: oneshot::Sender<CancelOutcome>) {
        if let Some(worker) = self.workers.get(&job_id) {
            let worker = worker.clone();
            let sender = self.sender.clone();
            tokio::spawn(async move {
                let stopped = worker.stop(GRACEFUL_TIMEOUT).await.is_ok();
                let _ = sender
                    .send(RegistryMessage::CancelSettled {
                        job_id,
                        stopped,
                        response,
                    })
                    .await;
            });
        } else if self.store.find(job_id).is_some() {
            let _ = response.send(CancelOutcome::AlreadyComplete { job_id });
        } else {
            let _ = response.send(CancelOutcome::NotFound { job_id });
        }
    }

    async fn cancel_settled(&mut self, job_id: JobId, stopped: bool) -> CancelOutcome {
        if !stopped {
            // the process was already dead on its own; leave the handle so
            // the next status poll seals its real exit code
            return CancelOutcome::AlreadyComplete { job_id };
        }
        self.workers.remove(&job_id);
        if let Some(path) = self.store.find(job_id) {
            match self.store.read(&path).await {
                // a status poll observed the exit first and sealed a normal
                // terminal state; honor it instead of introducing a second one
                Ok(raw) if parse_exit_marker(&raw).is_some() => {
                    return CancelOutcome::AlreadyComplete { job_id };
                }
                Ok(raw) if raw.contains(CANCELLED_MARKER) => {}
                Ok(_) => {
                    let marker = format!("\n\n{}\n", CANCELLED_MARKER);
                    if let Err(e) = self.store.append(&path, &marker).await {
                        warn!(%job_id, error = %e, "failed to append cancellation marker");
                    }
                }
                Err(e) => warn!(%job_id, error = %e, "cannot seal cancellation"),
            }
        }
        info!(%job_id, "job cancelled");
        CancelOutcome::Cancelled { job_id }
    }

    async fn list(&mut self) -> JobListing {
        // opportunistic eviction: any handle whose process has exited is
        // sealed and dropped here; eviction is idempotent so racing callers
        // are fine
        let mut running = Vec::new();
        let mut dead = Vec::new();
        for (job_id, worker) in &self.workers {
            match worker.status().await {
                Some(JobStatus::Running) => running.push(*job_id),
                status => dead.push((*job_id, status)),
            }
        }
        for (job_id, status) in dead {
            self.workers.remove(&job_id);
            if let Some(path) = self.store.find(job_id) {
                match status {
                    Some(JobStatus::Exited { code }) => {
                        self.seal_exit(job_id, &path, code).await
                    }
                    _ => self.seal_cancelled(job_id, &path).await,
                }
            }
        }
        let running_ids: HashSet<String> = running.iter().map(|id| id.to_string()).collect();
        let completed = match self.store.scan().await {
            Ok(completed) => completed
                .into_iter()
                .filter(|job| !running_ids.contains(&job.job_id))
                .collect(),
            Err(e) => {
                warn!(error = %e, "log directory scan failed");
                Vec::new()
            }
        };
        JobListing { running, completed }
    }
}
