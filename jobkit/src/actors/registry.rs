mod actor;
mod messages;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use self::actor::JobRegistryActor;
use self::messages::RegistryMessage::{self, Cancel, GetStatus, List, SubmitPrompt, SubmitShell};
use crate::errors;
use crate::logfile::LogStore;
use crate::types::{
    CancelOutcome, JobId, JobListing, JobState, PromptSpec, ShellSpec, StatusReport, Submission,
};

/// Inference CLI invoked for prompt jobs unless overridden.
pub const DEFAULT_MODEL_CLI: &str = "ollama";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The job registry: single source of truth for all job lifecycles.
///
/// This struct is actually an actor handle; the bookkeeping lives in the
/// actor spawned by `JobRegistryHandle::spawn`. The handle can be cloned
/// freely in a multi-thread async context without any extra synchronization,
/// and each test can run its own isolated registry over a scratch directory.
#[derive(Clone)]
pub struct JobRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
}

impl JobRegistryHandle {
    /// Spawn a registry over the given log store, invoking the default
    /// inference CLI for prompt jobs.
    ///
    /// `message_capacity` bounds the build-up of inbound messages.
    pub fn spawn(store: LogStore, message_capacity: usize) -> Self {
        Self::spawn_with_model_cli(store, DEFAULT_MODEL_CLI, message_capacity)
    }

    /// Spawn with an explicit inference CLI program name or path.
    pub fn spawn_with_model_cli(
        store: LogStore,
        model_cli: impl Into<String>,
        message_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(message_capacity);
        JobRegistryActor::spawn(receiver, sender.clone(), store, model_cli.into());
        Self { sender }
    }

    /// Start a prompt job. Returns as soon as the process is spawned.
    pub async fn submit_prompt(&self, spec: PromptSpec) -> errors::Result<Submission> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SubmitPrompt {
                spec,
                response: tx,
            })
            .await
            .expect("JobRegistry exited");
        rx.await.expect("JobRegistry exited")
    }

    /// Start a shell job via `sh -c`. Returns as soon as the process is spawned.
    pub async fn submit_shell(&self, spec: ShellSpec) -> errors::Result<Submission> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SubmitShell {
                spec,
                response: tx,
            })
            .await
            .expect("JobRegistry exited");
        rx.await.expect("JobRegistry exited")
    }

    /// Query a job's state. Unknown ids yield a `not_found` report rather
    /// than an error; terminal states carry the normalized log content.
    pub async fn status(&self, job_id: JobId) -> StatusReport {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GetStatus {
                job_id,
                response: tx,
            })
            .await
            .expect("JobRegistry exited");
        rx.await.expect("JobRegistry exited")
    }

    /// Cancel a running job: graceful terminate, forced kill after the grace
    /// period, cancellation marker appended to the log. Cancelling a job
    /// that already finished reports `AlreadyComplete` and leaves its log
    /// untouched.
    pub async fn cancel(&self, job_id: JobId) -> CancelOutcome {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Cancel {
                job_id,
                response: tx,
            })
            .await
            .expect("JobRegistry exited");
        rx.await.expect("JobRegistry exited")
    }

    /// List running and completed jobs. A job id never appears in both.
    pub async fn list(&self) -> JobListing {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(List { response: tx })
            .await
            .expect("JobRegistry exited");
        rx.await.expect("JobRegistry exited")
    }

    /// Poll until the job reaches a terminal state. On timeout the job is
    /// left running and a `timeout` report is returned; the caller decides
    /// whether to cancel.
    pub async fn wait(&self, job_id: JobId, timeout: Option<Duration>) -> StatusReport {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let report = self.status(job_id).await;
            if report.is_terminal() {
                return report;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return StatusReport {
                        job_id,
                        state: JobState::Timeout,
                        log_path: report.log_path,
                        exit_code: None,
                        content: None,
                        message: Some("timed out waiting for job completion".to_string()),
                    };
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
