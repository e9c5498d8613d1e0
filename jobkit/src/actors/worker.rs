mod actor;
mod messages;

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::errors;
use crate::events::JobStatus;
use actor::Actor;
use messages::WorkerMessage;

/// Handle to one running job's process.
///
/// The real work happens in the actor spawned by `WorkerHandle::spawn`: it
/// supervises the child, drains stdout/stderr into the job's log file as the
/// chunks arrive, and answers liveness polls. The handle can be cloned freely
/// across tasks; dropping the last clone kills the child.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    /// Spawn the child process immediately. Never blocks on the child; the
    /// only failure mode is the OS refusing the spawn itself.
    pub fn spawn(
        program: &str,
        args: &[String],
        stdin_payload: Option<String>,
        log_path: PathBuf,
    ) -> io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;

        // write the payload once and close stdin to signal end-of-input
        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = stdin.write_all(payload.as_bytes()).await;
                    let _ = stdin.write_all(b"\n").await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, child, log_path);
        Ok(Self { sender })
    }

    /// Non-blocking liveness check. `None` means the actor itself is gone,
    /// in which case the log file is the only remaining record.
    pub async fn status(&self) -> Option<JobStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::GetStatus { response: tx })
            .ok()?;
        rx.await.ok()
    }

    /// Request graceful termination, escalating to a forced kill after
    /// `grace`. Resolves once the process is confirmed dead. Stopping an
    /// already-dead process yields `Err(AlreadyStopped)`.
    pub async fn stop(&self, grace: Duration) -> errors::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerMessage::Stop {
                grace,
                response: tx,
            })
            .map_err(|_| errors::Error::AlreadyStopped)?;
        rx.await.map_err(|_| errors::Error::AlreadyStopped)?
    }
}
