use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use bytes::BytesMut;
use futures::future::FutureExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::messages::WorkerMessage;
use crate::errors::Error;
use crate::events::{JobStatus, Output};
use crate::types::OutputBlob;

const DROP_GRACE: Duration = Duration::from_millis(100);

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    kill_tx: Option<oneshot::Sender<Duration>>,
    job_status: JobStatus,
    stop_waiters: Vec<oneshot::Sender<crate::errors::Result<()>>>,
}

impl Actor {
    pub fn spawn(inbox: mpsc::UnboundedReceiver<WorkerMessage>, child: Child, log_path: PathBuf) {
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(async move {
            let actor = Self {
                inbox,
                kill_tx: Some(kill_tx),
                job_status: JobStatus::Running,
                stop_waiters: Vec::new(),
            };
            actor.run(kill_rx, child, log_path).await;
        });
    }

    async fn run(
        mut self,
        kill_rx: oneshot::Receiver<Duration>,
        mut child: Child,
        log_path: PathBuf,
    ) {
        let (exit_tx, exit_rx) = oneshot::channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        // the appender owns the log file; chunks land in arrival order
        tokio::spawn(append_output(log_path, output_rx));

        if let Some(stdout) = child.stdout.take() {
            drain(stdout, output_tx.clone(), Output::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            drain(stderr, output_tx, Output::Stderr);
        }

        tokio::spawn(supervise(child, kill_rx, exit_tx));

        self.handle_messages(exit_rx).await;
    }

    async fn handle_messages(&mut self, exit_rx: oneshot::Receiver<JobStatus>) {
        use WorkerMessage::*;
        let mut exit_rx = exit_rx.fuse();
        loop {
            select! {
                maybe_msg = self.inbox.recv() => {
                    match maybe_msg {
                        Some(GetStatus { response }) => {
                            let _ = response.send(self.job_status);
                        }
                        Some(Stop { grace, response }) => {
                            match (self.job_status, self.kill_tx.take()) {
                                (JobStatus::Running, Some(kill_tx)) => {
                                    let _ = kill_tx.send(grace);
                                    self.stop_waiters.push(response);
                                }
                                (JobStatus::Running, None) => {
                                    // a stop is already in flight; join it
                                    self.stop_waiters.push(response);
                                }
                                _ => {
                                    let _ = response.send(Err(Error::AlreadyStopped));
                                }
                            }
                        }
                        None => {
                            // handle dropped; make sure the child dies before we exit
                            if let Some(kill_tx) = self.kill_tx.take() {
                                let _ = kill_tx.send(DROP_GRACE);
                            }
                            return;
                        }
                    }
                }
                exit = &mut exit_rx => {
                    if let Ok(status) = exit {
                        self.job_status = status;
                    }
                    for waiter in self.stop_waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
        }
    }
}

/// Read one stream incrementally and forward each chunk as soon as it is
/// available, so partial output is durably observable before exit.
fn drain<R>(mut reader: R, tx: mpsc::UnboundedSender<Output>, wrap: fn(OutputBlob) -> Output)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match reader.read_buf(&mut buf).await {
                Ok(n) if n > 0 => {
                    let _ = tx.send(wrap(buf.split().freeze()));
                }
                _ => break,
            }
        }
    });
}

async fn append_output(log_path: PathBuf, mut rx: mpsc::UnboundedReceiver<Output>) {
    let mut file = match OpenOptions::new().append(true).open(&log_path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "cannot open job log for append");
            return;
        }
    };
    while let Some(output) = rx.recv().await {
        if let Err(e) = file.write_all(output.blob()).await {
            warn!(path = %log_path.display(), error = %e, "job log append failed");
            break;
        }
        let _ = file.flush().await;
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<Duration>,
    exit_tx: oneshot::Sender<JobStatus>,
) {
    let mut kill_rx = kill_rx.fuse();
    let status = select! {
        grace = &mut kill_rx => {
            let grace = grace.unwrap_or(DROP_GRACE);
            terminate(&mut child, grace).await
        }
        exit = child.wait() => status_of(exit),
    };
    let _ = exit_tx.send(status);
}

/// Graceful-then-forced termination: SIGTERM, wait out the grace period,
/// then SIGKILL if the child is still alive.
async fn terminate(child: &mut Child, grace: Duration) -> JobStatus {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(exit) => status_of(exit),
        Err(_) => {
            let _ = child.kill().await;
            status_of(child.wait().await)
        }
    }
}

fn status_of(exit: io::Result<ExitStatus>) -> JobStatus {
    match exit {
        Ok(status) => {
            if let Some(code) = status.code() {
                JobStatus::Exited { code }
            } else {
                JobStatus::Killed {
                    signal: status.signal().unwrap_or_default(),
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "child wait failed");
            JobStatus::Exited { code: -1 }
        }
    }
}
