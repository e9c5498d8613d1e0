use tokio::sync::oneshot;

use crate::errors;
use crate::types::{CancelOutcome, JobId, JobListing, PromptSpec, ShellSpec, StatusReport, Submission};

pub enum RegistryMessage {
    SubmitPrompt {
        spec: PromptSpec,
        response: oneshot::Sender<errors::Result<Submission>>,
    },
    SubmitShell {
        spec: ShellSpec,
        response: oneshot::Sender<errors::Result<Submission>>,
    },
    GetStatus {
        job_id: JobId,
        response: oneshot::Sender<StatusReport>,
    },
    Cancel {
        job_id: JobId,
        response: oneshot::Sender<CancelOutcome>,
    },
    // sent by the off-loop stop task once process death is settled, so the
    // marker append happens on the actor, serialized with poll-side eviction
    CancelSettled {
        job_id: JobId,
        stopped: bool,
        response: oneshot::Sender<CancelOutcome>,
    },
    List {
        response: oneshot::Sender<JobListing>,
    },
}
