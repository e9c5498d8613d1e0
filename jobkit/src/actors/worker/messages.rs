use std::time::Duration;

use tokio::sync::oneshot;

use crate::errors;
use crate::events::JobStatus;

pub enum WorkerMessage {
    GetStatus {
        response: oneshot::Sender<JobStatus>,
    },
    Stop {
        grace: Duration,
        response: oneshot::Sender<errors::Result<()>>,
    },
}
