use std::io;
use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] io::Error),
    #[error("no such job exists")]
    NotFound,
    #[error("job has already stopped")]
    AlreadyStopped,
    #[error("process exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },
    #[error("malformed log header: {0}")]
    Parse(String),
}

pub type Result<T> = result::Result<T, Error>;
