use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("registry request failed: {0}")]
    Transient(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("fetch failed {0} consecutive times")]
    FatalFetch(u32),
    #[error("worker {0} exited unexpectedly")]
    WorkerExited(&'static str),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}
