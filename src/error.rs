use thiserror::Error;
use tokio::sync::{mpsc, AcquireError};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid base-36 identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("At least one user agent is required to build an identity.")]
    NoSignatures,

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("Couldn't send a record to its sink, the sink is gone.")]
    RuntimeSendError,
    #[error("The admission semaphore was closed while the task source was running.")]
    AdmissionClosed(#[from] AcquireError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_value: mpsc::error::SendError<T>) -> Self {
        Error::RuntimeSendError
    }
}
