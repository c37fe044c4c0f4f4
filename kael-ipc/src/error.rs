use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("could not create named event {0}")]
    CreateFailed(String),

    #[error("named event {0} was never opened before the retry budget ran out")]
    OpenTimedOut(String),

    #[error("wait on event {0} failed")]
    WaitFailed(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;
