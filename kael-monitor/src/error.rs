use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("target process could not be found or opened")]
    TargetUnavailable,

    #[error(transparent)]
    Ipc(#[from] kael_ipc::IpcError),

    #[error(transparent)]
    Symbol(#[from] kael_trace::SymbolError),

    #[error(transparent)]
    Format(#[from] kael_format::FormatError),

    #[error("library injection into the target process failed")]
    InjectFailed,

    #[error("no output format selected: pass --csv and/or --sqlite")]
    NoOutputFormat,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
