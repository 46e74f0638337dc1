use std::process::ExitStatus;

pub type AppResult<T> = Result<T, VolwatchError>;

#[derive(Debug, thiserror::Error)]
pub enum VolwatchError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to run {cmd}: {source}")]
    Spawn {
        cmd: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{cmd} exited with {status}: {stderr}")]
    CommandFailed {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Unexpected {cmd} output: {output:?}")]
    UnexpectedOutput { cmd: String, output: String },
    #[error("Event stream closed")]
    EventStreamClosed,
}
