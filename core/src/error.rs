use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenErr>;

#[derive(Debug, Error)]
pub enum WardenErr {
    /// Programming-contract violation: start was requested while a
    /// non-terminated invocation exists. Detected before any spawn work.
    #[error("cannot start the download engine: a running invocation already exists")]
    AlreadyRunning,

    #[error("failed to allocate pseudo-terminal: {pty_error}")]
    OpenPty {
        #[source]
        pty_error: anyhow::Error,
    },

    #[error("failed to spawn the download engine: {pty_error}")]
    Spawn {
        #[source]
        pty_error: anyhow::Error,
    },

    #[error("download engine executable `{program}` not found")]
    MissingExecutable {
        program: String,
        #[source]
        source: which::Error,
    },

    /// The spawn reported a process id that cannot belong to a live child.
    #[error("spawn produced invalid process id {pid}")]
    InvalidPid { pid: i32 },

    #[error("supervisor worker is no longer accepting commands")]
    WorkerGone,
}

impl WardenErr {
    pub(crate) fn open_pty(error: anyhow::Error) -> Self {
        Self::OpenPty { pty_error: error }
    }

    pub(crate) fn spawn(error: anyhow::Error) -> Self {
        Self::Spawn { pty_error: error }
    }
}
