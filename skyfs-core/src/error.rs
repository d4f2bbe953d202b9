use thiserror::Error;

/// Every failure the core can report. Callers branch on [`Error::kind`]
/// rather than on message text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("insufficient contracts: need {needed} distinct providers, have {available}")]
    InsufficientContracts { needed: usize, available: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("ledger consistency violated: {0}")]
    Consistency(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    SignatureMismatch,
    CapacityExceeded,
    InsufficientContracts,
    NotFound,
    Conflict,
    Consistency,
    Transport,
    Cancelled,
    Io,
    Json,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::SignatureMismatch(_) => ErrorKind::SignatureMismatch,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::InsufficientContracts { .. } => ErrorKind::InsufficientContracts,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Consistency(_) => ErrorKind::Consistency,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Only transport failures are worth retrying; everything else is a
    /// decision the remote side (or our own state) already made.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
