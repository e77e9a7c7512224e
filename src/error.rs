//! Error taxonomy surfaced at the request boundary.
//!
//! Internal plumbing (git subprocesses, filesystem access, config parsing)
//! works with [`anyhow::Result`]. Anything an operator can trigger is
//! classified into one of the variants below before it leaves the service,
//! so the HTTP layer and the CLI can report it without guessing.
//!
//! Hunk conflicts are not errors: they are partial failures
//! reported inside [`crate::patch::HunkApplyResult`].

/// Errors returned by [`crate::service::ConfigSyncService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No reference repository URL has been configured.
    #[error("No reference repository URL configured")]
    NotConfigured,

    /// Fetching or checking out the reference repository failed.
    /// The previously checked-out tree is left as it was.
    #[error("Sync failed: {0}")]
    Sync(String),

    /// No reference branch could be chosen for the detected version.
    #[error("{0}")]
    Resolution(String),

    /// A mutation targeted a file on the protect-list.
    #[error("Protected file cannot be overwritten: {0}")]
    Protected(String),

    /// Deleting this snapshot would leave the backup history empty.
    #[error("Cannot delete the only backup")]
    LastBackup,

    /// Unknown file path or backup hash.
    #[error("{0}")]
    NotFound(String),

    /// A sync is already running; syncs never queue.
    #[error("A sync is already in progress")]
    SyncInProgress,

    /// The request itself is malformed (missing query parameter, bad body).
    #[error("{0}")]
    InvalidRequest(String),

    /// Anything else: I/O failures, git plumbing errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code used when this error crosses the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotConfigured | Error::InvalidRequest(_) => 400,
            Error::Protected(_) => 403,
            Error::NotFound(_) => 404,
            Error::LastBackup | Error::SyncInProgress => 409,
            Error::Resolution(_) => 422,
            Error::Internal(_) => 500,
            Error::Sync(_) => 502,
        }
    }

    /// Short machine-readable kind, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotConfigured => "configuration",
            Error::Sync(_) => "sync",
            Error::Resolution(_) => "resolution",
            Error::Protected(_) => "protected",
            Error::LastBackup => "last_backup",
            Error::NotFound(_) => "not_found",
            Error::SyncInProgress => "busy",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
