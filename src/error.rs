use thiserror::Error;

/// Error kinds for the memory core (spec.md §7).
///
/// Anticipated conditions (safety rejection, gate failure, mirror/WAL I/O)
/// are never surfaced as panics and never abort the turn; only `Corrupt`
/// and `ConfigInvalid` are meant to stop the caller.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Backing file missing or locked beyond the retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// SQLite reported the database busy after all retries.
    #[error("store busy: {0}")]
    StoreBusy(String),

    /// The FTS index and canonical table were found inconsistent.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    /// A capture candidate was rejected by the Safety Filter.
    #[error("safety rejected: {reason}")]
    SafetyRejected { reason: &'static str },

    /// A capture candidate failed the confidence/importance gate.
    #[error("gate failed: {reason}")]
    GateFailed { reason: &'static str },

    /// Mirror file append failed. Never fatal to the calling turn.
    #[error("mirror I/O error: {0}")]
    MirrorIoError(String),

    /// WAL append failed. Never fatal to the calling turn.
    #[error("WAL I/O error: {0}")]
    WalIoError(String),

    /// Configuration failed to load or contained unknown keys.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying SQLite error not otherwise classified above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Unanticipated condition; logged with context by the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Short, stable error code — useful for structured logging and for any
    /// caller that wants to match on error class without destructuring.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            MemoryError::StoreBusy(_) => "STORE_BUSY",
            MemoryError::Corrupt(_) => "CORRUPT",
            MemoryError::SafetyRejected { .. } => "SAFETY_REJECTED",
            MemoryError::GateFailed { .. } => "GATE_FAILED",
            MemoryError::MirrorIoError(_) => "MIRROR_IO_ERROR",
            MemoryError::WalIoError(_) => "WAL_IO_ERROR",
            MemoryError::ConfigInvalid(_) => "CONFIG_INVALID",
            MemoryError::NotFound(_) => "NOT_FOUND",
            MemoryError::Database(_) => "DATABASE_ERROR",
            MemoryError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
