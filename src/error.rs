use thiserror::Error;

/// Everything that can go wrong around the limiter.
///
/// None of these are fatal to the control loop: a failed tick is skipped
/// (or run fail-open) and retried on the next one.
#[derive(Debug, Error)]
pub enum TameError {
    /// Peak meter missing or disconnected. The loop treats the tick as silent.
    #[error("peak source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("volume unavailable: {0}")]
    VolumeUnavailable(String),
    #[error("volume write rejected: {0}")]
    VolumeWriteRejected(String),
    #[error("invalid config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("settings could not be parsed: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TameError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = TameError> = std::result::Result<T, E>;
