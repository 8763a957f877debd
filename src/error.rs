use thiserror::Error;

/// Errors surfaced by configuration, numeric construction and event-log replay.
///
/// Misuse of the filter itself (out-of-order timesteps, querying a landmark that
/// was never observed) is not reported here: those are contract violations and
/// panic.
#[derive(Debug, Error)]
pub enum SlamError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A covariance matrix has a negative pivot beyond round-off tolerance.
    #[error("covariance is not positive semi-definite")]
    NotPositiveSemiDefinite,

    /// The CSV event log could not be read or parsed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A record of the event log is inconsistent with the events before it.
    #[error("replay failed at record {record}: {message}")]
    Replay { record: usize, message: String },
}

pub type Result<T> = std::result::Result<T, SlamError>;
