use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The tracker answered with a `failure reason`.
    #[error("tracker returned error: {0}")]
    Failure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timeout")]
    Timeout,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Every tracker is waiting out its retry delay.
    #[error("all trackers backing off")]
    BackingOff,

    /// Every tracker has used up its retry budget.
    #[error("all trackers exhausted")]
    Exhausted,
}

impl TrackerError {
    /// Transport-level failures, as opposed to the tracker rejecting us.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TrackerError::Io(_) | TrackerError::Http(_) | TrackerError::Timeout
        )
    }
}
