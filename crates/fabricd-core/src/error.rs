/// Outcome of a single non-blocking packet transmission.
///
/// The send primitive performs no retry of its own; callers (drivers and
/// the enumerator) implement their own timeout/backoff.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The OS write buffer is full; try again later.
    #[error("link busy (write buffer full)")]
    Busy,

    /// No serial link is currently attached.
    #[error("link down")]
    LinkDown,

    /// Unexpected OS error on the link.
    #[error("link write failed: {0}")]
    Fatal(#[from] std::io::Error),
}

/// Errors from the external driver-loading collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No driver module with this name exists.
    #[error("no driver module named {driver:?}")]
    NotFound { driver: String },

    /// The module loaded but its initialization failed.
    #[error("driver {driver:?} failed to initialize: {reason}")]
    Init { driver: String, reason: String },
}
