//! Error types shared by every reporting operation.
//!
//! Errors are categorized by what the caller can do about them:
//! - **Contained**: `Transport`, `UnresolvedParent`, `Abandoned` - stored in
//!   the failing operation's [`Deferred`](crate::deferred::Deferred) and
//!   logged; sibling operations are unaffected
//! - **Caller misuse**: `ImbalancedLifecycle`, `AlreadyResolved` - returned
//!   synchronously from the offending call
//! - **Degraded shutdown**: `DrainTimeoutExceeded` - surfaced as a warning and
//!   in [`DrainReport`](crate::strategy::DrainReport), never as a hard failure
//!
//! [`ReportError`] is `Clone` because one failure is handed to every consumer
//! awaiting the same deferred result.

/// Result type for reporting operations.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors that can occur while reporting to the collection service.
///
/// # Example
///
/// ```
/// use rp_client::ReportError;
///
/// fn describe(err: &ReportError) -> &'static str {
///     match err {
///         ReportError::Transport { .. } => "network",
///         ReportError::UnresolvedParent { .. } => "skipped",
///         ReportError::ImbalancedLifecycle(_) => "misuse",
///         _ => "other",
///     }
/// }
///
/// let err = ReportError::UnresolvedParent { operation: "finish_item".into() };
/// assert_eq!(describe(&err), "skipped");
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportError {
    /// The HTTP call failed: connection, timeout, or a non-success status.
    #[error("{operation} request failed: {message}")]
    Transport {
        /// Name of the reporting operation that issued the request.
        operation: String,
        /// HTTP status code, when the service answered at all.
        status: Option<u16>,
        /// Error text from the client library or the service.
        message: String,
    },

    /// The parent entity resolved to `NOT_FOUND` (or failed), so the request
    /// was never sent.
    #[error("{operation} skipped: parent entity could not be resolved")]
    UnresolvedParent {
        /// Name of the short-circuited operation.
        operation: String,
    },

    /// A lifecycle call had no matching counterpart, e.g. finishing an item
    /// that was never started.
    #[error("Imbalanced lifecycle: {0}")]
    ImbalancedLifecycle(String),

    /// Shutdown drain ran out of time; the given number of units were
    /// abandoned.
    #[error("Drain timed out with {abandoned} unit(s) still running")]
    DrainTimeoutExceeded {
        /// Units the drain stopped waiting for.
        abandoned: usize,
    },

    /// A deferred result was settled twice.
    #[error("Deferred result was already resolved")]
    AlreadyResolved,

    /// The unit of work producing this result was dropped before it finished.
    #[error("Unit of work was abandoned before completion")]
    Abandoned,

    /// A scheduling runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Client configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReportError {
    /// Builds a [`ReportError::Transport`] for the named operation.
    pub fn transport(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Builds a [`ReportError::UnresolvedParent`] for the named operation.
    pub fn unresolved(operation: impl Into<String>) -> Self {
        Self::UnresolvedParent {
            operation: operation.into(),
        }
    }

    /// Returns `true` for errors that indicate caller misuse rather than a
    /// transient condition.
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            Self::ImbalancedLifecycle(_) | Self::AlreadyResolved
        )
    }
}
