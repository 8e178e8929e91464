//! Error types for the synchronization core
//!
//! Two levels:
//! - `SourceError`: what one Source Adapter attempt can fail with
//! - `SyncError`: what the core surfaces to callers after routing/rollback

use thiserror::Error;

/// Failure of a single Source Adapter call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network/transport failure, timeout, or transient server failure
    #[error("{adapter} unreachable: {message}")]
    Unreachable { adapter: String, message: String },

    /// Business-rule or authorization rejection by the backend
    #[error("{adapter} rejected the request: {message}")]
    Rejected { adapter: String, message: String },

    /// Response could not be parsed into an entity
    #[error("{adapter} returned a malformed response: {message}")]
    Malformed { adapter: String, message: String },
}

impl SourceError {
    pub fn unreachable(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Unreachable {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn rejected(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Rejected {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn malformed(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Malformed {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Whether the router may try the next adapter after this failure
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::Rejected { .. })
    }

    /// Name of the adapter that failed
    pub fn adapter(&self) -> &str {
        match self {
            SourceError::Unreachable { adapter, .. }
            | SourceError::Rejected { adapter, .. }
            | SourceError::Malformed { adapter, .. } => adapter,
        }
    }
}

/// Errors surfaced by the synchronization core
#[derive(Debug, Error)]
pub enum SyncError {
    /// A non-recoverable adapter failure (`Rejected`), propagated immediately
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Every adapter in the priority list failed with a recoverable error
    #[error("All sources failed after {attempts} attempt(s); last error: {last}")]
    AllSourcesFailed { attempts: usize, last: SourceError },

    /// An optimistic mutation was undone
    #[error("Mutation on {id} rolled back: {cause}")]
    Rollback { id: String, cause: Box<SyncError> },

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity or collection not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// The owning scope was torn down before the operation finished
    #[error("Scope closed: {0}")]
    ScopeClosed(String),

    /// Push channel capability failure (subscribe/unsubscribe)
    #[error("Push channel error: {0}")]
    Channel(String),

    /// msync-common error
    #[error("Common error: {0}")]
    Common(#[from] msync_common::Error),
}

impl SyncError {
    /// Whether this error should reach the UI
    ///
    /// `Unreachable`/`Malformed` are absorbed by the router unless every adapter
    /// failed; those never appear here on their own.
    pub fn is_user_visible(&self) -> bool {
        match self {
            SyncError::Source(e) => !e.is_recoverable(),
            SyncError::AllSourcesFailed { .. }
            | SyncError::Rollback { .. }
            | SyncError::InvalidInput(_)
            | SyncError::NotFound(_) => true,
            SyncError::ScopeClosed(_) | SyncError::Channel(_) | SyncError::Common(_) => false,
        }
    }

    /// The underlying failure of a rollback, or self
    pub fn root_cause(&self) -> &SyncError {
        match self {
            SyncError::Rollback { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Result type for core operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rejected_is_unrecoverable() {
        assert!(SourceError::unreachable("primary", "timeout").is_recoverable());
        assert!(SourceError::malformed("primary", "bad json").is_recoverable());
        assert!(!SourceError::rejected("primary", "forbidden").is_recoverable());
    }

    #[test]
    fn test_rollback_root_cause() {
        let err = SyncError::Rollback {
            id: "tmp-1".to_string(),
            cause: Box::new(SyncError::AllSourcesFailed {
                attempts: 2,
                last: SourceError::unreachable("legacy", "connection refused"),
            }),
        };
        assert!(matches!(err.root_cause(), SyncError::AllSourcesFailed { attempts: 2, .. }));
        assert!(err.is_user_visible());
    }

    #[test]
    fn test_display_names_adapter() {
        let err = SourceError::rejected("legacy", "Task title is required");
        assert_eq!(err.to_string(), "legacy rejected the request: Task title is required");
        assert_eq!(err.adapter(), "legacy");
    }
}
