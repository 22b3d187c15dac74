//! Error types for the identity boundary, the remote store, and the stores.
//!
//! Provider and store messages are carried verbatim so they can be shown to
//! the user as-is.

use dojo_core::{TaskId, TaskStatus, ValidationError};
use thiserror::Error;

/// Failures raised by identity provider adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The provider answered and refused (bad credentials, duplicate user...).
    #[error("{message}")]
    Rejected { message: String },
    /// The provider could not be reached.
    #[error("identity provider unreachable: {message}")]
    Transport { message: String },
    /// The provider answered with something we could not read.
    #[error("unexpected identity provider response: {message}")]
    Malformed { message: String },
    /// An OAuth redirect came back without a usable session.
    #[error("sign-in callback rejected: {message}")]
    Callback { message: String },
}

impl AuthError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }
}

/// Failures raised by remote data store adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The store answered with an error (constraint, authorization...).
    #[error("{message}")]
    Rejected { message: String },
    #[error("remote store unreachable: {message}")]
    Transport { message: String },
    #[error("unexpected remote store response: {message}")]
    Malformed { message: String },
    #[error("{what} not found")]
    NotFound { what: String },
}

impl RemoteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// What a store operation reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Identity(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("kata {0} not found")]
    TaskNotFound(TaskId),
    #[error("kata {id} is {status} and cannot be started")]
    TaskNotActivatable { id: TaskId, status: TaskStatus },
}
