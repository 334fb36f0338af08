//! Error taxonomy
//!
//! Every failure the reconciliation core reports is one of the [`Error`]
//! variants below. Remote absence has its own variant so callers can decide
//! whether absence is the expected outcome (destroy checks, refresh) or a
//! failure (existence checks, update) by matching on it.

use crate::api::client::ClientError;
use std::fmt;
use thiserror::Error;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Remote operation an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Read => "reading",
            Self::Update => "updating",
            Self::Delete => "deleting",
            Self::Import => "importing",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assertion made by a verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyAction {
    CheckingExistence,
    CheckingDestroyed,
}

impl fmt::Display for VerifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckingExistence => f.write_str("checking existence of"),
            Self::CheckingDestroyed => f.write_str("checking destruction of"),
        }
    }
}

/// Why a verifier assertion failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The tracked instance carries no identifier
    NotSet,
    /// An expected resource is absent remotely
    NotFound,
    /// A resource expected to be gone still exists
    NotDestroyed,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSet => f.write_str("not set"),
            Self::NotFound => f.write_str("not found"),
            Self::NotDestroyed => f.write_str("not destroyed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input. Never reaches the network.
    #[error("invalid Audit Manager Assessment input: {0}")]
    Validation(String),

    /// The identified resource does not exist remotely.
    #[error("{operation} Audit Manager Assessment ({id}): not found")]
    NotFound { operation: Operation, id: String },

    /// Network, serialization, permission or any other remote failure.
    #[error("{operation} Audit Manager Assessment ({id}): {source}")]
    Transport {
        operation: Operation,
        id: String,
        #[source]
        source: ClientError,
    },

    /// A verifier assertion did not hold.
    #[error("{action} Audit Manager Assessment ({}): {reason}", .subjects.join(", "))]
    Verification {
        action: VerifyAction,
        subjects: Vec<String>,
        reason: VerifyFailure,
    },

    /// The call was cancelled or its deadline passed.
    #[error("{operation} Audit Manager Assessment ({id}): cancelled")]
    Cancelled { operation: Operation, id: String },
}

impl Error {
    /// Attribute a remote client failure to an operation and identifier
    pub fn from_client(operation: Operation, id: &str, error: ClientError) -> Self {
        match error {
            ClientError::NotFound => Self::NotFound {
                operation,
                id: id.to_string(),
            },
            source => Self::Transport {
                operation,
                id: id.to_string(),
                source,
            },
        }
    }

    pub fn verification(
        action: VerifyAction,
        subject: impl Into<String>,
        reason: VerifyFailure,
    ) -> Self {
        Self::Verification {
            action,
            subjects: vec![subject.into()],
            reason,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
