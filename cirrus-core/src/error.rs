//! Error - Failure taxonomy shared by every lifecycle operation

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::translate::TranslationError;

/// Kind of remote call an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    CreateOrUpdate,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => write!(f, "read"),
            OperationKind::CreateOrUpdate => write!(f, "create/update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Errors surfaced by the lifecycle core
///
/// Nothing here is retried inside the core. A missing object on Read is not an
/// error: it is reported as [`crate::lifecycle::ReadOutcome::Gone`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// The identifier string does not match the expected schema
    #[error("malformed identifier {input:?}: {reason}")]
    MalformedIdentifier { input: String, reason: String },

    /// Create found an object that is not tracked yet
    #[error(
        "a resource with the ID {id:?} already exists - to be managed it needs to be imported into the state ({resource_type})"
    )]
    AlreadyExists { resource_type: String, id: String },

    /// The long-running operation finished in a failed state
    #[error("{operation} of {id} failed with code {code:?}: {message}")]
    RemoteFailed {
        id: String,
        operation: OperationKind,
        code: String,
        message: String,
    },

    /// The local deadline passed before the operation reached a terminal state
    #[error(
        "timed out after {after:?} waiting for {operation} of {id}; the remote operation may still be running"
    )]
    Timeout {
        id: String,
        operation: OperationKind,
        after: Duration,
    },

    /// A single field could not be translated
    #[error("translating field {0}")]
    FieldTranslation(#[from] TranslationError),

    /// An object that must exist for the call was not found
    #[error("{id} was not found")]
    NotFound { id: String },

    /// The desired change touches attributes that cannot be updated in place
    #[error("{id}: changing {} requires replacing the resource", fields.join(", "))]
    RequiresReplacement { id: String, fields: Vec<String> },

    /// The desired document failed schema validation
    #[error("invalid configuration for {resource_type}: {}", errors.join("; "))]
    InvalidConfiguration {
        resource_type: String,
        errors: Vec<String>,
    },

    /// The mutation succeeded but reading the result back failed
    #[error("{id} was written, but reading it back failed: {source}")]
    ReadAfterWrite {
        id: String,
        #[source]
        source: Box<CoreError>,
    },

    /// The management client gave up on a request
    #[error("request failed{}: {message}", status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    /// No lifecycle is registered under the name
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    /// The remote payload could not be decoded into the model
    #[error("decoding {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CoreError {
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// Re-label an error raised against a target object with the identifier
    /// of the resource that caused the call.
    ///
    /// Association resources address their parent remotely, but callers only
    /// know the composite identifier.
    pub fn for_resource(self, resource_id: &str) -> Self {
        match self {
            Self::RemoteFailed {
                operation,
                code,
                message,
                ..
            } => Self::RemoteFailed {
                id: resource_id.to_string(),
                operation,
                code,
                message,
            },
            Self::Timeout {
                operation, after, ..
            } => Self::Timeout {
                id: resource_id.to_string(),
                operation,
                after,
            },
            other => other,
        }
    }

    /// Whether the remote outcome of the call is unknown and must be
    /// resolved by a later Read
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ReadAfterWrite { .. })
    }

    /// The identifier carried by errors that leave a remote object behind
    pub fn persisted_id(&self) -> Option<&str> {
        match self {
            Self::Timeout {
                id,
                operation: OperationKind::CreateOrUpdate,
                ..
            }
            | Self::ReadAfterWrite { id, .. } => Some(id),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
