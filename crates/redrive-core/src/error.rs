//! Error types for provisioning, lookup, and dispatch.

use std::fmt;

use crate::broker::BrokerError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of broker resource a lookup was looking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Queue,
    Topic,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Queue => write!(f, "queue"),
            ResourceKind::Topic => write!(f, "topic"),
        }
    }
}

/// Errors surfaced to callers of the provisioner, resolver, and dispatcher.
///
/// Consumer handler failures are not represented here; they are reported as
/// [`ConsumerEvent`](crate::ConsumerEvent)s and left to the broker's redrive policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required input was missing or malformed. Never retried.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The resolver found no queue or topic with the given name.
    #[error("{kind} `{name}` was not found")]
    NotFound { kind: ResourceKind, name: String },

    /// A broker call failed while creating or binding a resource.
    #[error("failed to {operation} `{resource}`")]
    Provisioning {
        operation: &'static str,
        resource: String,
        #[source]
        source: BrokerError,
    },

    /// A broker call failed while sending a message.
    #[error("failed to send message to `{queue_url}`")]
    Send {
        queue_url: String,
        #[source]
        source: BrokerError,
    },

    /// A broker call failed while resolving a name.
    #[error("failed to {operation} `{resource}`")]
    Lookup {
        operation: &'static str,
        resource: String,
        #[source]
        source: BrokerError,
    },

    /// A required setting was missing at startup.
    #[error("missing configuration: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true for errors caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true when a queue or topic could not be resolved.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
