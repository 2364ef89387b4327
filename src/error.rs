//! Error types for the DB Cluster Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// PD HTTP transport error
    #[error("PD request error: {0}")]
    Http(#[from] reqwest::Error),

    /// PD answered with a non-success status
    #[error("PD endpoint {url} returned status {status}")]
    PdStatus { url: String, status: u16 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded or parsed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Secret key not found
    #[error("Secret key '{key}' not found in secret '{secret}'")]
    SecretKeyNotFound { secret: String, key: String },

    /// Object not found in a store or lister
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// Optimistic concurrency conflict (stale resource version)
    #[error("Conflict updating {0}: the object has been modified")]
    Conflict(String),

    /// Conflicts persisted past the update retry budget
    #[error("Gave up updating {key} after {attempts} conflicting attempts")]
    UpdateExhausted { key: String, attempts: u32 },

    /// More than one registered kind matches an object's type
    #[error("Object of type {type_name} has ambiguous kind: {kinds}")]
    AmbiguousKind { type_name: String, kinds: String },

    /// No registered kind matches an object's type
    #[error("Unregistered kind: {0}")]
    UnregisteredKind(String),

    /// Owner reference that cannot be applied or parsed
    #[error("Invalid owner reference: {0}")]
    OwnerReference(String),

    /// Transient condition, the item should be queued again
    #[error("{0}")]
    Requeue(String),

    /// Benign condition, the item should be dropped
    #[error("{0}")]
    Ignore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the work-queue driver should do with an item whose reconciliation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected to resolve itself; requeue with rate-limited backoff
    Requeue,
    /// Not a failure; drop the item without retry
    Ignore,
    /// Real failure; log, count and retry with default backoff
    Fail,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a requeue error
    pub fn requeue(msg: impl Into<String>) -> Self {
        Error::Requeue(msg.into())
    }

    /// Create an ignore error
    pub fn ignore(msg: impl Into<String>) -> Self {
        Error::Ignore(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Classify the error for the work-queue driver
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::Requeue(_) => Disposition::Requeue,
            Error::Ignore(_) => Disposition::Ignore,
            _ => Disposition::Fail,
        }
    }

    /// Stale resource version on write
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}
