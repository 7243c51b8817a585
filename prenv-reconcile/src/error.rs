//! Error types for prenv-reconcile and its collaborator interfaces.

use thiserror::Error;

use prenv_core::{ChangeRequestId, ConfigError, EnvironmentHandle};

/// Failures reported by an environment registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Create found a record with the same name already present.
    #[error("environment {name} already exists")]
    AlreadyExists { name: String },

    /// Update/delete target is gone.
    #[error("environment {handle} not found")]
    NotFound { handle: EnvironmentHandle },

    /// The stored record moved on since it was listed.
    #[error("environment {handle} changed concurrently (stored revision {stored})")]
    Conflict {
        handle: EnvironmentHandle,
        stored: u64,
    },

    /// Anything else the backend reports.
    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Failures talking to the source host (listing or status posting).
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        url: String,
        status: u16,
        message: String,
    },

    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Failures resolving the source-host credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret {namespace}/{name} has no key '{key}'")]
    NotFound {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("secret {namespace}/{name} key '{key}' is empty")]
    Empty {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("secret store error: {0}")]
    Store(String),
}

/// An environment record whose embedded parameters could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("environment {handle} has no values")]
    MissingValues { handle: EnvironmentHandle },

    #[error("environment {handle} values are malformed: {message}")]
    Malformed {
        handle: EnvironmentHandle,
        message: String,
    },

    #[error("environment {handle} has an empty commit fingerprint")]
    EmptyFingerprint { handle: EnvironmentHandle },
}

/// Fatal-to-tick failures.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),

    #[error("failed to list open pull requests: {0}")]
    SourceFetch(#[source] RemoteError),

    #[error("failed to delete environment for PR {id}: {source}")]
    DeleteFailed {
        id: ChangeRequestId,
        #[source]
        source: RegistryError,
    },

    #[error("tick exceeded its {0:?} deadline")]
    DeadlineExceeded(std::time::Duration),

    #[error("status store error: {0}")]
    StatusStore(#[from] ConfigError),
}
