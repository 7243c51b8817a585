//! Narrow interfaces to the external systems a tick talks to.
//!
//! Every call is synchronous and must honour its own deadline; the engine
//! never retries inside a tick.

use std::path::PathBuf;
use std::sync::Arc;

use prenv_core::{
    status_store, ChangeRequest, ConfigError, ControllerStatus, Credential, EnvCreationHelmRepo,
    EnvironmentHandle, RawEnvironment, ReleaseValues, RepoRef, ResourceName, SecretRef,
    StatusOutcome,
};

use crate::error::{CredentialError, RegistryError, RemoteError};

/// Lists open change requests on the source host.
pub trait ChangeRequestSource: Send + Sync {
    fn list_open_change_requests(
        &self,
        repo: &RepoRef,
        credential: &Credential,
    ) -> Result<Vec<ChangeRequest>, RemoteError>;
}

/// The delivery system that owns environment records.
///
/// `scope` selects the namespace and the chart new records point at.
pub trait EnvironmentRegistry: Send + Sync {
    fn list_environments(
        &self,
        scope: &EnvCreationHelmRepo,
    ) -> Result<Vec<RawEnvironment>, RegistryError>;

    fn create_environment(
        &self,
        scope: &EnvCreationHelmRepo,
        values: &ReleaseValues,
    ) -> Result<EnvironmentHandle, RegistryError>;

    /// Mutate the record in place; rejected if `handle.revision` is stale.
    fn update_environment(
        &self,
        handle: &EnvironmentHandle,
        values: &ReleaseValues,
    ) -> Result<(), RegistryError>;

    fn delete_environment(&self, handle: &EnvironmentHandle) -> Result<(), RegistryError>;
}

/// Reachability check. Unreachable or non-2xx is simply `false`.
pub trait HealthProbe: Send + Sync {
    fn is_healthy(&self, url: &str) -> bool;
}

/// Posts commit statuses on the source host.
pub trait StatusReporter: Send + Sync {
    fn report_status(
        &self,
        repo: &RepoRef,
        credential: &Credential,
        sha: &str,
        outcome: StatusOutcome,
        message: &str,
    ) -> Result<(), RemoteError>;
}

/// Resolves a secret reference into a bearer credential.
pub trait CredentialStore: Send + Sync {
    fn fetch(&self, secret: &SecretRef) -> Result<Credential, CredentialError>;
}

/// Where last-tick status is persisted.
pub trait StatusStore: Send + Sync {
    fn load(&self, name: &ResourceName) -> Result<Option<ControllerStatus>, ConfigError>;
    fn save(&self, name: &ResourceName, status: &ControllerStatus) -> Result<(), ConfigError>;
}

/// [`StatusStore`] backed by `~/.prenv/status/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    home: PathBuf,
}

impl FileStatusStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl StatusStore for FileStatusStore {
    fn load(&self, name: &ResourceName) -> Result<Option<ControllerStatus>, ConfigError> {
        status_store::load_at(&self.home, name)
    }

    fn save(&self, name: &ResourceName, status: &ControllerStatus) -> Result<(), ConfigError> {
        status_store::save_at(&self.home, name, status)
    }
}

/// The full set of collaborators a [`crate::Reconciler`] drives.
///
/// Cheap to clone; nothing in here is mutated by a tick.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ChangeRequestSource>,
    pub registry: Arc<dyn EnvironmentRegistry>,
    pub probe: Arc<dyn HealthProbe>,
    pub reporter: Arc<dyn StatusReporter>,
    pub credentials: Arc<dyn CredentialStore>,
    pub status_store: Arc<dyn StatusStore>,
}
