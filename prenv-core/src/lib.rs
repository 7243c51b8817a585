//! prenv core library — domain types, resource definitions, settings, status
//! persistence, errors.
//!
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`ConfigError`]
//! - [`resources`] — load / save / list declared resources
//! - [`settings`] — global `config.yaml`
//! - [`status_store`] — last-tick status per resource
//! - [`paths`] — `~/.prenv/` layout

pub mod error;
pub mod paths;
pub mod resources;
pub mod settings;
pub mod status_store;
pub mod types;

pub use error::ConfigError;
pub use settings::{LogFormat, Settings};
pub use types::{
    ChangeRequest, ChangeRequestId, ChangeRequestState, CommitSha, Condition, ConditionStatus,
    ConditionType, ControllerResource, ControllerSpec, ControllerStatus, ControllerStatusMessage,
    Credential, EnvCreationHelmRepo, EnvironmentHandle, EnvironmentRecord, GithubPrRepository,
    RawEnvironment, ReleaseValues, RepoRef, ResourceName, SecretRef, StatusOutcome,
};
