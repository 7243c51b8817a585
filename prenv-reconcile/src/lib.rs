//! # prenv-reconcile
//!
//! Converges open pull requests against deployed preview environments.
//!
//! [`diff::plan`] is the pure core: given the desired and observed keyed
//! collections it returns the ordered action set. [`Reconciler::tick`] wraps
//! it with the fetch, execute and persist steps and returns the next requeue
//! delay. External systems sit behind the traits in [`collaborators`].

pub mod collaborators;
pub mod decode;
pub mod diff;
pub mod error;
pub mod events;
pub mod execute;
pub mod health_url;
pub mod tick;

pub use collaborators::{
    ChangeRequestSource, Collaborators, CredentialStore, EnvironmentRegistry, FileStatusStore,
    HealthProbe, StatusReporter, StatusStore,
};
pub use diff::{plan, Action, ActionKind, Snapshot};
pub use error::{CredentialError, DecodeError, ReconcileError, RegistryError, RemoteError};
pub use events::{Event, EventKind, EventReason};
pub use execute::{ActionOutcome, ActionResult};
pub use tick::{requeue_after, Plan, Reconciler, TickContext, TickOutcome, TickReport, MIN_REQUEUE};
