//! # prenv-gitops
//!
//! GitOps-side collaborators: a [`ManifestRegistry`] that keeps one Flux
//! `HelmRelease` manifest per preview environment, and a
//! [`MountedSecretStore`] that reads the source-host token from a projected
//! secret volume.

pub mod manifest;
pub mod registry;
pub mod secrets;

pub use manifest::HelmRelease;
pub use registry::ManifestRegistry;
pub use secrets::MountedSecretStore;
