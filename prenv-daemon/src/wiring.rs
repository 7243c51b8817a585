//! Builds the production collaborator set from settings.

use std::path::Path;
use std::sync::Arc;

use prenv_core::Settings;
use prenv_github::{GithubClient, HttpHealthProbe};
use prenv_gitops::{ManifestRegistry, MountedSecretStore};
use prenv_reconcile::{Collaborators, FileStatusStore, Reconciler};

pub fn build_collaborators(home: &Path, settings: &Settings) -> Collaborators {
    let github = Arc::new(GithubClient::from_settings(settings));
    Collaborators {
        source: github.clone(),
        reporter: github,
        registry: Arc::new(ManifestRegistry::new(settings.manifests_root(home))),
        probe: Arc::new(HttpHealthProbe::new(settings.health_timeout())),
        credentials: Arc::new(MountedSecretStore::new(settings.secrets_root(home))),
        status_store: Arc::new(FileStatusStore::new(home)),
    }
}

/// A reconciler whose ticks fail once they run past `tick_deadline_secs`.
pub fn build_reconciler(home: &Path, settings: &Settings) -> Reconciler {
    Reconciler::new(build_collaborators(home, settings)).with_tick_deadline(settings.tick_deadline())
}
