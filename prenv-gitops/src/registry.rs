//! File-backed environment registry.
//!
//! Records live at `<root>/<namespace>/relpr-<n>.yaml` inside a GitOps
//! checkout that Flux watches. The revision used for optimistic concurrency is
//! stored in the `prenv.dev/revision` annotation and bumped on every update.

use std::path::{Path, PathBuf};

use prenv_core::{EnvCreationHelmRepo, EnvironmentHandle, RawEnvironment, ReleaseValues};
use prenv_reconcile::{EnvironmentRegistry, RegistryError};

use crate::manifest::{release_name, HelmRelease};

#[derive(Debug, Clone)]
pub struct ManifestRegistry {
    root: PathBuf,
}

impl ManifestRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{name}.yaml"))
    }

    fn read(&self, path: &Path) -> Result<HelmRelease, RegistryError> {
        let contents = std::fs::read_to_string(path).map_err(|e| backend(path, e))?;
        serde_yaml::from_str(&contents).map_err(|e| backend(path, e))
    }

    fn write(&self, path: &Path, release: &HelmRelease) -> Result<(), RegistryError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| backend(dir, e))?;
        }
        let yaml = serde_yaml::to_string(release).map_err(|e| backend(path, e))?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|e| backend(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| backend(path, e))?;
        Ok(())
    }

    /// Load the stored record behind `handle`, checking its revision.
    fn load_current(&self, handle: &EnvironmentHandle) -> Result<(PathBuf, HelmRelease), RegistryError> {
        let path = self.manifest_path(&handle.namespace, &handle.name);
        if !path.exists() {
            return Err(RegistryError::NotFound {
                handle: handle.clone(),
            });
        }
        let release = self.read(&path)?;
        let stored = release.revision();
        if stored != handle.revision {
            return Err(RegistryError::Conflict {
                handle: handle.clone(),
                stored,
            });
        }
        Ok((path, release))
    }
}

fn backend(path: &Path, err: impl std::fmt::Display) -> RegistryError {
    RegistryError::Backend(format!("{}: {err}", path.display()))
}

impl EnvironmentRegistry for ManifestRegistry {
    fn list_environments(
        &self,
        scope: &EnvCreationHelmRepo,
    ) -> Result<Vec<RawEnvironment>, RegistryError> {
        let dir = self.root.join(&scope.destination_namespace);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(backend(&dir, err)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| backend(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let release = match self.read(&path) {
                Ok(release) => release,
                Err(err) => {
                    tracing::warn!("skipping unreadable manifest: {err}");
                    continue;
                }
            };
            if !release.is_managed() {
                continue;
            }
            // The handle names the file, not `metadata`, so update and delete
            // always reach the record that was listed.
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name != release.metadata.name {
                tracing::warn!(
                    path = %path.display(),
                    metadata_name = %release.metadata.name,
                    "manifest file name differs from metadata.name"
                );
            }
            out.push(RawEnvironment {
                handle: EnvironmentHandle {
                    namespace: scope.destination_namespace.clone(),
                    name: name.to_string(),
                    revision: release.revision(),
                },
                values: release.spec.values,
            });
        }
        Ok(out)
    }

    fn create_environment(
        &self,
        scope: &EnvCreationHelmRepo,
        values: &ReleaseValues,
    ) -> Result<EnvironmentHandle, RegistryError> {
        let name = release_name(values);
        let path = self.manifest_path(&scope.destination_namespace, &name);
        if path.exists() {
            return Err(RegistryError::AlreadyExists { name });
        }
        let release = HelmRelease::render(scope, values, 1);
        self.write(&path, &release)?;
        tracing::debug!(path = %path.display(), "wrote manifest");
        Ok(EnvironmentHandle {
            namespace: scope.destination_namespace.clone(),
            name,
            revision: 1,
        })
    }

    fn update_environment(
        &self,
        handle: &EnvironmentHandle,
        values: &ReleaseValues,
    ) -> Result<(), RegistryError> {
        let (path, mut release) = self.load_current(handle)?;
        release.set_values(values, handle.revision + 1);
        self.write(&path, &release)
    }

    fn delete_environment(&self, handle: &EnvironmentHandle) -> Result<(), RegistryError> {
        let (path, _) = self.load_current(handle)?;
        std::fs::remove_file(&path).map_err(|e| backend(&path, e))
    }
}
