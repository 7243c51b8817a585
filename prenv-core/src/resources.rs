//! Declared resources, one YAML file per tracked repository.
//!
//! # Storage layout
//!
//! ```text
//! ~/.prenv/
//!   resources/
//!     <name>.yaml   (mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, ConfigError};
use crate::paths::{resource_path, resources_dir};
use crate::types::{ControllerResource, ControllerSpec, ResourceName};

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.prenv/resources/<name>.yaml`.
///
/// Returns `ConfigError::ResourceNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_resource_at(
    home: &Path,
    name: &ResourceName,
) -> Result<ControllerResource, ConfigError> {
    let path = resource_path(home, name);
    if !path.exists() {
        return Err(ConfigError::ResourceNotFound { path });
    }
    parse_resource_file(&path)
}

/// `load_resource_at` convenience wrapper.
pub fn load_resource(name: &ResourceName) -> Result<ControllerResource, ConfigError> {
    load_resource_at(&home()?, name)
}

/// Load every `*.yaml` under `resources/`, sorted by resource name.
///
/// A single malformed file fails the whole listing; callers that must keep
/// going use [`list_resources_lenient_at`].
pub fn list_resources_at(home: &Path) -> Result<Vec<ControllerResource>, ConfigError> {
    let mut resources = Vec::new();
    for path in resource_files(home)? {
        resources.push(parse_resource_file(&path)?);
    }
    resources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(resources)
}

/// `list_resources_at` convenience wrapper.
pub fn list_resources() -> Result<Vec<ControllerResource>, ConfigError> {
    list_resources_at(&home()?)
}

/// Like [`list_resources_at`] but returns per-file results so one broken
/// definition does not hide the others.
pub fn list_resources_lenient_at(
    home: &Path,
) -> Result<Vec<(PathBuf, Result<ControllerResource, ConfigError>)>, ConfigError> {
    Ok(resource_files(home)?
        .into_iter()
        .map(|path| {
            let parsed = parse_resource_file(&path);
            (path, parsed)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// 2. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a resource to `<home>/.prenv/resources/<name>.yaml`.
///
/// Write flow: validate → serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_resource_at(home: &Path, resource: &ControllerResource) -> Result<(), ConfigError> {
    validate(resource)?;
    let dir = resources_dir(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    let path = resource_path(home, &resource.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", resource.name.0));

    let yaml = serde_yaml::to_string(resource)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_resource_at` convenience wrapper.
pub fn save_resource(resource: &ControllerResource) -> Result<(), ConfigError> {
    save_resource_at(&home()?, resource)
}

// ---------------------------------------------------------------------------
// 3. Add / remove
// ---------------------------------------------------------------------------

/// Declare a new resource.
///
/// Idempotent: if the file already exists it is loaded and returned unchanged.
pub fn add_resource_at(
    home: &Path,
    name: ResourceName,
    spec: ControllerSpec,
) -> Result<ControllerResource, ConfigError> {
    if resource_path(home, &name).exists() {
        return load_resource_at(home, &name);
    }
    let now = Utc::now();
    let resource = ControllerResource {
        name,
        spec,
        created_at: now,
        updated_at: now,
    };
    save_resource_at(home, &resource)?;
    Ok(resource)
}

/// `add_resource_at` convenience wrapper.
pub fn add_resource(
    name: ResourceName,
    spec: ControllerSpec,
) -> Result<ControllerResource, ConfigError> {
    add_resource_at(&home()?, name, spec)
}

/// Remove a resource definition. Returns `false` if it did not exist.
pub fn remove_resource_at(home: &Path, name: &ResourceName) -> Result<bool, ConfigError> {
    let path = resource_path(home, name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

// ---------------------------------------------------------------------------
// 4. Validation
// ---------------------------------------------------------------------------

/// Reject resources that could never reconcile.
pub fn validate(resource: &ControllerResource) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidResource {
        name: resource.name.0.clone(),
        reason: reason.to_string(),
    };

    let name = &resource.name.0;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("name must be non-empty [A-Za-z0-9_-]"));
    }

    let repo = &resource.spec.github_pr_repository;
    if repo.user.trim().is_empty() || repo.repo.trim().is_empty() {
        return Err(invalid("github_pr_repository.user and .repo are required"));
    }
    let secret = &repo.token_secret_ref;
    if secret.name.is_empty() || secret.namespace.is_empty() || secret.key.is_empty() {
        return Err(invalid("token_secret_ref needs name, namespace and key"));
    }

    let helm = &resource.spec.env_creation_helm_repo;
    if helm.flux_source_repo_name.trim().is_empty() || helm.helm_chart_path.trim().is_empty() {
        return Err(invalid(
            "env_creation_helm_repo.flux_source_repo_name and .helm_chart_path are required",
        ));
    }
    if helm.destination_namespace.trim().is_empty() {
        return Err(invalid("env_creation_helm_repo.destination_namespace is empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn resource_files(home: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let dir = resources_dir(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("yaml"))
        .collect();
    files.sort();
    Ok(files)
}

fn parse_resource_file(path: &Path) -> Result<ControllerResource, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
