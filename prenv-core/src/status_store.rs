//! Status store — last-tick status per resource.
//!
//! Persists a [`ControllerStatus`] JSON document at
//! `<home>/.prenv/status/<resource>.json`. Each save replaces the previous
//! document; nothing is appended. Writes use `.tmp` + rename.

use std::path::{Path, PathBuf};

use crate::error::{io_err, ConfigError};
use crate::paths::status_path;
use crate::types::{ControllerStatus, ResourceName};

/// Path to the status JSON for a resource, rooted at `home`.
pub fn store_path_at(home: &Path, name: &ResourceName) -> PathBuf {
    status_path(home, name)
}

/// Load the status for `name`. Returns `None` if never reconciled.
pub fn load_at(home: &Path, name: &ResourceName) -> Result<Option<ControllerStatus>, ConfigError> {
    let path = store_path_at(home, name);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path,
            message: e.to_string(),
        })
}

/// Save the status for `name` atomically.
pub fn save_at(
    home: &Path,
    name: &ResourceName,
    status: &ControllerStatus,
) -> Result<(), ConfigError> {
    let path = store_path_at(home, name);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid status store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(status)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Drop the status file, e.g. after the resource is removed.
pub fn remove_at(home: &Path, name: &ResourceName) -> Result<(), ConfigError> {
    let path = store_path_at(home, name);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&path, err)),
    }
}
