//! `~/.prenv/` layout.
//!
//! ```text
//! ~/.prenv/
//!   config.yaml                   global settings (optional)
//!   resources/<name>.yaml         declared resources (mode 0600)
//!   status/<name>.json            last-tick status
//!   run/daemon.sock               daemon socket
//!   manifests/<ns>/relpr-<n>.yaml default GitOps manifest root
//!   secrets/<ns>/<name>/<key>     default mounted-secret root
//! ```

use std::path::{Path, PathBuf};

use crate::types::ResourceName;

pub const SETTINGS_FILE: &str = "config.yaml";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn prenv_root(home: &Path) -> PathBuf {
    home.join(".prenv")
}

pub fn settings_path(home: &Path) -> PathBuf {
    prenv_root(home).join(SETTINGS_FILE)
}

pub fn resources_dir(home: &Path) -> PathBuf {
    prenv_root(home).join("resources")
}

pub fn resource_path(home: &Path, name: &ResourceName) -> PathBuf {
    resources_dir(home).join(format!("{}.yaml", name.0))
}

pub fn status_dir(home: &Path) -> PathBuf {
    prenv_root(home).join("status")
}

pub fn status_path(home: &Path, name: &ResourceName) -> PathBuf {
    status_dir(home).join(format!("{}.json", name.0))
}

pub fn run_dir(home: &Path) -> PathBuf {
    prenv_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn default_manifests_root(home: &Path) -> PathBuf {
    prenv_root(home).join("manifests")
}

pub fn default_secrets_root(home: &Path) -> PathBuf {
    prenv_root(home).join("secrets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_under_dot_prenv() {
        let home = Path::new("/home/dev");
        let name = ResourceName::from("shop");
        assert_eq!(
            resource_path(home, &name),
            PathBuf::from("/home/dev/.prenv/resources/shop.yaml")
        );
        assert_eq!(
            status_path(home, &name),
            PathBuf::from("/home/dev/.prenv/status/shop.json")
        );
        assert_eq!(
            socket_path(home),
            PathBuf::from("/home/dev/.prenv/run/daemon.sock")
        );
    }
}
