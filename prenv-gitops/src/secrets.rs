//! Credentials read from a mounted-secret tree.
//!
//! A secret `{namespace, name, key}` resolves to the file
//! `<root>/<namespace>/<name>/<key>`, the layout Kubernetes uses when a secret
//! is projected into a volume.

use std::path::{Path, PathBuf};

use prenv_core::{Credential, SecretRef};
use prenv_reconcile::{CredentialError, CredentialStore};

#[derive(Debug, Clone)]
pub struct MountedSecretStore {
    root: PathBuf,
}

impl MountedSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn secret_path(&self, secret: &SecretRef) -> PathBuf {
        self.root
            .join(&secret.namespace)
            .join(&secret.name)
            .join(&secret.key)
    }
}

impl CredentialStore for MountedSecretStore {
    fn fetch(&self, secret: &SecretRef) -> Result<Credential, CredentialError> {
        let path = self.secret_path(secret);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound {
                    namespace: secret.namespace.clone(),
                    name: secret.name.clone(),
                    key: secret.key.clone(),
                })
            }
            Err(err) => return Err(CredentialError::Store(format!("{}: {err}", path.display()))),
        };

        let token = contents.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
                key: secret.key.clone(),
            });
        }
        Ok(Credential::new(token))
    }
}
