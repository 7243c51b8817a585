//! In-memory collaborators for driving ticks in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use prenv_core::{
    ChangeRequest, ControllerResource, ControllerSpec, ControllerStatus, Credential,
    EnvCreationHelmRepo, EnvironmentHandle, GithubPrRepository, RawEnvironment, ReleaseValues,
    RepoRef, ResourceName, SecretRef, StatusOutcome,
};
use prenv_reconcile::{
    ChangeRequestSource, Collaborators, CredentialError, CredentialStore, EnvironmentRegistry,
    HealthProbe, Reconciler, RegistryError, RemoteError, StatusReporter, StatusStore,
};

// ---------------------------------------------------------------------------
// Source of truth
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSource {
    open: Mutex<Vec<ChangeRequest>>,
    fail: AtomicBool,
}

impl FakeSource {
    pub fn set(&self, prs: &[(u64, &str)]) {
        *self.open.lock().unwrap() = prs
            .iter()
            .map(|(id, sha)| ChangeRequest::open(*id, *sha))
            .collect();
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ChangeRequestSource for FakeSource {
    fn list_open_change_requests(
        &self,
        repo: &RepoRef,
        _credential: &Credential,
    ) -> Result<Vec<ChangeRequest>, RemoteError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Http {
                url: format!("https://api.github.test/repos/{repo}/pulls"),
                status: 502,
                message: "bad gateway".into(),
            });
        }
        Ok(self.open.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Stored {
    revision: u64,
    values: Option<serde_json::Value>,
}

/// Stateful registry keyed by record name, with revision checks.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: Mutex<BTreeMap<String, Stored>>,
    fail_create_for: Mutex<BTreeSet<u64>>,
    fail_delete: AtomicBool,
    fail_list: AtomicBool,
    vanish_on_delete: AtomicBool,
    calls: Mutex<Vec<String>>,
}

pub const NAMESPACE: &str = "pr-helm-releases";

impl InMemoryRegistry {
    pub fn fail_create_for(&self, id: u64) {
        self.fail_create_for.lock().unwrap().insert(id);
    }

    pub fn clear_failures(&self) {
        self.fail_create_for.lock().unwrap().clear();
        self.fail_delete.store(false, Ordering::SeqCst);
        self.fail_list.store(false, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Deletes remove the record but answer NotFound, as if someone else got
    /// there first.
    pub fn vanish_on_delete(&self, vanish: bool) {
        self.vanish_on_delete.store(vanish, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Seed a record directly, bypassing create.
    pub fn insert_raw(&self, name: &str, values: Option<serde_json::Value>) {
        self.records
            .lock()
            .unwrap()
            .insert(name.to_string(), Stored { revision: 1, values });
    }

    pub fn insert(&self, id: u64, sha: &str) {
        self.insert_raw(
            &format!("relpr-{id}"),
            Some(json!({"prNumber": id, "prSHA": sha})),
        );
    }

    /// `id -> deployed sha` for every decodable record.
    pub fn deployed(&self) -> BTreeMap<u64, String> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter_map(|stored| stored.values.as_ref())
            .filter_map(|v| Some((v["prNumber"].as_u64()?, v["prSHA"].as_str()?.to_string())))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl EnvironmentRegistry for InMemoryRegistry {
    fn list_environments(
        &self,
        scope: &EnvCreationHelmRepo,
    ) -> Result<Vec<RawEnvironment>, RegistryError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("list unavailable".into()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|(name, stored)| RawEnvironment {
                handle: EnvironmentHandle {
                    namespace: scope.destination_namespace.clone(),
                    name: name.clone(),
                    revision: stored.revision,
                },
                values: stored.values.clone(),
            })
            .collect())
    }

    fn create_environment(
        &self,
        scope: &EnvCreationHelmRepo,
        values: &ReleaseValues,
    ) -> Result<EnvironmentHandle, RegistryError> {
        self.record(format!("create {} {}", values.pr_number, values.pr_sha));
        if self.fail_create_for.lock().unwrap().contains(&values.pr_number.0) {
            return Err(RegistryError::Backend("admission webhook denied".into()));
        }
        let name = format!("relpr-{}", values.pr_number);
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&name) {
            return Err(RegistryError::AlreadyExists { name });
        }
        records.insert(
            name.clone(),
            Stored {
                revision: 1,
                values: Some(serde_json::to_value(values).unwrap()),
            },
        );
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
        self.record(format!("update {} {}", values.pr_number, values.pr_sha));
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&handle.name)
            .ok_or_else(|| RegistryError::NotFound {
                handle: handle.clone(),
            })?;
        if stored.revision != handle.revision {
            return Err(RegistryError::Conflict {
                handle: handle.clone(),
                stored: stored.revision,
            });
        }
        stored.revision += 1;
        stored.values = Some(serde_json::to_value(values).unwrap());
        Ok(())
    }

    fn delete_environment(&self, handle: &EnvironmentHandle) -> Result<(), RegistryError> {
        self.record(format!("delete {}", handle.name));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend("finalizer stuck".into()));
        }
        match self.records.lock().unwrap().remove(&handle.name) {
            Some(_) if self.vanish_on_delete.load(Ordering::SeqCst) => {
                Err(RegistryError::NotFound {
                    handle: handle.clone(),
                })
            }
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound {
                handle: handle.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Probe, reporter, credentials, status
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProbe {
    healthy: AtomicBool,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl HealthProbe for FakeProbe {
    fn is_healthy(&self, url: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.healthy.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reported {
    pub sha: String,
    pub outcome: StatusOutcome,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<Reported>>,
    fail: AtomicBool,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<Reported> {
        self.reports.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Reported> {
        std::mem::take(&mut *self.reports.lock().unwrap())
    }

    pub fn outcomes_for(&self, sha: &str) -> Vec<StatusOutcome> {
        self.reports()
            .into_iter()
            .filter(|r| r.sha == sha)
            .map(|r| r.outcome)
            .collect()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl StatusReporter for RecordingReporter {
    fn report_status(
        &self,
        _repo: &RepoRef,
        _credential: &Credential,
        sha: &str,
        outcome: StatusOutcome,
        message: &str,
    ) -> Result<(), RemoteError> {
        self.reports.lock().unwrap().push(Reported {
            sha: sha.to_string(),
            outcome,
            message: message.to_string(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport {
                url: "https://api.github.test/statuses".into(),
                message: "connection reset".into(),
            });
        }
        Ok(())
    }
}

pub struct FakeCredentials {
    token: Mutex<Option<String>>,
    delay: Mutex<Duration>,
}

impl Default for FakeCredentials {
    fn default() -> Self {
        Self {
            token: Mutex::new(Some("ghp_test".into())),
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeCredentials {
    pub fn set(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    /// Make every lookup take `delay`, like a slow secrets backend.
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl CredentialStore for FakeCredentials {
    fn fetch(&self, secret: &SecretRef) -> Result<Credential, CredentialError> {
        std::thread::sleep(*self.delay.lock().unwrap());
        match self.token.lock().unwrap().as_deref() {
            Some(token) => Ok(Credential::new(token)),
            None => Err(CredentialError::NotFound {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
                key: secret.key.clone(),
            }),
        }
    }
}

#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<ResourceName, ControllerStatus>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStatusStore {
    pub fn get(&self, name: &str) -> Option<ControllerStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(&ResourceName::from(name))
            .cloned()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self, name: &ResourceName) -> Result<Option<ControllerStatus>, prenv_core::ConfigError> {
        Ok(self.statuses.lock().unwrap().get(name).cloned())
    }

    fn save(&self, name: &ResourceName, status: &ControllerStatus) -> Result<(), prenv_core::ConfigError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(prenv_core::ConfigError::Io {
                path: "status/shop.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .insert(name.clone(), status.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const RESOURCE: &str = "shop";

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub registry: Arc<InMemoryRegistry>,
    pub probe: Arc<FakeProbe>,
    pub reporter: Arc<RecordingReporter>,
    pub credentials: Arc<FakeCredentials>,
    pub status: Arc<MemoryStatusStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            source: Arc::default(),
            registry: Arc::default(),
            probe: Arc::default(),
            reporter: Arc::default(),
            credentials: Arc::default(),
            status: Arc::default(),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Collaborators {
            source: self.source.clone(),
            registry: self.registry.clone(),
            probe: self.probe.clone(),
            reporter: self.reporter.clone(),
            credentials: self.credentials.clone(),
            status_store: self.status.clone(),
        })
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.get(RESOURCE).unwrap_or_default()
    }
}

pub fn resource(template: Option<&str>, interval_secs: u64) -> ControllerResource {
    let now = Utc::now();
    ControllerResource {
        name: ResourceName::from(RESOURCE),
        spec: ControllerSpec {
            github_pr_repository: GithubPrRepository {
                user: "acme".into(),
                repo: "shop".into(),
                token_secret_ref: SecretRef {
                    name: "github".into(),
                    namespace: "default".into(),
                    key: "token".into(),
                },
            },
            env_creation_helm_repo: EnvCreationHelmRepo {
                flux_source_repo_name: "envs".into(),
                helm_chart_path: "charts/preview".into(),
                chart_version: "0.1.0".into(),
                destination_namespace: NAMESPACE.into(),
            },
            interval_secs,
            env_health_check_url_template: template.map(str::to_string),
        },
        created_at: now,
        updated_at: now,
    }
}
