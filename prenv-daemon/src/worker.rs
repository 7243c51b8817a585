//! One tick loop per declared resource.
//!
//! Ticks of the same resource never overlap: the loop awaits each tick before
//! scheduling the next, and a tick that blows its deadline is still awaited
//! before the loop moves on. Different resources run on independent tasks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use prenv_core::{ControllerResource, ResourceName};
use prenv_reconcile::{
    requeue_after, ActionOutcome, Event, ReconcileError, Reconciler, TickOutcome,
};

/// Serializable result of one tick, as shown by `status` and `reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub resource: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub requeue_after_secs: u64,
    pub open_change_requests: usize,
    pub environments: usize,
    #[serde(default)]
    pub actions: Vec<ActionOutcome>,
    #[serde(default)]
    pub events: Vec<Event>,
    pub duration_ms: u64,
    pub finished_at_unix: u64,
}

impl TickSummary {
    pub fn from_outcome(resource: &ResourceName, outcome: TickOutcome, elapsed: Duration) -> Self {
        let mut summary = Self::empty(resource, outcome.requeue_after, elapsed);
        summary.events = outcome.events;
        match outcome.result {
            Ok(report) => {
                summary.ok = true;
                summary.open_change_requests = report.open_change_requests;
                summary.environments = report.environments;
                summary.actions = report.actions;
            }
            Err(err) => summary.error = Some(err.to_string()),
        }
        summary
    }

    fn failed(resource: &ResourceName, requeue: Duration, error: String, elapsed: Duration) -> Self {
        let mut summary = Self::empty(resource, requeue, elapsed);
        summary.error = Some(error);
        summary
    }

    fn empty(resource: &ResourceName, requeue: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.0.clone(),
            ok: false,
            error: None,
            requeue_after_secs: requeue.as_secs(),
            open_change_requests: 0,
            environments: 0,
            actions: Vec::new(),
            events: Vec::new(),
            duration_ms: elapsed.as_millis() as u64,
            finished_at_unix: unix_seconds_now(),
        }
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }
}

/// What the socket `status` command reports per resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub ticks: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<TickSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_tick_at_unix: Option<u64>,
}

pub type StatusBoard = BTreeMap<String, WorkerStatus>;

pub(crate) struct TriggerJob {
    pub(crate) respond_to: oneshot::Sender<TickSummary>,
}

pub(crate) struct WorkerHandle {
    pub(crate) trigger_tx: mpsc::Sender<TriggerJob>,
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop the loop, waiting for an in-flight tick to finish.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.join.await;
    }
}

pub(crate) fn spawn_worker(
    resource: ControllerResource,
    reconciler: Reconciler,
    deadline: Duration,
    board: Arc<RwLock<StatusBoard>>,
    shutdown_rx: broadcast::Receiver<()>,
) -> WorkerHandle {
    let (trigger_tx, trigger_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel();
    let join = tokio::spawn(worker_loop(
        resource,
        reconciler,
        deadline,
        board,
        trigger_rx,
        stop_rx,
        shutdown_rx,
    ));
    WorkerHandle {
        trigger_tx,
        stop_tx,
        join,
    }
}

async fn worker_loop(
    resource: ControllerResource,
    reconciler: Reconciler,
    deadline: Duration,
    board: Arc<RwLock<StatusBoard>>,
    mut trigger_rx: mpsc::Receiver<TriggerJob>,
    mut stop_rx: oneshot::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let name = resource.name.clone();
    tracing::info!(resource = %name, interval_secs = resource.spec.interval_secs, "worker started");
    let mut waiting: Vec<oneshot::Sender<TickSummary>> = Vec::new();

    loop {
        let summary = run_tick(reconciler.clone(), resource.clone(), deadline).await;
        let requeue = summary.requeue_after();
        {
            let mut board = board.write().await;
            let entry = board.entry(name.0.clone()).or_default();
            entry.ticks += 1;
            entry.next_tick_at_unix = Some(unix_seconds_now() + requeue.as_secs());
            entry.last = Some(summary.clone());
        }
        for respond_to in waiting.drain(..) {
            let _ = respond_to.send(summary.clone());
        }

        tokio::select! {
            _ = &mut stop_rx => break,
            _ = shutdown_rx.recv() => break,
            job = trigger_rx.recv() => match job {
                Some(job) => waiting.push(job.respond_to),
                None => break,
            },
            _ = tokio::time::sleep(requeue) => {}
        }
    }

    tracing::info!(resource = %name, "worker stopped");
}

/// Run one tick on the blocking pool, bounded by `deadline`.
pub async fn run_tick(
    reconciler: Reconciler,
    resource: ControllerResource,
    deadline: Duration,
) -> TickSummary {
    let started = std::time::Instant::now();
    let name = resource.name.clone();
    let requeue = requeue_after(resource.spec.interval_secs);

    let mut handle = tokio::task::spawn_blocking(move || reconciler.tick(&resource));
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(outcome)) => TickSummary::from_outcome(&name, outcome, started.elapsed()),
        Ok(Err(err)) => TickSummary::failed(
            &name,
            requeue,
            format!("tick task failed: {err}"),
            started.elapsed(),
        ),
        Err(_) => {
            tracing::warn!(resource = %name, ?deadline, "tick past deadline, waiting for it to unwind");
            let _ = handle.await;
            TickSummary::failed(
                &name,
                requeue,
                ReconcileError::DeadlineExceeded(deadline).to_string(),
                started.elapsed(),
            )
        }
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tempfile::TempDir;

    use prenv_core::{
        ChangeRequest, ControllerSpec, Credential, EnvCreationHelmRepo, GithubPrRepository,
        RepoRef, SecretRef,
    };
    use prenv_github::{GithubClient, HttpHealthProbe};
    use prenv_gitops::{ManifestRegistry, MountedSecretStore};
    use prenv_reconcile::{ChangeRequestSource, Collaborators, FileStatusStore, RemoteError};

    use super::*;

    struct SlowSource(Duration);

    impl ChangeRequestSource for SlowSource {
        fn list_open_change_requests(
            &self,
            _repo: &RepoRef,
            _credential: &Credential,
        ) -> Result<Vec<ChangeRequest>, RemoteError> {
            std::thread::sleep(self.0);
            Ok(vec![ChangeRequest::open(1, "a")])
        }
    }

    fn resource() -> ControllerResource {
        ControllerResource {
            name: ResourceName::from("shop"),
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
                    destination_namespace: "pr-helm-releases".into(),
                },
                interval_secs: 15,
                env_health_check_url_template: None,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reconciler(home: &TempDir, source: Arc<dyn ChangeRequestSource>) -> Reconciler {
        let github = Arc::new(GithubClient::new(
            "http://127.0.0.1:1",
            "ctx",
            Duration::from_millis(200),
        ));
        Reconciler::new(Collaborators {
            source,
            reporter: github,
            registry: Arc::new(ManifestRegistry::new(home.path().join("manifests"))),
            probe: Arc::new(HttpHealthProbe::new(Duration::from_millis(200))),
            credentials: Arc::new(MountedSecretStore::new(home.path().join("secrets"))),
            status_store: Arc::new(FileStatusStore::new(home.path())),
        })
    }

    fn write_token(home: &TempDir) {
        let dir = home.path().join("secrets/default/github");
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("token"), "ghp_test").expect("token");
    }

    #[tokio::test]
    async fn failed_tick_summary_carries_error_and_floored_requeue() {
        let home = TempDir::new().expect("home");
        let reconciler = reconciler(&home, Arc::new(SlowSource(Duration::ZERO)));

        let summary = run_tick(reconciler, resource(), Duration::from_secs(5)).await;
        assert!(!summary.ok);
        assert!(
            summary.error.as_deref().unwrap_or_default().contains("credential"),
            "{summary:?}"
        );
        assert_eq!(summary.requeue_after_secs, 60);
        assert_eq!(summary.resource, "shop");
    }

    #[tokio::test]
    async fn successful_tick_writes_manifest() {
        let home = TempDir::new().expect("home");
        write_token(&home);
        let reconciler = reconciler(&home, Arc::new(SlowSource(Duration::ZERO)));

        let summary = run_tick(reconciler, resource(), Duration::from_secs(5)).await;
        assert!(summary.ok, "{summary:?}");
        assert_eq!(summary.open_change_requests, 1);
        assert_eq!(summary.actions.len(), 1);
        assert!(home
            .path()
            .join("manifests/pr-helm-releases/relpr-1.yaml")
            .exists());
    }

    #[tokio::test]
    async fn slow_tick_is_reported_as_deadline_exceeded() {
        let home = TempDir::new().expect("home");
        write_token(&home);
        let reconciler = reconciler(&home, Arc::new(SlowSource(Duration::from_millis(300))));

        let summary = run_tick(reconciler, resource(), Duration::from_millis(50)).await;
        assert!(!summary.ok);
        assert!(
            summary.error.as_deref().unwrap_or_default().contains("deadline"),
            "{summary:?}"
        );
    }
}
