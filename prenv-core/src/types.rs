//! Domain types for prenv.
//!
//! All types are serializable/deserializable via serde so they can be stored
//! as YAML (resource definitions) or JSON (status files, socket payloads).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric identifier of a change request (pull request number).
///
/// Unique within a repository and never reused by the source host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChangeRequestId(pub u64);

impl fmt::Display for ChangeRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for ChangeRequestId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Opaque head-commit fingerprint (a git SHA in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitSha(pub String);

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitSha {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitSha {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a declared resource (one tracked repository).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(pub String);

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ResourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A bearer credential for the source host.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Source-of-truth snapshot
// ---------------------------------------------------------------------------

/// Lifecycle state of a change request on the source host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangeRequestState {
    #[default]
    Open,
    Closed,
}

/// One change request as seen during a single tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: ChangeRequestId,
    pub head_sha: CommitSha,
    #[serde(default)]
    pub state: ChangeRequestState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ChangeRequest {
    /// Convenience constructor for an open change request.
    pub fn open(id: impl Into<ChangeRequestId>, head_sha: impl Into<CommitSha>) -> Self {
        Self {
            id: id.into(),
            head_sha: head_sha.into(),
            state: ChangeRequestState::Open,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ChangeRequestState::Open
    }
}

// ---------------------------------------------------------------------------
// Environment registry
// ---------------------------------------------------------------------------

/// Opaque reference to a deployed environment record.
///
/// `revision` is the registry's optimistic-concurrency token: updates and
/// deletes are rejected if the stored record moved on since it was listed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    pub namespace: String,
    pub name: String,
    pub revision: u64,
}

impl fmt::Display for EnvironmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.revision)
    }
}

/// Parameters embedded in every environment record.
///
/// The wire names match the chart values the deployed charts expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseValues {
    #[serde(rename = "prNumber")]
    pub pr_number: ChangeRequestId,
    #[serde(rename = "prSHA")]
    pub pr_sha: CommitSha,
}

impl ReleaseValues {
    pub fn for_change_request(cr: &ChangeRequest) -> Self {
        Self {
            pr_number: cr.id,
            pr_sha: cr.head_sha.clone(),
        }
    }
}

/// A registry listing entry before its parameters are decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvironment {
    pub handle: EnvironmentHandle,
    /// Embedded parameter blob; `None` when the record carries no values.
    pub values: Option<serde_json::Value>,
}

/// A decoded environment record, keyed by its owning change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub change_request: ChangeRequestId,
    pub deployed_sha: CommitSha,
    pub handle: EnvironmentHandle,
}

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// Outcome posted against a commit on the source host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusOutcome {
    Pending,
    Success,
    Failure,
    Closed,
}

impl fmt::Display for StatusOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusOutcome::Pending => write!(f, "pending"),
            StatusOutcome::Success => write!(f, "success"),
            StatusOutcome::Failure => write!(f, "failure"),
            StatusOutcome::Closed => write!(f, "closed"),
        }
    }
}

/// Repository coordinates on the source host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Declared resource
// ---------------------------------------------------------------------------

/// Reference to a key inside a mounted secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

/// The repository whose pull requests drive environment creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubPrRepository {
    /// Owning user or organisation.
    pub user: String,
    pub repo: String,
    pub token_secret_ref: SecretRef,
}

impl GithubPrRepository {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef {
            owner: self.user.clone(),
            repo: self.repo.clone(),
        }
    }
}

/// Where and how environments are deployed. Doubles as the registry scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvCreationHelmRepo {
    /// Flux `GitRepository` source holding the chart.
    pub flux_source_repo_name: String,
    /// Chart folder inside the source repository.
    pub helm_chart_path: String,
    #[serde(default = "default_chart_version")]
    pub chart_version: String,
    #[serde(default = "default_destination_namespace")]
    pub destination_namespace: String,
}

/// Desired-state declaration for one tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub github_pr_repository: GithubPrRepository,
    pub env_creation_helm_repo: EnvCreationHelmRepo,
    /// Poll interval in seconds; floored at 60 when scheduling.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Health URL with `<<PR_NUMBER>>` / `<<PR_HEAD_SHA>>` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_health_check_url_template: Option<String>,
}

/// A named resource as stored in `resources/<name>.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerResource {
    pub name: ResourceName,
    pub spec: ControllerSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_chart_version() -> String {
    "0.1.0".to_string()
}

fn default_destination_namespace() -> String {
    "pr-helm-releases".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Persisted status
// ---------------------------------------------------------------------------

/// High-level outcome of the last tick, stored on the resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerStatusMessage {
    Starting,
    TokenLoadFailed,
    #[serde(rename = "PRFetchFailed")]
    PrFetchFailed,
    Ready,
    DeleteFailed,
}

impl ControllerStatusMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerStatusMessage::Starting => "Starting",
            ControllerStatusMessage::TokenLoadFailed => "TokenLoadFailed",
            ControllerStatusMessage::PrFetchFailed => "PRFetchFailed",
            ControllerStatusMessage::Ready => "Ready",
            ControllerStatusMessage::DeleteFailed => "DeleteFailed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ControllerStatusMessage::TokenLoadFailed
                | ControllerStatusMessage::PrFetchFailed
                | ControllerStatusMessage::DeleteFailed
        )
    }
}

impl fmt::Display for ControllerStatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of condition tracked on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    TokenLoaded,
    PullRequestsFetched,
    EnvironmentsConverged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One structured condition, Kubernetes-style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    /// Only moves when `status` flips.
    pub last_transition_time: DateTime<Utc>,
}

/// Last-tick status of a resource. Overwritten every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ControllerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ControllerStatusMessage>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub open_change_requests: usize,
    #[serde(default)]
    pub environments: usize,
}

impl ControllerStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Replace (or insert) a condition, keeping `last_transition_time` when the
    /// status did not change.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                condition_type,
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
