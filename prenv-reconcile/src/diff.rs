//! Desired-vs-observed diff.
//!
//! [`plan`] is a pure function of its two keyed inputs. Ordering:
//!
//! 1. one pass over `desired` in ascending id order, emitting `Create`,
//!    `Update` or `ReadyCheck` per id;
//! 2. one pass over `observed \ desired` in ascending id order, emitting
//!    `Delete`.
//!
//! Every id yields exactly one action.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use prenv_core::{ChangeRequest, ChangeRequestId, CommitSha, EnvironmentHandle, EnvironmentRecord};

pub type Desired = BTreeMap<ChangeRequestId, ChangeRequest>;
pub type Observed = BTreeMap<ChangeRequestId, EnvironmentRecord>;

/// Both sides of the diff, rebuilt from scratch every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub desired: Desired,
    pub observed: Observed,
}

/// Input anomalies tolerated while building a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotWarning {
    /// The source listed the same id twice; the first entry wins.
    DuplicateChangeRequest { id: ChangeRequestId },
    /// Two records decode to the same id; the lowest-named record wins and
    /// the other is left untouched.
    DuplicateEnvironment {
        id: ChangeRequestId,
        ignored: EnvironmentHandle,
    },
}

impl fmt::Display for SnapshotWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotWarning::DuplicateChangeRequest { id } => {
                write!(f, "PR {id} listed more than once")
            }
            SnapshotWarning::DuplicateEnvironment { id, ignored } => {
                write!(f, "PR {id} has more than one environment; ignoring {ignored}")
            }
        }
    }
}

impl Snapshot {
    /// Key both collections by change-request id.
    ///
    /// Closed change requests are never desired.
    pub fn build(
        change_requests: Vec<ChangeRequest>,
        mut records: Vec<EnvironmentRecord>,
    ) -> (Self, Vec<SnapshotWarning>) {
        let mut warnings = Vec::new();

        let mut desired = Desired::new();
        for cr in change_requests.into_iter().filter(ChangeRequest::is_open) {
            if desired.contains_key(&cr.id) {
                warnings.push(SnapshotWarning::DuplicateChangeRequest { id: cr.id });
                continue;
            }
            desired.insert(cr.id, cr);
        }

        records.sort_by(|a, b| a.handle.name.cmp(&b.handle.name));
        let mut observed = Observed::new();
        for record in records {
            if observed.contains_key(&record.change_request) {
                warnings.push(SnapshotWarning::DuplicateEnvironment {
                    id: record.change_request,
                    ignored: record.handle,
                });
                continue;
            }
            observed.insert(record.change_request, record);
        }

        (Self { desired, observed }, warnings)
    }

    pub fn plan(&self) -> Vec<Action> {
        plan(&self.desired, &self.observed)
    }
}

/// One side-effecting intent. Nothing is executed by the diff itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create {
        change_request: ChangeRequest,
    },
    Update {
        change_request: ChangeRequest,
        handle: EnvironmentHandle,
        deployed_sha: CommitSha,
    },
    /// Fingerprints match; candidate for health-gated success reporting.
    ReadyCheck {
        change_request: ChangeRequest,
    },
    Delete {
        id: ChangeRequestId,
        handle: EnvironmentHandle,
        deployed_sha: CommitSha,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Update,
    ReadyCheck,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::ReadyCheck => write!(f, "ready-check"),
            ActionKind::Delete => write!(f, "delete"),
        }
    }
}

impl Action {
    pub fn id(&self) -> ChangeRequestId {
        match self {
            Action::Create { change_request }
            | Action::Update { change_request, .. }
            | Action::ReadyCheck { change_request } => change_request.id,
            Action::Delete { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create { .. } => ActionKind::Create,
            Action::Update { .. } => ActionKind::Update,
            Action::ReadyCheck { .. } => ActionKind::ReadyCheck,
            Action::Delete { .. } => ActionKind::Delete,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { change_request } => {
                write!(f, "create  PR {} @ {}", change_request.id, change_request.head_sha)
            }
            Action::Update {
                change_request,
                deployed_sha,
                ..
            } => write!(
                f,
                "update  PR {} {} -> {}",
                change_request.id, deployed_sha, change_request.head_sha
            ),
            Action::ReadyCheck { change_request } => write!(
                f,
                "check   PR {} @ {}",
                change_request.id, change_request.head_sha
            ),
            Action::Delete {
                id, deployed_sha, ..
            } => write!(f, "delete  PR {id} (was {deployed_sha})"),
        }
    }
}

/// Compute the ordered action set for one tick.
pub fn plan(desired: &Desired, observed: &Observed) -> Vec<Action> {
    let mut actions = Vec::with_capacity(desired.len() + observed.len());

    for (id, cr) in desired {
        let action = match observed.get(id) {
            None => Action::Create {
                change_request: cr.clone(),
            },
            Some(record) if record.deployed_sha != cr.head_sha => Action::Update {
                change_request: cr.clone(),
                handle: record.handle.clone(),
                deployed_sha: record.deployed_sha.clone(),
            },
            Some(_) => Action::ReadyCheck {
                change_request: cr.clone(),
            },
        };
        actions.push(action);
    }

    for (id, record) in observed {
        if desired.contains_key(id) {
            continue;
        }
        actions.push(Action::Delete {
            id: *id,
            handle: record.handle.clone(),
            deployed_sha: record.deployed_sha.clone(),
        });
    }

    actions
}

/// Per-kind totals, mostly for logs and plan output.
pub fn count_by_kind(actions: &[Action]) -> BTreeMap<ActionKind, usize> {
    let mut counts = BTreeMap::new();
    for action in actions {
        *counts.entry(action.kind()).or_insert(0) += 1;
    }
    counts
}
