//! Applying an action set against the registry and the status reporter.
//!
//! Create/update failures are per-item: they are surfaced as events and the
//! remaining actions still run. A delete failure stops execution and is
//! returned to the caller.

use serde::{Deserialize, Serialize};

use prenv_core::{
    ChangeRequest, ChangeRequestId, CommitSha, EnvironmentHandle, ReleaseValues, StatusOutcome,
};

use crate::collaborators::Collaborators;
use crate::diff::{Action, ActionKind};
use crate::error::{ReconcileError, RegistryError};
use crate::events::{EventReason, EventRecorder};
use crate::health_url;
use crate::tick::TickContext;

pub const MSG_CREATE_PENDING: &str = "Creation of ephemeral environment for PR in progress";
pub const MSG_CREATE_SUBMITTED: &str = "Ephemeral environment creation request submitted";
pub const MSG_UPDATE_PENDING: &str = "Update of ephemeral environment for PR in progress";
pub const MSG_UPDATE_SUBMITTED: &str = "Ephemeral environment update request submitted";
pub const MSG_READY: &str = "Successfully created ephemeral environment for PR";
pub const MSG_CLOSED: &str = "PR closed, deleting ephemeral environment";

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionResult {
    Applied,
    /// Create hit an existing record; treated as success.
    AlreadyExisted,
    Failed { message: String },
    Ready,
    NotReady,
    /// Nothing to do (ready check without a health template).
    Unchanged,
    /// Delete target was already gone.
    AlreadyGone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub id: ChangeRequestId,
    pub kind: ActionKind,
    #[serde(flatten)]
    pub result: ActionResult,
}

/// Run every action in order. Outcomes of the actions that ran are pushed onto
/// `outcomes` even when a delete aborts the rest.
pub fn execute(
    ctx: &TickContext,
    collaborators: &Collaborators,
    actions: &[Action],
    events: &mut EventRecorder,
    outcomes: &mut Vec<ActionOutcome>,
) -> Result<(), ReconcileError> {
    let mut executor = Executor {
        ctx,
        collaborators,
        events,
    };
    for action in actions {
        ctx.check_deadline()?;
        let result = match action {
            Action::Create { change_request } => executor.create(change_request),
            Action::Update {
                change_request,
                handle,
                ..
            } => executor.update(change_request, handle),
            Action::ReadyCheck { change_request } => executor.ready_check(change_request),
            Action::Delete {
                id,
                handle,
                deployed_sha,
            } => match executor.delete(*id, handle, deployed_sha) {
                Ok(result) => result,
                Err(err) => {
                    outcomes.push(ActionOutcome {
                        id: *id,
                        kind: ActionKind::Delete,
                        result: ActionResult::Failed {
                            message: err.to_string(),
                        },
                    });
                    return Err(err);
                }
            },
        };
        outcomes.push(ActionOutcome {
            id: action.id(),
            kind: action.kind(),
            result,
        });
    }
    Ok(())
}

struct Executor<'a> {
    ctx: &'a TickContext,
    collaborators: &'a Collaborators,
    events: &'a mut EventRecorder,
}

impl Executor<'_> {
    fn create(&mut self, cr: &ChangeRequest) -> ActionResult {
        let values = ReleaseValues::for_change_request(cr);
        let result = match self
            .collaborators
            .registry
            .create_environment(&self.ctx.scope, &values)
        {
            Ok(handle) => {
                self.events.normal(
                    EventReason::EnvironmentCreated,
                    format!("Created environment {handle} for PR {} at {}", cr.id, cr.head_sha),
                );
                ActionResult::Applied
            }
            Err(RegistryError::AlreadyExists { name }) => {
                tracing::debug!(
                    resource = %self.ctx.resource,
                    pr = %cr.id,
                    "environment {name} already exists; treating create as done"
                );
                ActionResult::AlreadyExisted
            }
            Err(err) => {
                self.events.warning(
                    EventReason::UnableToCreateEnvironment,
                    format!("Unable to create environment for PR {}: {err}", cr.id),
                );
                return ActionResult::Failed {
                    message: err.to_string(),
                };
            }
        };

        if self.ctx.health_url_template.is_some() {
            self.report(cr, StatusOutcome::Pending, MSG_CREATE_PENDING);
        } else {
            self.report(cr, StatusOutcome::Success, MSG_CREATE_SUBMITTED);
        }
        result
    }

    fn update(&mut self, cr: &ChangeRequest, handle: &EnvironmentHandle) -> ActionResult {
        let values = ReleaseValues::for_change_request(cr);
        if let Err(err) = self
            .collaborators
            .registry
            .update_environment(handle, &values)
        {
            self.events.warning(
                EventReason::UnableToUpdateEnvironment,
                format!("Unable to update environment {handle} for PR {}: {err}", cr.id),
            );
            return ActionResult::Failed {
                message: err.to_string(),
            };
        }

        self.events.normal(
            EventReason::EnvironmentUpdated,
            format!("Updated environment {handle} for PR {} to {}", cr.id, cr.head_sha),
        );
        if self.ctx.health_url_template.is_some() {
            self.report(cr, StatusOutcome::Pending, MSG_UPDATE_PENDING);
        } else {
            self.report(cr, StatusOutcome::Success, MSG_UPDATE_SUBMITTED);
        }
        ActionResult::Applied
    }

    fn ready_check(&mut self, cr: &ChangeRequest) -> ActionResult {
        let ctx = self.ctx;
        let Some(template) = ctx.health_url_template.as_deref() else {
            self.events.normal(
                EventReason::EnvironmentUpToDate,
                format!("Environment for PR {} is up to date at {}", cr.id, cr.head_sha),
            );
            return ActionResult::Unchanged;
        };

        let url = health_url::render(template, cr);
        if !self.collaborators.probe.is_healthy(&url) {
            tracing::debug!(
                resource = %ctx.resource,
                pr = %cr.id,
                url = %url,
                "environment not healthy yet"
            );
            return ActionResult::NotReady;
        }

        self.events.normal(
            EventReason::EnvReady,
            format!("Environment for PR {} is healthy at {url}", cr.id),
        );
        self.report(cr, StatusOutcome::Success, MSG_READY);
        ActionResult::Ready
    }

    fn delete(
        &mut self,
        id: ChangeRequestId,
        handle: &EnvironmentHandle,
        deployed_sha: &CommitSha,
    ) -> Result<ActionResult, ReconcileError> {
        // Best effort: the commit may be gone or the PR locked.
        if let Err(err) = self.collaborators.reporter.report_status(
            &self.ctx.repo,
            &self.ctx.credential,
            &deployed_sha.0,
            StatusOutcome::Closed,
            MSG_CLOSED,
        ) {
            self.events.warning(
                EventReason::StatusReportFailed,
                format!("Unable to post closed status for PR {id}: {err}"),
            );
        }

        match self.collaborators.registry.delete_environment(handle) {
            Ok(()) => {
                self.events.normal(
                    EventReason::DelReqSubmitted,
                    format!("Deletion of environment {handle} for PR {id} submitted"),
                );
                Ok(ActionResult::Applied)
            }
            Err(RegistryError::NotFound { .. }) => {
                tracing::debug!(resource = %self.ctx.resource, pr = %id, "environment already deleted");
                Ok(ActionResult::AlreadyGone)
            }
            Err(source) => {
                self.events.warning(
                    EventReason::DeleteFailed,
                    format!("Unable to delete environment {handle} for PR {id}: {source}"),
                );
                Err(ReconcileError::DeleteFailed { id, source })
            }
        }
    }

    fn report(&mut self, cr: &ChangeRequest, outcome: StatusOutcome, message: &str) {
        if let Err(err) = self.collaborators.reporter.report_status(
            &self.ctx.repo,
            &self.ctx.credential,
            &cr.head_sha.0,
            outcome,
            message,
        ) {
            self.events.warning(
                EventReason::StatusReportFailed,
                format!("Unable to post {outcome} status for PR {}: {err}", cr.id),
            );
        }
    }
}
