//! One reconciliation tick for one resource.
//!
//! A tick loads the last status, resolves the credential, lists open change
//! requests and environment records, diffs them, executes the actions and
//! persists the new status. It always yields a requeue delay, including when
//! it fails; failures are retried by the next periodic tick, never in-tick.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use prenv_core::{
    ChangeRequest, ConditionStatus, ConditionType, ControllerResource, ControllerStatus,
    ControllerStatusMessage, Credential, EnvCreationHelmRepo, RepoRef, ResourceName,
};

use crate::collaborators::Collaborators;
use crate::decode::decode_all;
use crate::diff::{Action, Snapshot};
use crate::error::{CredentialError, ReconcileError};
use crate::events::{Event, EventReason, EventRecorder};
use crate::execute::{execute, ActionOutcome, ActionResult};

/// Lower bound on the delay between two ticks of the same resource.
pub const MIN_REQUEUE: Duration = Duration::from_secs(60);

/// Delay before the next tick: the configured interval, floored at
/// [`MIN_REQUEUE`].
pub fn requeue_after(interval_secs: u64) -> Duration {
    Duration::from_secs(interval_secs).max(MIN_REQUEUE)
}

/// Wall-clock budget for a tick, checked between external calls.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn check(&self) -> Result<(), ReconcileError> {
        if Instant::now() >= self.at {
            return Err(ReconcileError::DeadlineExceeded(self.budget));
        }
        Ok(())
    }
}

/// Everything a tick needs, resolved once at the start and never mutated.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub resource: ResourceName,
    pub repo: RepoRef,
    pub credential: Credential,
    pub scope: EnvCreationHelmRepo,
    pub health_url_template: Option<String>,
    pub interval_secs: u64,
    pub deadline: Option<Deadline>,
}

impl TickContext {
    pub fn new(resource: &ControllerResource, credential: Credential) -> Self {
        let spec = &resource.spec;
        Self {
            resource: resource.name.clone(),
            repo: spec.github_pr_repository.repo_ref(),
            credential,
            scope: spec.env_creation_helm_repo.clone(),
            health_url_template: spec
                .env_health_check_url_template
                .clone()
                .filter(|t| !t.trim().is_empty()),
            interval_secs: spec.interval_secs,
            deadline: None,
        }
    }

    pub fn check_deadline(&self) -> Result<(), ReconcileError> {
        match &self.deadline {
            Some(deadline) => deadline.check(),
            None => Ok(()),
        }
    }
}

/// Summary of a completed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub resource: ResourceName,
    pub open_change_requests: usize,
    pub environments: usize,
    pub actions: Vec<ActionOutcome>,
}

impl TickReport {
    pub fn failed_actions(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.result, ActionResult::Failed { .. }))
            .count()
    }
}

/// The result of one tick plus the delay before the next one.
#[derive(Debug)]
pub struct TickOutcome {
    pub requeue_after: Duration,
    pub events: Vec<Event>,
    pub result: Result<TickReport, ReconcileError>,
}

/// Read-only preview of what a tick would do.
#[derive(Debug, Clone)]
pub struct Plan {
    pub snapshot: Snapshot,
    pub actions: Vec<Action>,
    pub events: Vec<Event>,
}

/// Drives ticks against a fixed set of collaborators.
#[derive(Clone)]
pub struct Reconciler {
    collaborators: Collaborators,
    tick_deadline: Option<Duration>,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            tick_deadline: None,
        }
    }

    /// Fail ticks that run past `deadline`.
    pub fn with_tick_deadline(mut self, deadline: Duration) -> Self {
        self.tick_deadline = Some(deadline);
        self
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Run one full tick for `resource`.
    pub fn tick(&self, resource: &ControllerResource) -> TickOutcome {
        let requeue = requeue_after(resource.spec.interval_secs);
        let mut events = EventRecorder::new(resource.name.clone());
        let started = Instant::now();
        let deadline = self.tick_deadline.map(Deadline::starting_now);

        let result = self.run(resource, deadline, &mut events);

        match &result {
            Ok(report) => tracing::info!(
                resource = %resource.name,
                open = report.open_change_requests,
                environments = report.environments,
                actions = report.actions.len(),
                failed = report.failed_actions(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tick complete"
            ),
            Err(err) => tracing::warn!(
                resource = %resource.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tick failed: {err}"
            ),
        }

        TickOutcome {
            requeue_after: requeue,
            events: events.into_events(),
            result,
        }
    }

    /// Compute the action set without executing it or touching status.
    pub fn plan(&self, resource: &ControllerResource) -> Result<Plan, ReconcileError> {
        let mut events = EventRecorder::new(resource.name.clone());
        let deadline = self.tick_deadline.map(Deadline::starting_now);
        let credential = self.fetch_credential(resource)?;
        let ctx = self.context(resource, credential, deadline);
        ctx.check_deadline()?;
        let change_requests = self.list_change_requests(&ctx)?;
        let snapshot = self.observe(&ctx, change_requests, &mut events);
        let actions = snapshot.plan();
        Ok(Plan {
            snapshot,
            actions,
            events: events.into_events(),
        })
    }

    fn run(
        &self,
        resource: &ControllerResource,
        deadline: Option<Deadline>,
        events: &mut EventRecorder,
    ) -> Result<TickReport, ReconcileError> {
        let store = &self.collaborators.status_store;
        let mut status = match store.load(&resource.name) {
            Ok(status) => status.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(resource = %resource.name, "ignoring unreadable status: {err}");
                ControllerStatus::default()
            }
        };
        if status.message.is_none() {
            status.message = Some(ControllerStatusMessage::Starting);
            if let Err(err) = store.save(&resource.name, &status) {
                tracing::warn!(resource = %resource.name, "failed to persist starting status: {err}");
            }
        }

        let credential = match self.fetch_credential(resource) {
            Ok(credential) => credential,
            Err(err) => {
                events.warning(EventReason::TokenLoadFailed, err.to_string());
                status.set_condition(
                    ConditionType::TokenLoaded,
                    ConditionStatus::False,
                    EventReason::TokenLoadFailed.as_str(),
                    err.to_string(),
                    Utc::now(),
                );
                return self.fail(resource, status, ControllerStatusMessage::TokenLoadFailed, err);
            }
        };
        status.set_condition(
            ConditionType::TokenLoaded,
            ConditionStatus::True,
            "TokenLoaded",
            "credential resolved",
            Utc::now(),
        );

        let ctx = self.context(resource, credential, deadline);
        if let Err(err) = ctx.check_deadline() {
            let message = status.message.unwrap_or(ControllerStatusMessage::Starting);
            return self.fail(resource, status, message, err);
        }

        let change_requests = match self.list_change_requests(&ctx) {
            Ok(change_requests) => change_requests,
            Err(err) => {
                events.warning(EventReason::PrFetchFailed, err.to_string());
                status.set_condition(
                    ConditionType::PullRequestsFetched,
                    ConditionStatus::False,
                    EventReason::PrFetchFailed.as_str(),
                    err.to_string(),
                    Utc::now(),
                );
                return self.fail(resource, status, ControllerStatusMessage::PrFetchFailed, err);
            }
        };
        status.set_condition(
            ConditionType::PullRequestsFetched,
            ConditionStatus::True,
            "PullRequestsFetched",
            format!("{} pull requests listed", change_requests.len()),
            Utc::now(),
        );
        status.message = Some(ControllerStatusMessage::Ready);

        let snapshot = self.observe(&ctx, change_requests, events);
        if snapshot.desired.is_empty() {
            events.normal(
                EventReason::NoActivePrs,
                format!("No open pull requests in {}", ctx.repo),
            );
        }

        let actions = snapshot.plan();
        let mut outcomes = Vec::with_capacity(actions.len());
        let executed = execute(&ctx, &self.collaborators, &actions, events, &mut outcomes);

        status.open_change_requests = snapshot.desired.len();
        status.environments = snapshot.observed.len();
        status.last_tick_at = Some(Utc::now());

        if let Err(err) = executed {
            status.set_condition(
                ConditionType::EnvironmentsConverged,
                ConditionStatus::False,
                "TickAborted",
                err.to_string(),
                Utc::now(),
            );
            let message = match &err {
                ReconcileError::DeleteFailed { .. } => ControllerStatusMessage::DeleteFailed,
                _ => ControllerStatusMessage::Ready,
            };
            return self.fail(resource, status, message, err);
        }

        let pending = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.result,
                    ActionResult::Failed { .. } | ActionResult::NotReady
                )
            })
            .count();
        if pending == 0 {
            status.set_condition(
                ConditionType::EnvironmentsConverged,
                ConditionStatus::True,
                "Converged",
                format!("{} environments match open pull requests", snapshot.desired.len()),
                Utc::now(),
            );
        } else {
            status.set_condition(
                ConditionType::EnvironmentsConverged,
                ConditionStatus::False,
                "Progressing",
                format!("{pending} of {} actions not yet settled", outcomes.len()),
                Utc::now(),
            );
        }
        store.save(&resource.name, &status)?;

        Ok(TickReport {
            resource: resource.name.clone(),
            open_change_requests: snapshot.desired.len(),
            environments: snapshot.observed.len(),
            actions: outcomes,
        })
    }

    fn context(
        &self,
        resource: &ControllerResource,
        credential: Credential,
        deadline: Option<Deadline>,
    ) -> TickContext {
        let mut ctx = TickContext::new(resource, credential);
        ctx.deadline = deadline;
        ctx
    }

    fn fetch_credential(&self, resource: &ControllerResource) -> Result<Credential, ReconcileError> {
        let secret = &resource.spec.github_pr_repository.token_secret_ref;
        let credential = self.collaborators.credentials.fetch(secret)?;
        if credential.is_empty() {
            return Err(CredentialError::Empty {
                namespace: secret.namespace.clone(),
                name: secret.name.clone(),
                key: secret.key.clone(),
            }
            .into());
        }
        Ok(credential)
    }

    fn list_change_requests(&self, ctx: &TickContext) -> Result<Vec<ChangeRequest>, ReconcileError> {
        self.collaborators
            .source
            .list_open_change_requests(&ctx.repo, &ctx.credential)
            .map_err(ReconcileError::SourceFetch)
    }

    fn observe(
        &self,
        ctx: &TickContext,
        change_requests: Vec<ChangeRequest>,
        events: &mut EventRecorder,
    ) -> Snapshot {
        let raw = match self.collaborators.registry.list_environments(&ctx.scope) {
            Ok(raw) => raw,
            Err(err) => {
                events.warning(
                    EventReason::RegistryListFailed,
                    format!("Unable to list environments in {}: {err}", ctx.scope.destination_namespace),
                );
                Vec::new()
            }
        };

        let (records, failures) = decode_all(&raw);
        for failure in failures {
            events.warning(EventReason::DecodeFailed, failure.to_string());
        }

        let (snapshot, warnings) = Snapshot::build(change_requests, records);
        for warning in warnings {
            tracing::warn!(resource = %ctx.resource, "{warning}");
        }
        snapshot
    }

    fn fail(
        &self,
        resource: &ControllerResource,
        mut status: ControllerStatus,
        message: ControllerStatusMessage,
        err: ReconcileError,
    ) -> Result<TickReport, ReconcileError> {
        status.message = Some(message);
        status.last_tick_at = Some(Utc::now());
        if let Err(save_err) = self.collaborators.status_store.save(&resource.name, &status) {
            tracing::warn!(resource = %resource.name, "failed to persist status: {save_err}");
        }
        Err(err)
    }
}
