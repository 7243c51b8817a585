//! Operator-facing events raised during a tick.
//!
//! Every event is logged through `tracing` as it is recorded and also kept on
//! the [`crate::TickReport`] so callers (CLI, daemon socket) can show them.

use std::fmt;

use serde::{Deserialize, Serialize};

use prenv_core::ResourceName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    TokenLoadFailed,
    #[serde(rename = "PRFetchFailed")]
    PrFetchFailed,
    #[serde(rename = "NoActivePRs")]
    NoActivePrs,
    RegistryListFailed,
    DecodeFailed,
    EnvironmentCreated,
    UnableToCreateEnvironment,
    EnvironmentUpdated,
    UnableToUpdateEnvironment,
    EnvironmentUpToDate,
    EnvReady,
    DelReqSubmitted,
    DeleteFailed,
    StatusReportFailed,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::TokenLoadFailed => "TokenLoadFailed",
            EventReason::PrFetchFailed => "PRFetchFailed",
            EventReason::NoActivePrs => "NoActivePRs",
            EventReason::RegistryListFailed => "RegistryListFailed",
            EventReason::DecodeFailed => "DecodeFailed",
            EventReason::EnvironmentCreated => "EnvironmentCreated",
            EventReason::UnableToCreateEnvironment => "UnableToCreateEnvironment",
            EventReason::EnvironmentUpdated => "EnvironmentUpdated",
            EventReason::UnableToUpdateEnvironment => "UnableToUpdateEnvironment",
            EventReason::EnvironmentUpToDate => "EnvironmentUpToDate",
            EventReason::EnvReady => "EnvReady",
            EventReason::DelReqSubmitted => "DelReqSubmitted",
            EventReason::DeleteFailed => "DeleteFailed",
            EventReason::StatusReportFailed => "StatusReportFailed",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub reason: EventReason,
    pub message: String,
}

/// Collects events for one resource's tick.
#[derive(Debug)]
pub struct EventRecorder {
    resource: ResourceName,
    events: Vec<Event>,
}

impl EventRecorder {
    pub fn new(resource: ResourceName) -> Self {
        Self {
            resource,
            events: Vec::new(),
        }
    }

    pub fn normal(&mut self, reason: EventReason, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(resource = %self.resource, reason = %reason, "{message}");
        self.events.push(Event {
            kind: EventKind::Normal,
            reason,
            message,
        });
    }

    pub fn warning(&mut self, reason: EventReason, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(resource = %self.resource, reason = %reason, "{message}");
        self.events.push(Event {
            kind: EventKind::Warning,
            reason,
            message,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order_with_kinds() {
        let mut recorder = EventRecorder::new(ResourceName::from("shop"));
        recorder.normal(EventReason::EnvironmentCreated, "PR 1");
        recorder.warning(EventReason::DecodeFailed, "relpr-2");
        let events = recorder.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Normal);
        assert_eq!(events[1].reason, EventReason::DecodeFailed);
    }

    #[test]
    fn reasons_use_operator_strings() {
        assert_eq!(EventReason::NoActivePrs.to_string(), "NoActivePRs");
        assert_eq!(
            serde_json::to_string(&EventReason::PrFetchFailed).expect("json"),
            "\"PRFetchFailed\""
        );
    }
}
