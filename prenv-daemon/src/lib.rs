//! prenv daemon: one reconcile worker per declared resource, a watcher that
//! restarts workers when resource files change, and a Unix-socket control
//! surface (`status`, `reconcile`, `stop`).

mod error;
pub mod protocol;
mod runtime;
pub mod wiring;
pub mod worker;

pub use error::DaemonError;
pub use protocol::{
    request_reconcile, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
    DaemonStatus,
};
pub use runtime::{init_tracing, run, start_blocking};
pub use wiring::{build_collaborators, build_reconciler};
pub use worker::{run_tick, StatusBoard, TickSummary, WorkerStatus};
