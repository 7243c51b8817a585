//! Newline-delimited JSON over the daemon's Unix socket.
//!
//! One request per line, one reply per line. Requests are tagged by `cmd`,
//! replies by `reply`:
//!
//! ```text
//! {"cmd":"reconcile","resource":"shop"}
//! {"reply":"reconciled","summaries":[...]}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use prenv_core::paths::socket_path;

use crate::error::{io_err, DaemonError};
use crate::worker::{StatusBoard, TickSummary};

/// How long `status` waits for a daemon that is still binding its socket.
pub const STATUS_CONNECT_PATIENCE: Duration = Duration::from_secs(1);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    /// Tick now; every resource when `resource` is absent.
    Reconcile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
    },
    Stop,
}

/// Runtime view of a running daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at_unix: u64,
    pub socket: PathBuf,
    /// Worker state keyed by resource name.
    pub resources: StatusBoard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum DaemonResponse {
    Status(DaemonStatus),
    Reconciled { summaries: Vec<TickSummary> },
    Stopping,
    Error { message: String },
}

impl DaemonResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    fn into_protocol_error(self) -> DaemonError {
        match self {
            Self::Error { message } => DaemonError::Protocol(message),
            other => DaemonError::Protocol(format!("unexpected daemon reply: {other:?}")),
        }
    }
}

/// Connect to the daemon socket, retrying for up to `patience` while nobody
/// is listening yet.
fn connect(socket: &Path, patience: Duration) -> Result<UnixStream, DaemonError> {
    let give_up_at = Instant::now() + patience;
    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => return Ok(stream),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                ) =>
            {
                if Instant::now() >= give_up_at {
                    return Err(DaemonError::DaemonNotRunning {
                        socket: socket.to_path_buf(),
                    });
                }
                sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(err) => return Err(io_err(socket, err)),
        }
    }
}

/// Send one request and read one reply.
pub fn send_request(
    home: &Path,
    request: &DaemonRequest,
    patience: Duration,
) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket, patience)?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    stream.write_all(&line).map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before replying".to_string(),
        ));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

pub fn request_status(home: &Path) -> Result<DaemonStatus, DaemonError> {
    match send_request(home, &DaemonRequest::Status, STATUS_CONNECT_PATIENCE)? {
        DaemonResponse::Status(status) => Ok(status),
        other => Err(other.into_protocol_error()),
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    match send_request(home, &DaemonRequest::Stop, Duration::ZERO)? {
        DaemonResponse::Stopping => Ok(()),
        other => Err(other.into_protocol_error()),
    }
}

/// Ask the daemon to tick one resource (or all of them) now and wait for the
/// results.
pub fn request_reconcile(
    home: &Path,
    resource: Option<String>,
) -> Result<Vec<TickSummary>, DaemonError> {
    match send_request(home, &DaemonRequest::Reconcile { resource }, Duration::ZERO)? {
        DaemonResponse::Reconciled { summaries } => Ok(summaries),
        other => Err(other.into_protocol_error()),
    }
}
