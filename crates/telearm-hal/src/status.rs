//! Status polling: the reply tokenizer and the background [`StatusMonitor`].
//!
//! The controller answers `GetStatusRobot` with a bracketed record such as
//! `[2007][1,1,0,0,0,0,0]`. Field 3 is the error flag. Replies arrive on the
//! same socket as every other controller message, so a read may hold zero,
//! one, or several NUL-separated messages; anything that does not contain a
//! well-formed `2007` record is dropped without a liveness update.

use std::sync::Arc;
use std::time::Duration;

use telearm_middleware::{PublishSink, Topic};
use telearm_types::{ArmError, Event, EventPayload, Liveness, RobotCommand, StatusSnapshot};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{CommandChannel, RECEIVE_BUFFER_BYTES, Received};
use crate::state::LinkState;

/// Record code of a `GetStatusRobot` reply.
pub const STATUS_RECORD_CODE: &str = "2007";

/// Index of the error flag within a status record.
pub const ERROR_FLAG_INDEX: usize = 3;

/// Default pause between two status polls.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);

const SOURCE: &str = "telearm-hal::status";

// ────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ────────────────────────────────────────────────────────────────────────────

/// Why a reply produced no status record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusParseError {
    #[error("no [2007] status record in reply")]
    MissingRecord,
    #[error("unterminated '[' group")]
    Unterminated,
    #[error("status record has {0} fields, expected at least 4")]
    TooFewFields(usize),
    #[error("error flag '{0}' is not an integer")]
    InvalidFlag(String),
}

impl From<StatusParseError> for ArmError {
    fn from(e: StatusParseError) -> Self {
        ArmError::ProtocolParse(e.to_string())
    }
}

/// A decoded `[2007][...]` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    fields: Vec<String>,
    error_flag: i64,
}

impl StatusRecord {
    fn from_body(body: &str) -> Result<Self, StatusParseError> {
        let fields: Vec<String> = body.split(',').map(|f| f.trim().to_string()).collect();
        let Some(flag) = fields.get(ERROR_FLAG_INDEX) else {
            return Err(StatusParseError::TooFewFields(fields.len()));
        };
        let error_flag = flag
            .parse::<i64>()
            .map_err(|_| StatusParseError::InvalidFlag(flag.clone()))?;
        Ok(Self { fields, error_flag })
    }

    /// `true` when the controller reports an error (flag == 1).
    pub fn error(&self) -> bool {
        self.error_flag == 1
    }

    pub fn liveness(&self) -> Liveness {
        if self.error() {
            Liveness::Error
        } else {
            Liveness::Connected
        }
    }

    pub fn activated(&self) -> Option<bool> {
        self.flag(0)
    }

    pub fn homed(&self) -> Option<bool> {
        self.flag(1)
    }

    fn flag(&self, index: usize) -> Option<bool> {
        self.fields
            .get(index)
            .and_then(|f| f.parse::<i64>().ok())
            .map(|v| v == 1)
    }
}

/// Iterator over the `[...]` groups of one message.
struct BracketGroups<'a> {
    rest: &'a str,
}

impl<'a> Iterator for BracketGroups<'a> {
    type Item = Result<&'a str, StatusParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let open = self.rest.find('[')?;
        let after = &self.rest[open + 1..];
        match after.find(']') {
            Some(close) => {
                self.rest = &after[close + 1..];
                Some(Ok(&after[..close]))
            }
            None => {
                self.rest = "";
                Some(Err(StatusParseError::Unterminated))
            }
        }
    }
}

/// Find and decode the first status record in `reply`.
///
/// Groups are read as `[code][body]` pairs within each NUL-separated
/// message. A malformed message does not hide a good record in a later one.
///
/// # Errors
///
/// Returns the last [`StatusParseError`] seen, or
/// [`StatusParseError::MissingRecord`] when no status record is present.
pub fn parse_status_reply(reply: &str) -> Result<StatusRecord, StatusParseError> {
    let mut last_error = StatusParseError::MissingRecord;
    for message in reply.split('\0') {
        let mut groups = BracketGroups { rest: message };
        loop {
            let code = match groups.next() {
                Some(Ok(code)) => code,
                Some(Err(e)) => {
                    last_error = e;
                    break;
                }
                None => break,
            };
            let body = match groups.next() {
                Some(Ok(body)) => body,
                Some(Err(e)) => {
                    last_error = e;
                    break;
                }
                None => break,
            };
            if code.trim() == STATUS_RECORD_CODE {
                match StatusRecord::from_body(body) {
                    Ok(record) => return Ok(record),
                    Err(e) => last_error = e,
                }
            }
        }
    }
    Err(last_error)
}

// ────────────────────────────────────────────────────────────────────────────
// Monitor
// ────────────────────────────────────────────────────────────────────────────

/// Background task polling the controller for liveness.
///
/// One monitor runs per successful connect. Each cycle it sends
/// `GetStatusRobot`, waits up to the channel's I/O timeout for a reply, and
/// publishes a [`StatusSnapshot`] on [`Topic::RobotStatus`] when the reply
/// holds a status record. Cycles are skipped while the link is not
/// `Connected`. An I/O error faults the link; the loop itself only ends on
/// [`stop`][Self::stop] or drop.
pub struct StatusMonitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StatusMonitor {
    /// Spawn the polling loop on the current Tokio runtime.
    pub fn spawn(
        channel: Arc<CommandChannel>,
        state: LinkState,
        sink: Arc<dyn PublishSink>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(channel, state, sink, interval, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "status monitor task ended abnormally");
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    channel: Arc<CommandChannel>,
    state: LinkState,
    sink: Arc<dyn PublishSink>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!(?interval, "status monitor started");
    let mut buf = vec![0u8; RECEIVE_BUFFER_BYTES];
    loop {
        if state.is_connected() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll_once(&channel, &state, sink.as_ref(), &mut buf) => {}
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("status monitor stopped");
}

/// One query/reply exchange. Returns the snapshot it published, if any.
async fn poll_once(
    channel: &CommandChannel,
    state: &LinkState,
    sink: &dyn PublishSink,
    buf: &mut [u8],
) -> Option<StatusSnapshot> {
    let query = RobotCommand::GetStatusRobot.to_string();
    if let Err(e) = channel.send_command(&query).await {
        if state.fault() {
            warn!(error = %e, "status query failed; link faulted");
        }
        return None;
    }

    let n = match channel.receive_raw(buf).await {
        Ok(Received::Data(n)) => n,
        Ok(Received::TimedOut) => {
            trace!("no status reply this cycle");
            return None;
        }
        Err(e) => {
            if state.fault() {
                warn!(error = %e, "status read failed; link faulted");
            }
            return None;
        }
    };

    let reply = String::from_utf8_lossy(&buf[..n]);
    let record = match parse_status_reply(&reply) {
        Ok(record) => record,
        Err(e) => {
            trace!(error = %e, "ignoring status reply");
            return None;
        }
    };

    debug!(
        error = record.error(),
        activated = ?record.activated(),
        homed = ?record.homed(),
        "status reply"
    );
    let snapshot = StatusSnapshot::now(record.liveness());
    let event = Event::new(SOURCE, EventPayload::RobotStatus(snapshot.clone()));
    if let Err(e) = sink.publish(Topic::RobotStatus, event) {
        debug!(error = %e, "status snapshot not published");
    }
    Some(snapshot)
}
