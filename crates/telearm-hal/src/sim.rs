//! In-process simulation for CI/CD testing and bench runs without hardware.
//!
//! * [`SimController`] – a local TCP server that speaks the controller's
//!   NUL-terminated ASCII protocol, records every command, and answers
//!   `GetStatusRobot` with a status record.
//! * [`SimCamera`] – a [`CaptureDevice`] producing a synthetic RGB24 test
//!   pattern.
//!
//! # Example
//!
//! ```rust,no_run
//! use telearm_hal::sim::SimController;
//!
//! # async fn demo() -> Result<(), telearm_types::ArmError> {
//! let sim = SimController::start().await?;
//! println!("point the link at {}", sim.address());
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use telearm_types::ArmError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::camera::{CameraFrame, CaptureConfig, CaptureDevice, DeviceState};

// ────────────────────────────────────────────────────────────────────────────
// Simulated controller
// ────────────────────────────────────────────────────────────────────────────

/// How the simulated controller answers `GetStatusRobot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReplies {
    /// `[2007][1,1,0,<err>,0,0,0]`.
    Normal,
    /// Never replies; every status read times out.
    Silent,
    /// Replies with bytes that hold no status record.
    Garbage,
}

struct Shared {
    error: AtomicBool,
    replies: Mutex<StatusReplies>,
    log: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<String>,
    connections: AtomicUsize,
}

impl Shared {
    /// Apply `command` and return the reply, if any. The command is recorded
    /// only after its effect is visible.
    fn handle(&self, command: &str) -> Option<String> {
        let reply = match command {
            "ResetError" => {
                self.error.store(false, Ordering::SeqCst);
                None
            }
            "GetStatusRobot" => match *self.replies.lock() {
                StatusReplies::Normal => Some(format!(
                    "[2007][1,1,0,{},0,0,0]\0",
                    u8::from(self.error.load(Ordering::SeqCst))
                )),
                StatusReplies::Silent => None,
                StatusReplies::Garbage => Some("garbage\0".to_string()),
            },
            _ => None,
        };
        self.log.lock().push(command.to_string());
        let _ = self.tx.send(command.to_string());
        reply
    }
}

/// A simulated robot controller listening on a local TCP port.
///
/// Dropping the controller (or calling [`shutdown`][Self::shutdown]) stops
/// the listener and closes every open connection.
pub struct SimController {
    address: SocketAddr,
    shared: Arc<Shared>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    cancel: CancellationToken,
}

impl SimController {
    /// Start on an ephemeral loopback port.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Server`] if the listener cannot bind.
    pub async fn start() -> Result<Self, ArmError> {
        Self::bind("127.0.0.1:0").await
    }

    /// Start on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Server`] if the listener cannot bind.
    pub async fn bind(addr: &str) -> Result<Self, ArmError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArmError::Server(format!("sim controller bind error on {addr}: {e}")))?;
        let address = listener
            .local_addr()
            .map_err(|e| ArmError::Server(format!("sim controller address: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            error: AtomicBool::new(false),
            replies: Mutex::new(StatusReplies::Normal),
            log: Mutex::new(Vec::new()),
            tx,
            connections: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), cancel.clone()));
        debug!(%address, "sim controller listening");

        Ok(Self {
            address,
            shared,
            rx: tokio::sync::Mutex::new(rx),
            cancel,
        })
    }

    /// `host:port` to dial.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    /// Raise or clear the error flag reported in status records.
    pub fn set_error(&self, error: bool) {
        self.shared.error.store(error, Ordering::SeqCst);
    }

    pub fn is_error(&self) -> bool {
        self.shared.error.load(Ordering::SeqCst)
    }

    pub fn set_status_replies(&self, replies: StatusReplies) {
        *self.shared.replies.lock() = replies;
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }

    /// Wait up to `within` for the next command not yet taken by this call.
    pub async fn next_command(&self, within: Duration) -> Option<String> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(within, rx.recv()).await.ok().flatten()
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Stop listening and close every open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SimController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    shared.connections.fetch_add(1, Ordering::SeqCst);
                    debug!(%peer, "sim controller accepted connection");
                    tokio::spawn(serve(stream, Arc::clone(&shared), cancel.clone()));
                }
                Err(e) => warn!(error = %e, "sim controller accept error"),
            }
        }
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, cancel: CancellationToken) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(0, &mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buf.last() == Some(&0) {
            buf.pop();
        }
        let command = String::from_utf8_lossy(&buf).into_owned();
        if let Some(reply) = shared.handle(&command)
            && write_half.write_all(reply.as_bytes()).await.is_err()
        {
            break;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// Shared view of a [`SimCamera`]'s lifecycle, for tests and diagnostics.
#[derive(Clone, Debug)]
pub struct SimCameraProbe {
    state: Arc<Mutex<DeviceState>>,
    starts: Arc<AtomicUsize>,
}

impl SimCameraProbe {
    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    /// How many times the device has been started.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

/// A simulated camera producing a moving RGB24 gradient.
///
/// Optionally fails every Nth capture to exercise error handling.
pub struct SimCamera {
    id: String,
    config: CaptureConfig,
    probe: SimCameraProbe,
    captures: u64,
    fail_every: Option<u64>,
}

impl SimCamera {
    /// Create a new simulated camera with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: CaptureConfig::default(),
            probe: SimCameraProbe {
                state: Arc::new(Mutex::new(DeviceState::Uninitialized)),
                starts: Arc::new(AtomicUsize::new(0)),
            },
            captures: 0,
            fail_every: None,
        }
    }

    /// Make every `n`th capture fail. `0` disables failures.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn probe(&self) -> SimCameraProbe {
        self.probe.clone()
    }

    fn set_state(&self, state: DeviceState) {
        *self.probe.state.lock() = state;
    }

    fn render(&self) -> CameraFrame {
        let (w, h) = (self.config.width, self.config.height);
        let shift = (self.captures % 256) as u8;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            let g = (y * 255 / h.max(1)) as u8;
            for x in 0..w {
                let r = (x * 255 / w.max(1)) as u8;
                data.extend_from_slice(&[r.wrapping_add(shift), g, shift]);
            }
        }
        CameraFrame {
            width: w,
            height: h,
            data,
        }
    }
}

impl CaptureDevice for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<(), ArmError> {
        if self.state() == DeviceState::Running {
            return Err(ArmError::Capture {
                device: self.id.clone(),
                details: "cannot configure a running device".to_string(),
            });
        }
        if config.width == 0 || config.height == 0 {
            return Err(ArmError::Capture {
                device: self.id.clone(),
                details: format!("invalid geometry {}x{}", config.width, config.height),
            });
        }
        self.config = *config;
        self.set_state(DeviceState::Configured);
        Ok(())
    }

    fn start(&mut self) -> Result<(), ArmError> {
        match self.state() {
            DeviceState::Configured | DeviceState::Stopped => {
                self.set_state(DeviceState::Running);
                self.probe.starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            DeviceState::Running => Ok(()),
            DeviceState::Uninitialized => Err(ArmError::Capture {
                device: self.id.clone(),
                details: "start before configure".to_string(),
            }),
        }
    }

    fn capture(&mut self) -> Result<CameraFrame, ArmError> {
        if self.state() != DeviceState::Running {
            return Err(ArmError::Capture {
                device: self.id.clone(),
                details: "device is not running".to_string(),
            });
        }
        self.captures += 1;
        if let Some(n) = self.fail_every
            && self.captures % n == 0
        {
            return Err(ArmError::Capture {
                device: self.id.clone(),
                details: format!("simulated fault on capture {}", self.captures),
            });
        }
        Ok(self.render())
    }

    fn stop(&mut self) -> Result<(), ArmError> {
        if self.state() == DeviceState::Running {
            self.set_state(DeviceState::Stopped);
        }
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.probe.state()
    }
}
