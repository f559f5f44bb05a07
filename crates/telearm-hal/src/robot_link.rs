//! [`RobotLink`] – the connection to the robot controller as the operator
//! surface sees it.
//!
//! Composes a [`CommandChannel`], a [`StatusMonitor`] and the jog
//! [`RobotSettings`]. Every method is safe to call concurrently from any
//! number of request handlers.
//!
//! # Locking
//!
//! | Lock | Guards | Held across `.await` |
//! |---|---|---|
//! | lifecycle (async) | connect / disconnect, the monitor handle | yes |
//! | [`LinkState`] | `ConnectionState` | never |
//! | settings | `RobotSettings` | never |
//!
//! Commands never take the lifecycle lock, so a jog is not held up by a
//! settings read and a settings read is not held up by a connect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use telearm_middleware::PublishSink;
use telearm_types::{ArmError, ConnectionState, GripperAction, RobotCommand, RobotSettings, SettingsUpdate};
use tracing::{info, warn};

use crate::channel::{CommandChannel, DEFAULT_IO_TIMEOUT};
use crate::state::LinkState;
use crate::status::{DEFAULT_STATUS_INTERVAL, StatusMonitor};

/// Default controller address.
pub const DEFAULT_ROBOT_ADDRESS: &str = "192.168.0.100:10000";

/// Construction parameters for a [`RobotLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Controller `host:port`.
    pub address: String,
    /// Bound on every connect, read and write.
    pub io_timeout: Duration,
    /// Pause between status polls.
    pub status_interval: Duration,
    /// Initial jog settings.
    pub settings: RobotSettings,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ROBOT_ADDRESS.to_string(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            status_interval: DEFAULT_STATUS_INTERVAL,
            settings: RobotSettings::default(),
        }
    }
}

/// The single link to the robot controller.
pub struct RobotLink {
    channel: Arc<CommandChannel>,
    state: LinkState,
    settings: Mutex<RobotSettings>,
    lifecycle: tokio::sync::Mutex<Option<StatusMonitor>>,
    sink: Arc<dyn PublishSink>,
    status_interval: Duration,
}

impl RobotLink {
    /// Create a disconnected link. Status snapshots go to `sink`.
    pub fn new(config: LinkConfig, sink: Arc<dyn PublishSink>) -> Self {
        Self {
            channel: Arc::new(CommandChannel::new(config.address, config.io_timeout)),
            state: LinkState::default(),
            settings: Mutex::new(config.settings),
            lifecycle: tokio::sync::Mutex::new(None),
            sink,
            status_interval: config.status_interval,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// A copy of the current jog settings.
    pub fn settings(&self) -> RobotSettings {
        *self.settings.lock()
    }

    pub fn address(&self) -> &str {
        self.channel.address()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the link and initialise the robot.
    ///
    /// A no-op when already connected. Otherwise any previous (faulted)
    /// socket is torn down, a new one is opened, and `ActivateRobot`,
    /// `SetVelTimeout(<timeout>)`, `Home` are sent. The link becomes
    /// `Connected` and the status monitor starts only if every init command
    /// was written.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Connection`] if the socket cannot be opened or an
    /// init command fails. The link is left `Disconnected`.
    pub async fn connect(&self) -> Result<(), ArmError> {
        let mut monitor = self.lifecycle.lock().await;
        if self.state.is_connected() {
            return Ok(());
        }

        if let Some(previous) = monitor.take() {
            previous.stop().await;
        }
        self.channel.close().await;
        self.state.replace(ConnectionState::Disconnected);

        if let Err(e) = self.channel.connect().await {
            warn!(address = %self.address(), error = %e, "robot connection failed");
            return Err(e);
        }

        let velocity_timeout = self.settings().velocity_timeout;
        for command in [
            RobotCommand::ActivateRobot,
            RobotCommand::SetVelTimeout(velocity_timeout),
            RobotCommand::Home,
        ] {
            if let Err(e) = self.channel.send_command(&command.to_string()).await {
                self.channel.close().await;
                warn!(%command, error = %e, "robot init sequence failed");
                return Err(ArmError::Connection(format!(
                    "init command {command} failed: {e}"
                )));
            }
        }

        self.state.replace(ConnectionState::Connected);
        *monitor = Some(StatusMonitor::spawn(
            Arc::clone(&self.channel),
            self.state.clone(),
            Arc::clone(&self.sink),
            self.status_interval,
        ));
        info!(address = %self.address(), "robot connected");
        Ok(())
    }

    /// Stop the status monitor, close the socket and mark the link
    /// `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        let mut monitor = self.lifecycle.lock().await;
        if let Some(m) = monitor.take() {
            m.stop().await;
        }
        self.channel.close().await;
        if self.state.replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            info!(address = %self.address(), "robot disconnected");
        }
    }

    /// Synchronous best-effort teardown for paths that cannot await, such as
    /// a drop guard during unwinding.
    pub fn shutdown_now(&self) {
        if let Ok(mut monitor) = self.lifecycle.try_lock() {
            monitor.take();
        }
        self.channel.close_now();
        self.state.replace(ConnectionState::Disconnected);
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Send one raw command.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::NotConnected`] unless the link is `Connected`, and
    /// [`ArmError::Send`] if the write fails, in which case the link becomes
    /// `Faulted`.
    pub async fn send_raw(&self, command: &str) -> Result<(), ArmError> {
        if !self.state.is_connected() {
            return Err(ArmError::NotConnected);
        }
        match self.channel.send_command(command).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.state.fault() {
                    warn!(command, error = %e, "command failed; link faulted");
                }
                Err(e)
            }
        }
    }

    async fn send(&self, command: RobotCommand) -> Result<(), ArmError> {
        self.send_raw(&command.to_string()).await
    }

    /// Jog at `axis × jog_velocity` mm/s along each world axis.
    ///
    /// Inputs are nominally in `[-1, 1]` but are scaled, not clamped.
    pub async fn jog(&self, x: f64, y: f64, z: f64) -> Result<(), ArmError> {
        let v = self.settings().jog_velocity;
        self.send(RobotCommand::MoveLinVelWrf {
            vx: x * v,
            vy: y * v,
            vz: z * v,
        })
        .await
    }

    /// Zero-velocity jog.
    pub async fn stop(&self) -> Result<(), ArmError> {
        self.jog(0.0, 0.0, 0.0).await
    }

    /// Open or close the gripper. `action` must be `"open"` or `"close"`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidArgument`] for any other action, before
    /// anything is written to the socket.
    pub async fn gripper(&self, action: &str) -> Result<(), ArmError> {
        let action: GripperAction = action.parse()?;
        self.send(action.into()).await
    }

    /// Clear a controller fault: `ResetError`, then `ResumeMotion` only if the
    /// reset was sent.
    pub async fn reset_error(&self) -> Result<(), ArmError> {
        self.send(RobotCommand::ResetError).await?;
        self.send(RobotCommand::ResumeMotion).await?;
        info!("reset error and resumed motion");
        Ok(())
    }

    /// Apply a partial settings change.
    ///
    /// `jog_velocity` is local only and affects the next jog. A new
    /// `velocity_timeout` is pushed to the controller when connected;
    /// otherwise it is stored and sent by the next [`connect`][Self::connect].
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidArgument`] (nothing applied) when a value is
    /// not a positive number, or the push error if `SetVelTimeout` fails.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<(), ArmError> {
        update.validate()?;
        {
            let mut settings = self.settings.lock();
            if let Some(v) = update.jog_velocity {
                settings.jog_velocity = v;
            }
            if let Some(t) = update.velocity_timeout {
                settings.velocity_timeout = t;
            }
        }
        if let Some(t) = update.velocity_timeout
            && self.state.is_connected()
        {
            self.send(RobotCommand::SetVelTimeout(t)).await?;
        }
        Ok(())
    }
}

impl Drop for RobotLink {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
