use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of the link to the robot controller.
///
/// `Disconnected → Connected` on a successful connect + init sequence,
/// `Connected → Faulted` on any I/O error, and back to `Disconnected` only on
/// an explicit disconnect. There is no automatic reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Faulted,
}

/// Whether the controller currently reports an operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Connected,
    Error,
}

/// One liveness observation produced by the status monitor.
///
/// Snapshots are replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "status")]
    pub liveness: Liveness,
    pub observed_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn now(liveness: Liveness) -> Self {
        Self {
            liveness,
            observed_at: Utc::now(),
        }
    }
}

/// Jog tuning held by the robot link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotSettings {
    /// Seconds the controller keeps applying a velocity command before
    /// stopping on its own.
    pub velocity_timeout: f64,
    /// Jog speed (mm/s) applied to a full-scale axis input of `1.0`.
    pub jog_velocity: f64,
}

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            velocity_timeout: 0.2,
            jog_velocity: 20.0,
        }
    }
}

/// A partial settings change. Absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub velocity_timeout: Option<f64>,
    #[serde(default)]
    pub jog_velocity: Option<f64>,
}

impl SettingsUpdate {
    /// Check that every present value is finite and strictly positive.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::InvalidArgument`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ArmError> {
        for (name, value) in [
            ("velocity_timeout", self.velocity_timeout),
            ("jog_velocity", self.jog_velocity),
        ] {
            if let Some(v) = value
                && !(v.is_finite() && v > 0.0)
            {
                return Err(ArmError::InvalidArgument(format!(
                    "{name} must be a positive number, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// `true` when the update carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.velocity_timeout.is_none() && self.jog_velocity.is_none()
    }
}

/// Gripper actuation requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperAction {
    Open,
    Close,
}

impl FromStr for GripperAction {
    type Err = ArmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            other => Err(ArmError::InvalidArgument(format!(
                "invalid gripper action '{other}' (expected 'open' or 'close')"
            ))),
        }
    }
}

/// ASCII commands understood by the robot controller.
///
/// `Display` renders the exact wire text without the NUL terminator. Floats
/// use the shortest round-trip digits; whole numbers keep their `.0`, and
/// magnitudes outside `[1e-4, 1e16)` use a signed two-digit exponent
/// (`1e-06`, `1.5e+16`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobotCommand {
    ActivateRobot,
    SetVelTimeout(f64),
    Home,
    /// Linear velocity jog in the world reference frame; angular terms are
    /// always zero.
    MoveLinVelWrf { vx: f64, vy: f64, vz: f64 },
    GripperOpen,
    GripperClose,
    ResetError,
    ResumeMotion,
    GetStatusRobot,
}

impl From<GripperAction> for RobotCommand {
    fn from(action: GripperAction) -> Self {
        match action {
            GripperAction::Open => Self::GripperOpen,
            GripperAction::Close => Self::GripperClose,
        }
    }
}

impl fmt::Display for RobotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActivateRobot => f.write_str("ActivateRobot"),
            Self::SetVelTimeout(secs) => write!(f, "SetVelTimeout({})", WireFloat(*secs)),
            Self::Home => f.write_str("Home"),
            Self::MoveLinVelWrf { vx, vy, vz } => {
                write!(
                    f,
                    "MoveLinVelWrf({}, {}, {}, 0, 0, 0)",
                    WireFloat(*vx),
                    WireFloat(*vy),
                    WireFloat(*vz)
                )
            }
            Self::GripperOpen => f.write_str("GripperOpen"),
            Self::GripperClose => f.write_str("GripperClose"),
            Self::ResetError => f.write_str("ResetError"),
            Self::ResumeMotion => f.write_str("ResumeMotion"),
            Self::GetStatusRobot => f.write_str("GetStatusRobot"),
        }
    }
}

/// Float argument as the controller's command parser expects it.
struct WireFloat(f64);

impl fmt::Display for WireFloat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        let magnitude = v.abs();
        if !v.is_finite() || magnitude == 0.0 || (1e-4..1e16).contains(&magnitude) {
            let plain = v.to_string();
            if v.is_finite() && !plain.contains('.') {
                return write!(f, "{plain}.0");
            }
            return f.write_str(&plain);
        }
        let sci = format!("{v:e}");
        match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().map_err(|_| fmt::Error)?;
                let sign = if exp < 0 { '-' } else { '+' };
                write!(f, "{mantissa}e{sign}{:02}", exp.abs())
            }
            None => f.write_str(&sci),
        }
    }
}

/// An encoded camera frame.
///
/// The payload is reference-counted so handing the latest frame to a
/// publisher never copies the image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Monotonically increasing, starting at 1 for the first capture.
    pub seq: u64,
    pub data: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

/// Unified event wrapper for the publish bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "telearm-hal::status"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the publish bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// One encoded frame; `frame` is base64 JPEG.
    VideoFrame { seq: u64, frame: String },
    RobotStatus(StatusSnapshot),
}

/// Global error type spanning the robot link, the camera pipeline and the
/// operator surface.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Send Error: {0}")]
    Send(String),

    #[error("Receive Error: {0}")]
    Receive(String),

    #[error("Robot not connected")]
    NotConnected,

    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol Parse Error: {0}")]
    ProtocolParse(String),

    #[error("Capture Error on {device}: {details}")]
    Capture { device: String, details: String },

    #[error("Encode Error: {0}")]
    Encode(String),

    #[error("Server Error: {0}")]
    Server(String),
}
