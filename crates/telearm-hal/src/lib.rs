//! `telearm-hal` – everything that touches hardware.
//!
//! # Modules
//!
//! - [`channel`] – [`CommandChannel`], the single owner of the controller
//!   socket.
//! - [`status`] – status-reply tokenizer and the background
//!   [`StatusMonitor`].
//! - [`robot_link`] – [`RobotLink`], the unit the operator surface talks to.
//! - [`camera`] – the [`CaptureDevice`] trait implemented by camera drivers.
//! - [`sim`] – simulated controller and camera for tests and bench runs.

pub mod camera;
pub mod channel;
pub mod robot_link;
pub mod sim;
pub mod state;
pub mod status;

pub use camera::{CameraFrame, CaptureConfig, CaptureDevice, DeviceState};
pub use channel::{CommandChannel, Received};
pub use robot_link::{DEFAULT_ROBOT_ADDRESS, LinkConfig, RobotLink};
pub use sim::{SimCamera, SimCameraProbe, SimController, StatusReplies};
pub use state::LinkState;
pub use status::{StatusMonitor, StatusParseError, StatusRecord, parse_status_reply};
