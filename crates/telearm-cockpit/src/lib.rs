//! `telearm-cockpit` – the operator's HTTP + WebSocket front end.
//!
//! Boots an [`axum`] router (default port `5000`) that:
//!
//! 1. **Serves** the embedded teleop page at `GET /`.
//!
//! 2. **Answers** the JSON control routes by calling into the shared
//!    [`RobotLink`][telearm_hal::RobotLink]:
//!
//!    | Route | Effect |
//!    |---|---|
//!    | `POST /connect` | open the link and run the init sequence |
//!    | `POST /jog {x,y,z}` | velocity jog, axes scaled by `jog_velocity` |
//!    | `POST /stop` | zero-velocity jog |
//!    | `POST /gripper {action}` | `"open"` or `"close"` |
//!    | `POST /reset_error` | `ResetError` then `ResumeMotion` |
//!    | `GET /settings` | current jog settings |
//!    | `POST /settings {velocity_timeout?, jog_velocity?}` | partial update |
//!
//!    Every route answers `{success: bool, error?: string}`. Request bodies
//!    are JSON with `Content-Type: application/json`.
//!
//! 3. **Bridges** (at `GET /ws`) the [`Topic::Video`] and [`Topic::RobotStatus`] lanes of the
//!    [`EventBus`] to every connected browser over WebSocket.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telearm_cockpit::CockpitServer;
//! use telearm_hal::{LinkConfig, RobotLink};
//! use telearm_middleware::EventBus;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), telearm_types::ArmError> {
//!     let bus = Arc::new(EventBus::default());
//!     let link = Arc::new(RobotLink::new(LinkConfig::default(), bus.clone()));
//!     CockpitServer::new(link, bus)
//!         .run(CancellationToken::new())
//!         .await
//! }
//! ```
//!
//! [`EventBus`]: telearm_middleware::EventBus
//! [`Topic::Video`]: telearm_middleware::Topic::Video
//! [`Topic::RobotStatus`]: telearm_middleware::Topic::RobotStatus

pub mod routes;
pub mod server;
mod ws;

pub use routes::{AppState, router};
pub use server::{CockpitServer, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT};
