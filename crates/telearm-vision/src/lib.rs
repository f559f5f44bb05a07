//! `telearm-vision` – the camera-to-browser frame pipeline.
//!
//! ```text
//! CaptureDevice ──▶ FrameSource ──(last frame)──▶ FrameBroadcaster ──▶ PublishSink
//!                     capture + encode             fixed cadence
//! ```
//!
//! # Modules
//!
//! - [`encoder`] – RGB24 → JPEG.
//! - [`frame_source`] – [`FrameSource`]: owns the capture device, runs the
//!   capture loop and holds the most recent encoded [`Frame`][telearm_types::Frame].
//! - [`broadcaster`] – [`FrameBroadcaster`]: republishes the last frame on
//!   its own timer, independent of capture jitter.

pub mod broadcaster;
pub mod encoder;
pub mod frame_source;

pub use broadcaster::{DEFAULT_BROADCAST_INTERVAL, FrameBroadcaster};
pub use encoder::{DEFAULT_JPEG_QUALITY, encode_jpeg};
pub use frame_source::{FrameSource, FrameSourceConfig};
