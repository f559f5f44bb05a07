//! `telearm-middleware` – fan-out publishing between the background loops
//! and every connected browser.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`sink`] – the [`PublishSink`] seam that producers publish through.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sink::PublishSink;
