//! [`FrameBroadcaster`] – republishes the last frame on a fixed cadence.
//!
//! Reads [`FrameSource::last_frame`] every tick, base64-encodes it and hands
//! it to a [`PublishSink`] on [`Topic::Video`]. The sink fans out without
//! backpressure, so a slow subscriber never delays the next tick. Missed
//! ticks are skipped rather than bunched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use telearm_middleware::{PublishSink, Topic};
use telearm_types::{Event, EventPayload};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::frame_source::FrameSource;

/// ~30 publishes per second.
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(33);

const SOURCE: &str = "telearm-vision::broadcaster";

/// Throughput is logged every this many published frames.
const LOG_EVERY_FRAMES: u64 = 300;

/// Handle to the running broadcast task.
pub struct FrameBroadcaster {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FrameBroadcaster {
    /// Start publishing `source`'s last frame to `sink` every `interval`.
    pub fn spawn(source: Arc<FrameSource>, sink: Arc<dyn PublishSink>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(source, sink, interval, cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "frame broadcaster ended abnormally");
        }
    }

    /// Cancel without waiting.
    pub fn abort_now(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameBroadcaster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    source: Arc<FrameSource>,
    sink: Arc<dyn PublishSink>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut published: u64 = 0;
    let mut window_start = Instant::now();
    debug!(?interval, "frame broadcaster started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !source.is_running() {
            continue;
        }
        let Some(frame) = source.last_frame() else {
            continue;
        };

        let event = Event::new(
            SOURCE,
            EventPayload::VideoFrame {
                seq: frame.seq,
                frame: STANDARD.encode(&frame.data),
            },
        );
        match sink.publish(Topic::Video, event) {
            Ok(receivers) => trace!(seq = frame.seq, receivers, "frame published"),
            Err(e) => warn!(error = %e, "frame publish failed"),
        }

        published += 1;
        if published % LOG_EVERY_FRAMES == 0 {
            let elapsed = window_start.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 {
                LOG_EVERY_FRAMES as f64 / elapsed
            } else {
                0.0
            };
            info!(frames = published, fps = (fps * 10.0).round() / 10.0, "broadcast throughput");
            window_start = Instant::now();
        }
    }
    debug!("frame broadcaster stopped");
}
