//! [`FrameSource`] – owns the capture device and keeps the latest encoded
//! frame.
//!
//! The capture loop runs as a tokio task. Each capture+encode runs on the
//! blocking pool with the device moved in and handed back, so the device has
//! exactly one owner at any time and the executor never stalls on a driver
//! call.
//!
//! The "last frame" slot holds at most one frame. A new frame replaces the
//! previous one; nothing is queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use telearm_hal::{CaptureConfig, CaptureDevice};
use telearm_types::{ArmError, Frame};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::encoder::{DEFAULT_JPEG_QUALITY, encode_jpeg};

/// A progress line is logged every this many captured frames.
const LOG_EVERY_FRAMES: u64 = 300;

/// Capture pipeline tuning.
#[derive(Debug, Clone, Copy)]
pub struct FrameSourceConfig {
    pub capture: CaptureConfig,
    pub jpeg_quality: u8,
    /// Pause between starting the device and the first capture.
    pub warmup: Duration,
    /// Pause after a successful capture (~30 fps at 33 ms).
    pub frame_interval: Duration,
    /// Pause after a failed capture.
    pub error_backoff: Duration,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            warmup: Duration::from_secs(2),
            frame_interval: Duration::from_millis(33),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// State shared between the handle and the capture task.
#[derive(Default)]
struct Shared {
    last_frame: RwLock<Option<Frame>>,
    seq: AtomicU64,
    running: AtomicBool,
}

struct CaptureTask {
    cancel: CancellationToken,
    /// Yields the device back when the loop exits, `None` if it was lost.
    handle: JoinHandle<Option<Box<dyn CaptureDevice>>>,
}

/// Who holds the device: the handle while idle, the task while running.
struct Lifecycle {
    device: Option<Box<dyn CaptureDevice>>,
    task: Option<CaptureTask>,
}

/// Background capture loop plus the "last frame" slot.
pub struct FrameSource {
    config: FrameSourceConfig,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, config: FrameSourceConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                device: Some(device),
                task: None,
            }),
        }
    }

    /// Configure and start the device, wait out the warm-up, then let the
    /// capture loop run.
    ///
    /// The lifecycle lock is released before the warm-up, so [`stop`][Self::stop]
    /// stays prompt while a start is warming up.
    ///
    /// If a loop is already running it is stopped and its device released
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Capture`] if the device cannot be configured or
    /// started, or was lost by an earlier run.
    pub async fn start(&self) -> Result<(), ArmError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.halt(&mut lifecycle).await;

        let device = lifecycle.device.take().ok_or_else(|| ArmError::Capture {
            device: "camera".to_string(),
            details: "capture device unavailable".to_string(),
        })?;
        let capture = self.config.capture;
        let (device, started) =
            with_device(device, move |d| d.configure(&capture).and_then(|()| d.start())).await?;
        let id = device.id().to_string();
        if let Err(e) = started {
            lifecycle.device = Some(device);
            warn!(device = %id, error = %e, "camera failed to start");
            return Err(e);
        }

        *self.shared.last_frame.write() = None;

        let cancel = CancellationToken::new();
        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(capture_loop(
            device,
            Arc::clone(&self.shared),
            self.config,
            cancel.clone(),
        ));
        lifecycle.task = Some(CaptureTask {
            cancel: cancel.clone(),
            handle,
        });
        drop(lifecycle);
        info!(
            device = %id,
            width = capture.width,
            height = capture.height,
            "camera started"
        );

        // The loop holds its first capture for the same warm-up; a concurrent
        // stop cuts both short.
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.warmup) => {}
        }
        Ok(())
    }

    /// Stop the loop and the device. Safe if never started.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.halt(&mut lifecycle).await;
    }

    /// The most recent frame, or `None` before the first capture. Never
    /// blocks on the capture loop.
    pub fn last_frame(&self) -> Option<Frame> {
        self.shared.last_frame.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Synchronous best-effort teardown: cancel and abort the loop without
    /// waiting. The device is dropped with the task.
    pub fn abort_now(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Ok(mut lifecycle) = self.lifecycle.try_lock()
            && let Some(task) = lifecycle.task.take()
        {
            task.cancel.cancel();
            task.handle.abort();
        }
    }

    async fn halt(&self, lifecycle: &mut Lifecycle) {
        if let Some(task) = lifecycle.task.take() {
            task.cancel.cancel();
            match task.handle.await {
                Ok(Some(device)) => lifecycle.device = Some(device),
                Ok(None) => warn!("capture loop lost its device"),
                Err(e) => warn!(error = %e, "capture loop ended abnormally"),
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);

        let Some(device) = lifecycle.device.take() else {
            return;
        };
        match with_device(device, |d| d.stop()).await {
            Ok((device, stopped)) => {
                if let Err(e) = stopped {
                    warn!(device = device.id(), error = %e, "camera stop reported a fault");
                }
                debug!(device = device.id(), "camera released");
                lifecycle.device = Some(device);
            }
            Err(e) => warn!(error = %e, "camera lost while stopping"),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Some(task) = self.lifecycle.get_mut().task.take() {
            task.cancel.cancel();
        }
    }
}

/// Run `f` on the blocking pool with exclusive use of `device`, then hand the
/// device back.
async fn with_device<T, F>(
    mut device: Box<dyn CaptureDevice>,
    f: F,
) -> Result<(Box<dyn CaptureDevice>, T), ArmError>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn CaptureDevice) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = f(device.as_mut());
        (device, out)
    })
    .await
    .map_err(|e| ArmError::Capture {
        device: "camera".to_string(),
        details: format!("driver call panicked: {e}"),
    })
}

async fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    shared: Arc<Shared>,
    config: FrameSourceConfig,
    cancel: CancellationToken,
) -> Option<Box<dyn CaptureDevice>> {
    let quality = config.jpeg_quality;
    let mut captured: u64 = 0;

    tokio::select! {
        _ = cancel.cancelled() => return Some(device),
        _ = tokio::time::sleep(config.warmup) => {}
    }

    while !cancel.is_cancelled() {
        let outcome = with_device(device, move |d| {
            d.capture().and_then(|raw| encode_jpeg(&raw, quality))
        })
        .await;
        let (returned, result) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "capture loop aborted");
                shared.running.store(false, Ordering::SeqCst);
                return None;
            }
        };
        device = returned;

        let pause = match result {
            Ok(jpeg) => {
                let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
                *shared.last_frame.write() = Some(Frame {
                    seq,
                    data: jpeg.into(),
                    captured_at: Utc::now(),
                });
                captured += 1;
                if captured % LOG_EVERY_FRAMES == 0 {
                    info!(device = device.id(), frames = captured, seq, "capture progress");
                }
                config.frame_interval
            }
            Err(e) => {
                warn!(
                    device = device.id(),
                    error = %e,
                    backoff_ms = config.error_backoff.as_millis() as u64,
                    "capture failed; backing off"
                );
                config.error_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telearm_hal::{DeviceState, SimCamera};

    fn fast_config() -> FrameSourceConfig {
        FrameSourceConfig {
            capture: CaptureConfig { width: 16, height: 8 },
            jpeg_quality: 70,
            warmup: Duration::ZERO,
            frame_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(10),
        }
    }

    async fn wait_for_seq(source: &FrameSource, at_least: u64) -> Frame {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(frame) = source.last_frame()
                && frame.seq >= at_least
            {
                return frame;
            }
            assert!(tokio::time::Instant::now() < deadline, "no frame {at_least}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn no_frame_before_first_capture() {
        let source = FrameSource::new(Box::new(SimCamera::new("sim")), fast_config());
        assert!(source.last_frame().is_none());
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn last_frame_is_always_the_newest() {
        let source = FrameSource::new(Box::new(SimCamera::new("sim")), fast_config());
        source.start().await.unwrap();
        assert!(source.is_running());

        let mut previous = 0;
        for _ in 0..5 {
            let frame = wait_for_seq(&source, previous + 1).await;
            assert!(frame.seq > previous);
            assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
            previous = frame.seq;
        }

        source.stop().await;
        let final_seq = source.last_frame().unwrap().seq;
        assert_eq!(final_seq, source.shared.seq.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.last_frame().unwrap().seq, final_seq, "loop has stopped");
    }

    #[tokio::test]
    async fn stop_releases_the_device() {
        let camera = SimCamera::new("sim");
        let probe = camera.probe();
        let source = FrameSource::new(Box::new(camera), fast_config());

        source.start().await.unwrap();
        assert_eq!(probe.state(), DeviceState::Running);
        source.stop().await;
        assert_eq!(probe.state(), DeviceState::Stopped);
        assert!(!source.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_is_safe() {
        let camera = SimCamera::new("sim");
        let probe = camera.probe();
        let source = FrameSource::new(Box::new(camera), fast_config());
        source.stop().await;
        source.stop().await;
        assert_eq!(probe.state(), DeviceState::Uninitialized);
    }

    #[tokio::test]
    async fn restart_tears_down_the_prior_run() {
        let camera = SimCamera::new("sim");
        let probe = camera.probe();
        let source = FrameSource::new(Box::new(camera), fast_config());

        source.start().await.unwrap();
        let first = wait_for_seq(&source, 1).await;
        source.start().await.unwrap();
        assert_eq!(probe.starts(), 2);
        assert_eq!(probe.state(), DeviceState::Running);

        let next = wait_for_seq(&source, first.seq + 1).await;
        assert!(next.seq > first.seq, "sequence keeps increasing across runs");
        source.stop().await;
    }

    #[tokio::test]
    async fn capture_errors_back_off_and_continue() {
        let source = FrameSource::new(
            Box::new(SimCamera::new("flaky").failing_every(2)),
            fast_config(),
        );
        source.start().await.unwrap();
        wait_for_seq(&source, 3).await;
        assert!(source.is_running());
        source.stop().await;
    }

    #[tokio::test]
    async fn failed_start_keeps_the_device() {
        let mut config = fast_config();
        config.capture = CaptureConfig { width: 0, height: 0 };
        let source = FrameSource::new(Box::new(SimCamera::new("sim")), config);

        assert!(matches!(source.start().await, Err(ArmError::Capture { .. })));
        assert!(!source.is_running());
        assert!(
            matches!(source.start().await, Err(ArmError::Capture { details, .. }) if details.contains("invalid geometry")),
            "the device is still owned and retried"
        );
    }

    #[tokio::test]
    async fn stop_is_prompt_during_a_long_interval() {
        let mut config = fast_config();
        config.frame_interval = Duration::from_secs(60);
        let source = FrameSource::new(Box::new(SimCamera::new("sim")), config);
        source.start().await.unwrap();
        wait_for_seq(&source, 1).await;

        tokio::time::timeout(Duration::from_secs(1), source.stop())
            .await
            .expect("stop must not wait for the interval");
    }

    #[tokio::test]
    async fn stop_is_prompt_during_warmup() {
        let camera = SimCamera::new("sim");
        let probe = camera.probe();
        let mut config = fast_config();
        config.warmup = Duration::from_secs(60);
        let source = Arc::new(FrameSource::new(Box::new(camera), config));

        let starting = tokio::spawn({
            let source = Arc::clone(&source);
            async move { source.start().await }
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while probe.state() != DeviceState::Running {
            assert!(tokio::time::Instant::now() < deadline, "device never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(1), source.stop())
            .await
            .expect("stop must not wait out the warm-up");
        assert_eq!(probe.state(), DeviceState::Stopped);
        assert!(source.last_frame().is_none());
        let started = tokio::time::timeout(Duration::from_secs(1), starting)
            .await
            .expect("start returns once stopped")
            .unwrap();
        assert!(started.is_ok());
    }

    #[tokio::test]
    async fn abort_now_marks_not_running() {
        let source = FrameSource::new(Box::new(SimCamera::new("sim")), fast_config());
        source.start().await.unwrap();
        source.abort_now();
        assert!(!source.is_running());
        source.stop().await;
    }
}
