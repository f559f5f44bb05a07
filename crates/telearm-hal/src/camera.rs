//! [`CaptureDevice`] trait and supporting types for image-capture hardware.
//!
//! A device moves through `Uninitialized → Configured → Running → Stopped`
//! and is owned by exactly one frame source at a time. Driver internals are
//! opaque to the rest of the system; the frame pipeline only ever talks to
//! this trait.

use telearm_types::ArmError;

/// A raw RGB24 image returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB24 pixel data, row-major, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Byte length an RGB24 image of this size must have.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Requested capture geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Device lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Configured,
    Running,
    Stopped,
}

/// A camera or image-capture device.
///
/// All methods may block; callers run them off the async executor.
pub trait CaptureDevice: Send {
    /// Stable identifier for this camera, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Apply `config`. Valid from any state except `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Capture`] if the device rejects the configuration.
    fn configure(&mut self, config: &CaptureConfig) -> Result<(), ArmError>;

    /// Begin streaming. Requires a prior successful [`configure`][Self::configure].
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Capture`] if the device cannot start.
    fn start(&mut self) -> Result<(), ArmError>;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Capture`] if the frame cannot be captured
    /// (e.g. the device is disconnected or the buffer is unavailable).
    fn capture(&mut self) -> Result<CameraFrame, ArmError>;

    /// Stop streaming and release driver buffers. Stopping a device that is
    /// not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Capture`] if the driver reports a fault while
    /// stopping.
    fn stop(&mut self) -> Result<(), ArmError>;

    /// Current lifecycle state.
    fn state(&self) -> DeviceState;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        state: DeviceState,
        config: CaptureConfig,
    }

    impl CaptureDevice for MockCamera {
        fn id(&self) -> &str {
            "mock"
        }

        fn configure(&mut self, config: &CaptureConfig) -> Result<(), ArmError> {
            self.config = *config;
            self.state = DeviceState::Configured;
            Ok(())
        }

        fn start(&mut self) -> Result<(), ArmError> {
            self.state = DeviceState::Running;
            Ok(())
        }

        fn capture(&mut self) -> Result<CameraFrame, ArmError> {
            Ok(CameraFrame {
                width: self.config.width,
                height: self.config.height,
                data: vec![0u8; (self.config.width * self.config.height * 3) as usize],
            })
        }

        fn stop(&mut self) -> Result<(), ArmError> {
            self.state = DeviceState::Stopped;
            Ok(())
        }

        fn state(&self) -> DeviceState {
            self.state
        }
    }

    #[test]
    fn mock_camera_lifecycle() {
        let mut cam: Box<dyn CaptureDevice> = Box::new(MockCamera {
            state: DeviceState::Uninitialized,
            config: CaptureConfig::default(),
        });
        cam.configure(&CaptureConfig { width: 2, height: 2 }).unwrap();
        assert_eq!(cam.state(), DeviceState::Configured);
        cam.start().unwrap();
        let frame = cam.capture().unwrap();
        assert_eq!(frame.data.len(), frame.expected_len());
        assert_eq!(frame.data.len(), 12);
        cam.stop().unwrap();
        assert_eq!(cam.state(), DeviceState::Stopped);
    }

    #[test]
    fn default_capture_geometry_is_vga() {
        let config = CaptureConfig::default();
        assert_eq!((config.width, config.height), (640, 480));
    }
}
