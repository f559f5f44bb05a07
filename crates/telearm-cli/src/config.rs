//! Configuration – reads `~/.telearm/config.toml` (or `$TELEARM_CONFIG`).
//!
//! Every field has a default, so a missing file or a missing section is never
//! an error. The file is read once at startup and never written back.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use telearm_hal::{CaptureConfig, DEFAULT_ROBOT_ADDRESS, LinkConfig};
use telearm_types::RobotSettings;
use telearm_vision::{DEFAULT_BROADCAST_INTERVAL, DEFAULT_JPEG_QUALITY, FrameSourceConfig};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub robot: RobotConfig,
    pub camera: CameraConfig,
    pub server: ServerConfig,
}

/// `[robot]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Controller `host:port`.
    pub address: String,
    pub io_timeout_ms: u64,
    pub status_interval_ms: u64,
    /// Initial `SetVelTimeout` value in seconds.
    pub velocity_timeout: f64,
    /// Initial jog speed in mm/s.
    pub jog_velocity: f64,
    /// Start an in-process simulated controller and connect to it instead.
    pub simulate: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let settings = RobotSettings::default();
        Self {
            address: DEFAULT_ROBOT_ADDRESS.to_string(),
            io_timeout_ms: 100,
            status_interval_ms: 1000,
            velocity_timeout: settings.velocity_timeout,
            jog_velocity: settings.jog_velocity,
            simulate: false,
        }
    }
}

impl RobotConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            address: self.address.clone(),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            status_interval: Duration::from_millis(self.status_interval_ms),
            settings: RobotSettings {
                velocity_timeout: self.velocity_timeout,
                jog_velocity: self.jog_velocity,
            },
        }
    }
}

/// `[camera]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub warmup_ms: u64,
    pub frame_interval_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            enabled: true,
            width: capture.width,
            height: capture.height,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            warmup_ms: 2000,
            frame_interval_ms: 33,
            error_backoff_ms: 1000,
        }
    }
}

impl CameraConfig {
    pub fn frame_source_config(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            capture: CaptureConfig {
                width: self.width,
                height: self.height,
            },
            jpeg_quality: self.jpeg_quality,
            warmup: Duration::from_millis(self.warmup_ms),
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub broadcast_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: telearm_cockpit::DEFAULT_PORT,
            broadcast_interval_ms: DEFAULT_BROADCAST_INTERVAL.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

/// `$TELEARM_CONFIG`, else `~/.telearm/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TELEARM_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".telearm").join("config.toml")
}

/// Load the config with environment overrides applied. A missing file yields
/// the defaults.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))
}

/// Apply `TELEARM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TELEARM_ROBOT_ADDRESS` | `robot.address` |
/// | `TELEARM_PORT` | `server.port` |
/// | `TELEARM_SIMULATE` | `robot.simulate` (`1`/`true`/`yes`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("TELEARM_ROBOT_ADDRESS") {
        cfg.robot.address = v;
    }
    if let Some(v) = var("TELEARM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server.port = port;
    }
    if let Some(v) = var("TELEARM_SIMULATE") {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.robot.simulate = true,
            "0" | "false" | "no" => cfg.robot.simulate = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, body).expect("write config");
        path
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.robot.address, "192.168.0.100:10000");
        assert_eq!(cfg.robot.velocity_timeout, 0.2);
        assert_eq!(cfg.robot.jog_velocity, 20.0);
        assert!(!cfg.robot.simulate);
        assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
        assert_eq!(cfg.camera.jpeg_quality, 85);
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.server.broadcast_interval(), Duration::from_millis(33));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(
            &dir,
            r#"
            [robot]
            address = "10.0.0.5:10000"
            jog_velocity = 35.0

            [camera]
            enabled = false
            "#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.robot.address, "10.0.0.5:10000");
        assert_eq!(cfg.robot.jog_velocity, 35.0);
        assert_eq!(cfg.robot.velocity_timeout, 0.2);
        assert!(!cfg.camera.enabled);
        assert_eq!(cfg.camera.frame_interval_ms, 33);
        assert_eq!(cfg.server, ServerConfig::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, "[robot\naddress = ");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"), "{err}");
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = write(&dir, "[server]\nport = \"five thousand\"\n");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn converts_into_runtime_configs() {
        let mut cfg = Config::default();
        cfg.robot.io_timeout_ms = 250;
        cfg.robot.velocity_timeout = 0.5;
        let link = cfg.robot.link_config();
        assert_eq!(link.io_timeout, Duration::from_millis(250));
        assert_eq!(link.status_interval, Duration::from_secs(1));
        assert_eq!(link.settings.velocity_timeout, 0.5);

        let source = cfg.camera.frame_source_config();
        assert_eq!(source.warmup, Duration::from_secs(2));
        assert_eq!(source.error_backoff, Duration::from_secs(1));
        assert_eq!(source.capture, CaptureConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[
                ("TELEARM_ROBOT_ADDRESS", "127.0.0.1:10000"),
                ("TELEARM_PORT", "8181"),
                ("TELEARM_SIMULATE", "true"),
            ]),
        );
        assert_eq!(cfg.robot.address, "127.0.0.1:10000");
        assert_eq!(cfg.server.port, 8181);
        assert!(cfg.robot.simulate);
    }

    #[test]
    fn env_overrides_ignore_invalid_values() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            env(&[("TELEARM_PORT", "not-a-port"), ("TELEARM_SIMULATE", "maybe")]),
        );
        assert_eq!(cfg.server.port, 5000);
        assert!(!cfg.robot.simulate);
    }

    #[test]
    fn config_path_points_to_telearm_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.telearm/config.toml"));
    }
}
