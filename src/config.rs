//! Configuration types for adbblitz

use crate::error::{Error, Result};
use crate::types::{FrameFormat, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest segment `screenrecord` accepts for `--time-limit`
pub const MAX_TIME_LIMIT_SECS: u32 = 180;

/// Default segment length, one second under the platform cap
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 179;

/// Default number of decoded frames kept around
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Largest accepted output width or height
pub const MAX_DIMENSION: u32 = 8192;

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Path to the adb executable
    pub adb_path: PathBuf,
    /// Serial of the target device (as shown by `adb devices`)
    pub device_serial: String,
    /// Length of one `screenrecord` segment in seconds
    pub time_limit_secs: u32,
    /// Output frame size, also passed to `screenrecord --size`
    pub resolution: Resolution,
    /// Bit rate for `screenrecord --bit-rate` (e.g. "20M")
    pub bitrate: String,
    /// Decode the command payload with `busybox base64` on the device
    pub use_busybox: bool,
    /// Run `adb connect <serial>` before capturing
    pub connect_to_device: bool,
    /// Number of most recent frames kept in memory
    pub buffer_capacity: usize,
    /// Sleep after yielding a frame when no new frame arrived, 0 disables
    pub idle_sleep_ms: u64,
    /// Pixel layout of delivered frames
    pub pixel_format: FrameFormat,
    /// Executable providing `console-ctrl` for Windows Ctrl-C delivery
    ///
    /// Defaults to an `adbblitz` binary next to the running program, if any.
    /// Without one, stopping skips the interrupt and kills the process tree.
    pub console_helper: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            device_serial: String::new(),
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            resolution: Resolution::HD_PLUS,
            bitrate: "20M".to_string(),
            use_busybox: false,
            connect_to_device: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            idle_sleep_ms: 0,
            pixel_format: FrameFormat::Bgr24,
            console_helper: None,
        }
    }
}

impl CaptureConfig {
    pub fn new(adb_path: impl Into<PathBuf>, device_serial: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            device_serial: device_serial.into(),
            ..Default::default()
        }
    }

    pub fn with_time_limit(mut self, secs: u32) -> Self {
        self.time_limit_secs = secs;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.bitrate = bitrate.into();
        self
    }

    pub fn with_busybox(mut self, use_busybox: bool) -> Self {
        self.use_busybox = use_busybox;
        self
    }

    pub fn with_connect(mut self, connect: bool) -> Self {
        self.connect_to_device = connect;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep_ms = idle.as_millis() as u64;
        self
    }

    pub fn with_pixel_format(mut self, format: FrameFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_console_helper(mut self, helper: impl Into<PathBuf>) -> Self {
        self.console_helper = Some(helper.into());
        self
    }

    /// Idle sleep as a duration, `None` when disabled
    pub fn idle_sleep(&self) -> Option<Duration> {
        (self.idle_sleep_ms > 0).then(|| Duration::from_millis(self.idle_sleep_ms))
    }

    /// Segment length clamped to what `screenrecord` accepts
    pub fn effective_time_limit(&self) -> u32 {
        let clamped = self.time_limit_secs.clamp(1, MAX_TIME_LIMIT_SECS);
        if clamped != self.time_limit_secs {
            tracing::warn!(
                "time limit {}s out of range, using {}s",
                self.time_limit_secs,
                clamped
            );
        }
        clamped
    }

    /// Check the configuration before anything is spawned
    pub fn validate(&self) -> Result<()> {
        if self.device_serial.trim().is_empty() {
            return Err(Error::Config("device_serial must not be empty".into()));
        }
        if self.adb_path.as_os_str().is_empty() {
            return Err(Error::Config("adb_path must not be empty".into()));
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(Error::Config(format!(
                "resolution must be non-zero, got {}",
                self.resolution
            )));
        }
        if self.resolution.width > MAX_DIMENSION || self.resolution.height > MAX_DIMENSION {
            return Err(Error::Config(format!(
                "resolution {} exceeds {}x{}",
                self.resolution, MAX_DIMENSION, MAX_DIMENSION
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer_capacity must be at least 1".into()));
        }
        validate_bitrate(&self.bitrate)?;
        Ok(())
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// The bit rate is interpolated into a shell script, so only `<digits>[K|M]` is accepted
fn validate_bitrate(bitrate: &str) -> Result<()> {
    let digits = bitrate
        .strip_suffix(['K', 'k', 'M', 'm'])
        .unwrap_or(bitrate);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "Invalid bitrate '{}', expected e.g. 4000000, 8M or 500K",
            bitrate
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.time_limit_secs, 179);
        assert_eq!(config.resolution, Resolution::new(1600, 900));
        assert_eq!(config.bitrate, "20M");
        assert_eq!(config.buffer_capacity, 10);
        assert!(config.idle_sleep().is_none());
        assert!(config.connect_to_device);
        assert!(!config.use_busybox);
    }

    #[test]
    fn test_validate() {
        assert!(CaptureConfig::default().validate().is_err());

        let config = CaptureConfig::new("adb", "127.0.0.1:5555");
        assert!(config.validate().is_ok());
        assert!(config.clone().with_buffer_capacity(0).validate().is_err());
        assert!(config.clone().with_resolution(0, 900).validate().is_err());
        assert!(config.clone().with_resolution(MAX_DIMENSION, MAX_DIMENSION).validate().is_ok());
        assert!(config.clone().with_resolution(MAX_DIMENSION + 1, 900).validate().is_err());
        assert!(config.clone().with_resolution(1600, u32::MAX).validate().is_err());
        assert!(config.clone().with_bitrate("8M").validate().is_ok());
        assert!(config.clone().with_bitrate("4000000").validate().is_ok());
        assert!(config.clone().with_bitrate("M").validate().is_err());
        assert!(config.clone().with_bitrate("20M; reboot").validate().is_err());
    }

    #[test]
    fn test_time_limit_clamp() {
        let config = CaptureConfig::new("adb", "serial");
        assert_eq!(config.clone().with_time_limit(500).effective_time_limit(), 180);
        assert_eq!(config.clone().with_time_limit(0).effective_time_limit(), 1);
        assert_eq!(config.with_time_limit(60).effective_time_limit(), 60);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = CaptureConfig::new("/opt/platform-tools/adb", "emulator-5554")
            .with_idle_sleep(Duration::from_millis(20))
            .with_pixel_format(FrameFormat::Rgb24);
        let text = config.to_toml_string().unwrap();
        let parsed = CaptureConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CaptureConfig::from_toml_str(
            r#"
            device_serial = "127.0.0.1:5555"
            bitrate = "8M"
            resolution = { width = 1280, height = 720 }
            "#,
        )
        .unwrap();
        assert_eq!(config.device_serial, "127.0.0.1:5555");
        assert_eq!(config.resolution, Resolution::HD_720P);
        assert_eq!(config.time_limit_secs, DEFAULT_TIME_LIMIT_SECS);
        assert_eq!(config.adb_path, PathBuf::from("adb"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "device_serial = \"abc\"\nidle_sleep_ms = 5\n").unwrap();
        let config = CaptureConfig::load(&path).unwrap();
        assert_eq!(config.idle_sleep(), Some(Duration::from_millis(5)));
    }
}
