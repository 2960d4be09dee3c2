//! adbblitz: continuous Android screen capture over adb
//!
//! Streams `screenrecord` output from a device as raw H.264, decodes it on a
//! background thread and hands the newest frame to the caller.
//!
//! # Features
//!
//! - **Capture**: `screenrecord` restarted back to back by a remote shell loop
//! - **Decode**: FFmpeg H.264 with Annex B access unit assembly
//! - **Latest frame**: bounded ring buffer, slow consumers skip frames
//! - **Teardown**: interrupt, grace delay, then process tree kill
//!
//! # Example
//!
//! ```rust,no_run
//! use adbblitz::{CaptureConfig, ScreenCapture};
//! use std::time::Duration;
//!
//! fn main() -> adbblitz::Result<()> {
//!     let config = CaptureConfig::new("adb", "127.0.0.1:5555")
//!         .with_resolution(1280, 720)
//!         .with_idle_sleep(Duration::from_millis(10));
//!
//!     let mut capture = ScreenCapture::new(config)?;
//!     for frame in capture.start()?.take(300) {
//!         println!("frame {} ({} bytes)", frame.pts, frame.size_bytes());
//!     }
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod command;
pub mod config;
pub mod decode;
pub mod error;
pub mod platform;
pub mod types;

// Re-exports for convenience
pub use capture::{CaptureState, FrameBuffer, Frames, ScreenCapture, StopHandle};
pub use command::{encode_command, recording_script, CommandOptions};
pub use config::CaptureConfig;
pub use decode::{DecodeAdapter, Decoder, FfmpegDecoder};
pub use error::{Error, Result};
pub use types::{Frame, FrameFormat, Packet, Resolution, Stats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
