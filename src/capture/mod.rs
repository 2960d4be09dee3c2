//! Screen capture module
//!
//! [`ScreenCapture`] owns one recording session:
//! - [`session`] supervises the `adb shell` subprocess
//! - [`reader`] pulls its output on a dedicated thread and decodes it
//! - [`buffer`] keeps the most recent frames for the consumer
//!
//! ```no_run
//! use adbblitz::{CaptureConfig, ScreenCapture};
//!
//! # fn main() -> adbblitz::Result<()> {
//! let mut capture = ScreenCapture::new(CaptureConfig::new("adb", "emulator-5554"))?;
//! for frame in capture.start()?.take(100) {
//!     println!("{}x{} frame #{}", frame.width, frame.height, frame.pts);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod reader;
pub mod session;

pub use buffer::FrameBuffer;
pub use reader::{CancelToken, ReaderHandle, ReaderOptions, StreamReader};
pub use session::Session;

use crate::command::{encode_command, recording_script, CommandOptions};
use crate::config::CaptureConfig;
use crate::decode::{Decoder, FfmpegDecoder};
use crate::error::{Error, Result};
use crate::platform;
use crate::types::{Frame, Stats, StatsCounters};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause after starting so the decoder can see its first keyframe
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Consumer poll interval while no frame exists yet
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the session gets to exit after the interrupt
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// How long the reader gets to exit after the process tree is killed
pub const JOIN_WINDOW: Duration = Duration::from_millis(250);

const SLEEP_SLICE: Duration = Duration::from_millis(16);

/// Lifecycle of a [`ScreenCapture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Constructed, not started
    Idle,
    /// Session and reader thread active
    Running,
    /// Teardown in progress
    Stopping,
    /// Terminal
    Stopped,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Running => write!(f, "running"),
            CaptureState::Stopping => write!(f, "stopping"),
            CaptureState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cloneable one-shot stop request, usable from any thread
///
/// Setting it ends the frame iteration; the iterator then tears the session
/// down on the consumer's thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request the stop; returns `true` only for the call that set it
    pub fn request_stop(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Continuous screen capture of one device
pub struct ScreenCapture {
    config: CaptureConfig,
    adb_path: PathBuf,
    command: String,
    helper: Option<PathBuf>,
    state: CaptureState,
    stop: StopHandle,
    buffer: Arc<FrameBuffer>,
    stats: Arc<StatsCounters>,
    session: Option<Session>,
    reader: Option<ReaderHandle>,
}

impl ScreenCapture {
    /// Validate `config`, connect to the device if asked to, and prepare the
    /// remote command
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;

        let adb_path = platform::short_path(&config.adb_path);
        if config.connect_to_device {
            session::connect(&adb_path, &config.device_serial)?;
        }

        let script = recording_script(
            config.effective_time_limit(),
            config.resolution,
            &config.bitrate,
        );
        let command = encode_command(
            &script,
            &CommandOptions::default().with_busybox(config.use_busybox),
        );
        let helper = config
            .console_helper
            .clone()
            .or_else(platform::default_console_helper);

        tracing::debug!("Remote command for {}: {}", config.device_serial, command);

        Ok(Self {
            buffer: Arc::new(FrameBuffer::new(config.buffer_capacity)),
            stats: Arc::new(StatsCounters::default()),
            config,
            adb_path,
            command,
            helper,
            state: CaptureState::Idle,
            stop: StopHandle::default(),
            session: None,
            reader: None,
        })
    }

    /// Start capturing with the FFmpeg H.264 decoder
    pub fn start(&mut self) -> Result<Frames<'_>> {
        self.start_with(FfmpegDecoder::new)
    }

    /// Start capturing with a decoder built by `factory` on the reader thread
    pub fn start_with<D, F>(&mut self, factory: F) -> Result<Frames<'_>>
    where
        D: Decoder + 'static,
        F: FnOnce() -> Result<D> + Send + 'static,
    {
        if self.state != CaptureState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a capture that is {}",
                self.state
            )));
        }
        if self.stop.is_stop_requested() {
            self.state = CaptureState::Stopped;
            return Err(Error::InvalidState("stop was requested before start".into()));
        }

        let mut session = Session::spawn(&self.adb_path, &self.config.device_serial, &self.command)?;
        let stdout = match session.take_stdout() {
            Some(stdout) => stdout,
            None => {
                abort_session(session);
                return Err(Error::Internal("Session has no output stream".into()));
            }
        };

        let options = ReaderOptions::new(self.config.resolution, self.config.pixel_format);
        let reader = match StreamReader::spawn(
            stdout,
            factory,
            Arc::clone(&self.buffer),
            Arc::clone(&self.stats),
            options,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                abort_session(session);
                self.state = CaptureState::Stopped;
                return Err(e);
            }
        };

        self.session = Some(session);
        self.reader = Some(reader);
        self.state = CaptureState::Running;
        tracing::info!(
            "Capture started: {} at {} {}",
            self.config.device_serial,
            self.config.resolution,
            self.config.bitrate
        );

        std::thread::sleep(SETTLE_DELAY);

        Ok(Frames {
            idle_sleep: self.config.idle_sleep(),
            last_count: None,
            capture: self,
        })
    }

    /// Stop the capture; repeated calls are no-ops
    pub fn request_stop(&mut self) {
        self.stop.request_stop();
        match self.state {
            CaptureState::Idle => self.state = CaptureState::Stopped,
            CaptureState::Running => self.teardown(),
            CaptureState::Stopping | CaptureState::Stopped => {}
        }
    }

    fn teardown(&mut self) {
        self.state = CaptureState::Stopping;
        tracing::info!("Stopping capture");
        let started = Instant::now();

        if let Some(session) = &self.session {
            if let Err(e) = session.interrupt(self.helper.as_deref()) {
                tracing::warn!("Failed to interrupt recording session: {}", e);
            }
        }

        let reader = self.reader.take();
        if let Some(reader) = &reader {
            if !reader.wait_exit(STOP_GRACE) {
                tracing::debug!("Reader still running after {:?}", STOP_GRACE);
            }
            reader.cancel();
        }

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.kill_tree() {
                tracing::warn!("Failed to kill recording process tree: {}", e);
            }
        }

        if let Some(reader) = reader {
            reader.join_or_detach(JOIN_WINDOW);
        }

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.reap() {
                tracing::warn!("Failed to reap recording session: {}", e);
            }
        }

        self.state = CaptureState::Stopped;

        let stats = self.stats.snapshot();
        tracing::info!(
            "Capture stopped after {:?}: {} frames, {} decode errors, {} bytes",
            started.elapsed(),
            stats.frames_decoded,
            stats.decode_errors,
            stats.bytes_read
        );
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_stop_requested()
    }

    /// Copy of the newest decoded frame
    pub fn latest_frame(&self) -> Option<Frame> {
        self.buffer.latest()
    }

    /// Frames decoded since start
    pub fn frame_count(&self) -> u64 {
        self.buffer.frame_count()
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Encoded command line passed to `adb shell`
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Drop for ScreenCapture {
    fn drop(&mut self) {
        self.request_stop();
    }
}

impl std::fmt::Debug for ScreenCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenCapture")
            .field("device", &self.config.device_serial)
            .field("state", &self.state)
            .field("buffer", &self.buffer)
            .finish()
    }
}

fn abort_session(mut session: Session) {
    if let Err(e) = session.kill_tree() {
        tracing::warn!("Failed to kill recording process tree: {}", e);
    }
    let _ = session.reap();
}

/// Sleep for `duration`, waking early when a stop is requested
///
/// Returns `false` if the sleep was cut short.
fn sleep_unless_stopped(duration: Duration, stop: &StopHandle) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.is_stop_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Iterator over the newest frame of a running capture
///
/// Each step yields a copy of whatever frame is newest at that moment, so
/// frames the consumer is too slow for are skipped. Ends once a stop is
/// requested; dropping it stops the capture.
pub struct Frames<'a> {
    capture: &'a mut ScreenCapture,
    idle_sleep: Option<Duration>,
    last_count: Option<u64>,
}

impl Frames<'_> {
    pub fn stop_handle(&self) -> StopHandle {
        self.capture.stop_handle()
    }

    pub fn capture(&self) -> &ScreenCapture {
        &*self.capture
    }

    /// Stop the capture; the next call to `next` returns `None`
    pub fn request_stop(&mut self) {
        self.capture.request_stop();
    }
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            if self.capture.stop.is_stop_requested() || self.capture.state != CaptureState::Running {
                self.capture.request_stop();
                return None;
            }

            let count = self.capture.buffer.frame_count();
            if count == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            // Nothing new since the last yield
            if self.last_count == Some(count) {
                if let Some(idle) = self.idle_sleep {
                    if !sleep_unless_stopped(idle, &self.capture.stop) {
                        continue;
                    }
                }
            }

            if let Some((frame, count)) = self.capture.buffer.latest_with_count() {
                self.last_count = Some(count);
                return Some(frame);
            }
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        self.capture.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig::new("adb", "emulator-5554").with_connect(false)
    }

    #[test]
    fn test_stop_handle_is_one_shot() {
        let handle = StopHandle::default();
        let clone = handle.clone();
        assert!(!clone.is_stop_requested());
        assert!(handle.request_stop());
        assert!(!clone.request_stop());
        assert!(handle.is_stop_requested());
    }

    #[test]
    fn test_new_builds_command() {
        let capture = ScreenCapture::new(config().with_busybox(true)).unwrap();
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(capture.command().starts_with("echo "));
        assert!(capture.command().contains("| busybox base64 -d | sh"));

        let script = crate::command::decode_payload(capture.command()).unwrap();
        assert!(script.contains("time_interval=179\n"));
        assert!(script.contains("size=\"1600x900\"\n"));
        assert!(script.contains("bitrate=\"20M\"\n"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = ScreenCapture::new(CaptureConfig::new("adb", "").with_connect(false)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_helper_never_defaults_to_host_program() {
        let capture = ScreenCapture::new(config()).unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_ne!(capture.helper.as_deref(), Some(exe.as_path()));

        let capture = ScreenCapture::new(config().with_console_helper("tools/adbblitz")).unwrap();
        assert_eq!(capture.helper, Some(PathBuf::from("tools/adbblitz")));
    }

    #[test]
    fn test_stop_from_idle_is_idempotent() {
        let mut capture = ScreenCapture::new(config()).unwrap();
        capture.request_stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        capture.request_stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(capture.is_stop_requested());
    }

    #[test]
    fn test_start_after_stop_is_rejected() {
        let mut capture = ScreenCapture::new(config()).unwrap();
        capture.request_stop();
        let err = capture.start().err().unwrap();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_stop_handle_before_start() {
        let mut capture = ScreenCapture::new(config()).unwrap();
        capture.stop_handle().request_stop();
        assert!(matches!(capture.start().err().unwrap(), Error::InvalidState(_)));
        assert_eq!(capture.state(), CaptureState::Stopped);
    }

    #[test]
    fn test_sleep_unless_stopped() {
        let stop = StopHandle::default();
        let started = Instant::now();
        assert!(sleep_unless_stopped(Duration::from_millis(40), &stop));
        assert!(started.elapsed() >= Duration::from_millis(40));

        stop.request_stop();
        let started = Instant::now();
        assert!(!sleep_unless_stopped(Duration::from_secs(10), &stop));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    mod running {
        use super::*;
        use crate::decode::testing::ByteDecoder;
        use serial_test::serial;
        use std::os::unix::fs::PermissionsExt;

        fn fake_adb(dir: &std::path::Path, body: &str) -> PathBuf {
            let path = dir.join("adb");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        #[serial]
        fn test_frames_arrive_and_drop_stops() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(dir.path(), "printf 'abc'\nexec sleep 30");
            let config = CaptureConfig::new(&adb, "serial")
                .with_connect(false)
                .with_resolution(2, 2);
            let mut capture = ScreenCapture::new(config).unwrap();

            {
                let mut frames = capture.start_with(|| Ok(ByteDecoder::default())).unwrap();
                let frame = frames.next().unwrap();
                assert_eq!(frame.width, 2);
                assert!(b"abc".contains(&frame.data[0]));
            }

            assert_eq!(capture.state(), CaptureState::Stopped);
            assert_eq!(capture.latest_frame().unwrap().data[0], b'c');
            assert_eq!(capture.stats().bytes_read, 3);

            let err = capture.start_with(|| Ok(ByteDecoder::default())).err().unwrap();
            assert!(matches!(err, Error::InvalidState(_)));
        }

        #[test]
        #[serial]
        fn test_stop_handle_ends_iteration() {
            let dir = tempfile::tempdir().unwrap();
            let adb = fake_adb(dir.path(), "exec sleep 30");
            let mut capture = ScreenCapture::new(CaptureConfig::new(&adb, "serial").with_connect(false)).unwrap();

            let mut frames = capture.start_with(|| Ok(ByteDecoder::default())).unwrap();
            let handle = frames.stop_handle();
            let stopper = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                handle.request_stop();
            });

            let started = Instant::now();
            assert!(frames.next().is_none());
            assert!(started.elapsed() < STOP_GRACE + JOIN_WINDOW + Duration::from_secs(2));
            drop(frames);
            stopper.join().unwrap();
            assert_eq!(capture.state(), CaptureState::Stopped);
        }
    }
}
