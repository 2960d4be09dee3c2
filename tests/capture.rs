//! End-to-end capture tests against a fake `adb` script
#![cfg(unix)]

use adbblitz::capture::{CaptureState, JOIN_WINDOW, STOP_GRACE};
use adbblitz::types::{Frame, FrameFormat, Packet, Resolution};
use adbblitz::{CaptureConfig, Decoder, Error, Result, ScreenCapture};
use serial_test::serial;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Every byte is a frame filled with that byte; `0xEE` is a corrupt unit
struct TagDecoder;

impl Decoder for TagDecoder {
    type Picture = u8;

    fn parse(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        Ok(data
            .iter()
            .enumerate()
            .map(|(i, &b)| Packet::new(vec![b], i as i64, false))
            .collect())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        match packet.data[0] {
            0xEE => Err(Error::Decode("corrupt unit".into())),
            b => Ok(vec![b]),
        }
    }

    fn convert(&mut self, picture: &u8, target: Resolution, format: FrameFormat) -> Result<Frame> {
        let mut frame = Frame::new(target.width, target.height, format);
        frame.data.fill(*picture);
        Ok(frame)
    }
}

fn fake_adb(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("adb");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(adb: &Path) -> CaptureConfig {
    CaptureConfig::new(adb, "fake-device")
        .with_connect(false)
        .with_resolution(4, 4)
        .with_buffer_capacity(3)
}

#[test]
#[serial]
fn test_frames_reach_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let adb = fake_adb(dir.path(), "printf '\\001\\356\\002'\nexec sleep 30");
    let mut capture = ScreenCapture::new(config(&adb)).unwrap();

    {
        let mut frames = capture.start_with(|| Ok(TagDecoder)).unwrap();
        let frame = frames.next().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(4, 4));
        assert_eq!(frame.format, FrameFormat::Bgr24);
        assert!(frame.data[0] == 1 || frame.data[0] == 2);
    }

    assert_eq!(capture.state(), CaptureState::Stopped);
    let stats = capture.stats();
    assert_eq!(stats.bytes_read, 3);
    assert_eq!(stats.frames_decoded, 2);
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(capture.latest_frame().unwrap().data[0], 2);
    assert_eq!(capture.frame_count(), 2);
}

#[test]
#[serial]
fn test_immediate_stop_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let adb = fake_adb(dir.path(), "exec sleep 30");
    let mut capture = ScreenCapture::new(config(&adb)).unwrap();

    let mut frames = capture.start_with(|| Ok(TagDecoder)).unwrap();
    frames.stop_handle().request_stop();

    let started = Instant::now();
    assert!(frames.next().is_none());
    assert!(frames.next().is_none());
    assert!(started.elapsed() < STOP_GRACE + JOIN_WINDOW + Duration::from_secs(1));
    drop(frames);

    assert_eq!(capture.state(), CaptureState::Stopped);
    assert_eq!(capture.frame_count(), 0);
}

#[test]
#[serial]
fn test_stop_escalates_when_interrupt_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let adb = fake_adb(dir.path(), "trap '' INT\nsleep 30\nsleep 30");
    let mut capture = ScreenCapture::new(config(&adb)).unwrap();

    let frames = capture.start_with(|| Ok(TagDecoder)).unwrap();
    let started = Instant::now();
    drop(frames);

    let elapsed = started.elapsed();
    assert_eq!(capture.state(), CaptureState::Stopped);
    assert!(elapsed >= STOP_GRACE - Duration::from_millis(50));
    assert!(elapsed < STOP_GRACE + JOIN_WINDOW + Duration::from_secs(1));
}

#[test]
#[serial]
fn test_idle_sleep_between_repeated_frames() {
    let dir = tempfile::tempdir().unwrap();
    let adb = fake_adb(dir.path(), "printf '\\007'\nexec sleep 30");
    let idle = Duration::from_millis(100);
    let mut capture = ScreenCapture::new(config(&adb).with_idle_sleep(idle)).unwrap();

    let mut frames = capture.start_with(|| Ok(TagDecoder)).unwrap();
    assert_eq!(frames.next().unwrap().data[0], 7);

    // No new frames arrive after the first, so every further yield waits
    let started = Instant::now();
    assert_eq!(frames.next().unwrap().data[0], 7);
    assert_eq!(frames.next().unwrap().data[0], 7);
    assert!(started.elapsed() >= idle * 2 - Duration::from_millis(10));
}

#[test]
#[serial]
fn test_repeated_stop_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let adb = fake_adb(dir.path(), "exec sleep 30");
    let mut capture = ScreenCapture::new(config(&adb)).unwrap();

    let mut frames = capture.start_with(|| Ok(TagDecoder)).unwrap();
    frames.request_stop();
    frames.request_stop();
    drop(frames);

    capture.request_stop();
    assert_eq!(capture.state(), CaptureState::Stopped);
    assert!(matches!(
        capture.start_with(|| Ok(TagDecoder)).err(),
        Some(Error::InvalidState(_))
    ));
}

#[test]
#[serial]
fn test_connect_runs_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("calls.log");
    let adb = fake_adb(
        dir.path(),
        &format!("echo \"$@\" >> '{}'\necho \"connected to $2\"", log.display()),
    );

    let capture = ScreenCapture::new(config(&adb).with_connect(true)).unwrap();
    assert_eq!(capture.state(), CaptureState::Idle);

    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(calls.trim(), "connect fake-device");
}

#[test]
#[serial]
fn test_missing_adb_fails_on_start() {
    let mut capture = ScreenCapture::new(config(Path::new("/nonexistent/adb"))).unwrap();
    let err = capture.start_with(|| Ok(TagDecoder)).err().unwrap();
    assert!(matches!(err, Error::Spawn { .. }));
    assert_eq!(capture.state(), CaptureState::Idle);
}
