//! Common types used throughout adbblitz

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    // Common resolutions
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const HD_PLUS: Self = Self::new(1600, 900);
    pub const FHD_1080P: Self = Self::new(1920, 1080);

    /// Calculate total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::HD_PLUS
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    /// Parse `WIDTHxHEIGHT`, the same notation `screenrecord --size` takes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::Config(format!("Invalid resolution '{}', expected WxH", s)))?;
        let width = w
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("Invalid width '{}': {}", w, e)))?;
        let height = h
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("Invalid height '{}': {}", h, e)))?;
        Ok(Self::new(width, height))
    }
}

/// Packed pixel layout of decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// BGR24 - 24-bit BGR (OpenCV order)
    #[default]
    Bgr24,
    /// RGB24 - 24-bit RGB
    Rgb24,
    /// BGRA - 32-bit BGRA
    Bgra,
    /// RGBA - 32-bit RGBA
    Rgba,
}

impl FrameFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Bgr24 | FrameFormat::Rgb24 => 3,
            FrameFormat::Bgra | FrameFormat::Rgba => 4,
        }
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameFormat::Bgr24 => "bgr24",
            FrameFormat::Rgb24 => "rgb24",
            FrameFormat::Bgra => "bgra",
            FrameFormat::Rgba => "rgba",
        };
        f.write_str(name)
    }
}

impl FromStr for FrameFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bgr24" | "bgr" => Ok(FrameFormat::Bgr24),
            "rgb24" | "rgb" => Ok(FrameFormat::Rgb24),
            "bgra" => Ok(FrameFormat::Bgra),
            "rgba" => Ok(FrameFormat::Rgba),
            other => Err(Error::Config(format!("Unknown pixel format: {}", other))),
        }
    }
}

/// A decoded video frame
///
/// Rows are tightly packed: `stride == width * format.bytes_per_pixel()`.
/// Cloning yields an independent copy of the pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Row stride in bytes
    pub stride: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Index of this frame in decode order
    pub pts: i64,
}

impl Frame {
    /// Create a new zeroed frame
    pub fn new(width: u32, height: u32, format: FrameFormat) -> Self {
        let stride = width * format.bytes_per_pixel() as u32;
        Self {
            data: vec![0u8; stride as usize * height as usize],
            width,
            height,
            stride,
            format,
            pts: 0,
        }
    }

    /// Create a frame from existing data
    pub fn from_data(data: Vec<u8>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            data,
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            pts: 0,
        }
    }

    /// Get resolution
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Calculate frame size in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Pixel data as packed RGB, dropping alpha
    pub fn to_rgb24(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(bpp) {
            match self.format {
                FrameFormat::Rgb24 | FrameFormat::Rgba => rgb.extend_from_slice(&px[..3]),
                FrameFormat::Bgr24 | FrameFormat::Bgra => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
            }
        }
        rgb
    }
}

/// One decodable unit of the elementary stream (an H.264 access unit in Annex B form)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Encoded data, start codes included
    pub data: Vec<u8>,
    /// Sequence number assigned by the parser
    pub pts: i64,
    /// Contains an IDR slice
    pub is_keyframe: bool,
}

impl Packet {
    pub fn new(data: Vec<u8>, pts: i64, is_keyframe: bool) -> Self {
        Self {
            data,
            pts,
            is_keyframe,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Statistics snapshot for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes read from the recording process
    pub bytes_read: u64,
    /// Read calls that returned data
    pub chunks_read: u64,
    /// Access units produced by the parser
    pub packets_parsed: u64,
    /// Frames converted and stored
    pub frames_decoded: u64,
    /// Units or pictures skipped because of an error
    pub decode_errors: u64,
}

/// Live counters shared between the reader thread and observers
#[derive(Debug, Default)]
pub struct StatsCounters {
    pub bytes_read: AtomicU64,
    pub chunks_read: AtomicU64,
    pub packets_parsed: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for display
    pub fn snapshot(&self) -> Stats {
        Stats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            packets_parsed: self.packets_parsed.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}
