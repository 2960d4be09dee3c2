//! Picture conversion using FFmpeg swscale

use crate::error::{Error, Result};
use crate::types::{Frame, FrameFormat, Resolution};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context as SwsContext, Flags as SwsFlags};

/// Map FrameFormat to FFmpeg Pixel format
pub fn format_to_pixel(format: FrameFormat) -> Pixel {
    match format {
        FrameFormat::Bgr24 => Pixel::BGR24,
        FrameFormat::Rgb24 => Pixel::RGB24,
        FrameFormat::Bgra => Pixel::BGRA,
        FrameFormat::Rgba => Pixel::RGBA,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    src_pixel: Pixel,
    src_width: u32,
    src_height: u32,
    dst_pixel: Pixel,
    dst: Resolution,
}

/// Resamples decoded pictures into packed frames
///
/// The swscale context is reused until the source or destination geometry
/// changes, e.g. when the device rotates and the stream restarts at a new size.
#[derive(Default)]
pub struct FrameConverter {
    scaler: Option<(ScalerKey, SwsContext)>,
}

impl FrameConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a decoded picture to `target` size in `format`
    pub fn convert(
        &mut self,
        picture: &ffmpeg::frame::Video,
        target: Resolution,
        format: FrameFormat,
    ) -> Result<Frame> {
        if picture.width() == 0 || picture.height() == 0 {
            return Err(Error::Conversion("Picture has no dimensions".into()));
        }

        let key = ScalerKey {
            src_pixel: picture.format(),
            src_width: picture.width(),
            src_height: picture.height(),
            dst_pixel: format_to_pixel(format),
            dst: target,
        };

        if self.scaler.as_ref().map(|(cached, _)| *cached) != Some(key) {
            let scaler = SwsContext::get(
                key.src_pixel,
                key.src_width,
                key.src_height,
                key.dst_pixel,
                target.width,
                target.height,
                SwsFlags::BILINEAR,
            )
            .map_err(|e| Error::Conversion(format!("Failed to create scaler: {}", e)))?;
            tracing::debug!(
                "Scaler configured: {:?} {}x{} -> {} {}",
                key.src_pixel,
                key.src_width,
                key.src_height,
                format,
                target
            );
            self.scaler = Some((key, scaler));
        }
        let (_, scaler) = self
            .scaler
            .as_mut()
            .ok_or_else(|| Error::Internal("Scaler missing".into()))?;

        let mut output = ffmpeg::frame::Video::new(key.dst_pixel, target.width, target.height);
        scaler
            .run(picture, &mut output)
            .map_err(|e| Error::Conversion(format!("Conversion failed: {}", e)))?;

        let data = pack_rows(
            output.data(0),
            output.stride(0),
            target.width as usize * format.bytes_per_pixel(),
            target.height as usize,
        )?;
        Ok(Frame::from_data(data, target.width, target.height, format))
    }
}

/// Copy `height` rows of `row_bytes` out of a plane with line padding
pub fn pack_rows(plane: &[u8], stride: usize, row_bytes: usize, height: usize) -> Result<Vec<u8>> {
    if stride < row_bytes {
        return Err(Error::Conversion(format!(
            "Stride {} shorter than row of {} bytes",
            stride, row_bytes
        )));
    }
    let needed = match height {
        0 => 0,
        h => (h - 1) * stride + row_bytes,
    };
    if plane.len() < needed {
        return Err(Error::Conversion(format!(
            "Plane holds {} bytes, {} needed",
            plane.len(),
            needed
        )));
    }

    let mut output = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
        let start = y * stride;
        output.extend_from_slice(&plane[start..start + row_bytes]);
    }
    Ok(output)
}
