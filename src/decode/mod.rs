//! Video decoding module
//!
//! The codec is driven through the [`Decoder`] trait: `parse` turns raw
//! elementary stream bytes into decodable units, `decode` turns a unit into
//! zero or more pictures, `convert` resamples a picture into a [`Frame`].
//! [`DecodeAdapter`] chains the three and keeps every failure local to the
//! unit or picture that caused it.

pub mod annexb;
pub mod convert;
pub mod h264;

pub use annexb::AnnexBParser;
pub use h264::FfmpegDecoder;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Frame, FrameFormat, Packet, Resolution, StatsCounters};

/// Trait for video decoders
pub trait Decoder {
    /// Decoded picture in the codec's native representation
    type Picture;

    /// Split stream bytes into decodable units, buffering incomplete ones
    fn parse(&mut self, data: &[u8]) -> Result<Vec<Packet>>;

    /// Emit units still buffered when the stream ends
    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(Vec::new())
    }

    /// Decode one unit
    fn decode(&mut self, packet: &Packet) -> Result<Vec<Self::Picture>>;

    /// Resample a picture to the output size and pixel layout
    fn convert(
        &mut self,
        picture: &Self::Picture,
        target: Resolution,
        format: FrameFormat,
    ) -> Result<Frame>;
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    type Picture = D::Picture;

    fn parse(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        (**self).parse(data)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        (**self).flush()
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<Self::Picture>> {
        (**self).decode(packet)
    }

    fn convert(
        &mut self,
        picture: &Self::Picture,
        target: Resolution,
        format: FrameFormat,
    ) -> Result<Frame> {
        (**self).convert(picture, target, format)
    }
}

/// Drives a [`Decoder`] and never lets an error escape
pub struct DecodeAdapter<D: Decoder> {
    decoder: D,
    target: Resolution,
    format: FrameFormat,
    stats: Arc<StatsCounters>,
    next_pts: i64,
}

impl<D: Decoder> DecodeAdapter<D> {
    pub fn new(decoder: D, target: Resolution, format: FrameFormat) -> Self {
        Self::with_stats(decoder, target, format, Arc::new(StatsCounters::default()))
    }

    pub fn with_stats(
        decoder: D,
        target: Resolution,
        format: FrameFormat,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            decoder,
            target,
            format,
            stats,
            next_pts: 0,
        }
    }

    /// Decode everything `data` completes, in stream order
    ///
    /// Errors are logged and counted; the failing unit or picture is skipped
    /// and decoding continues with the next one.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        match self.decoder.parse(data) {
            Ok(packets) => self.decode_packets(&packets),
            Err(e) => {
                tracing::debug!("Parse error, dropping {} bytes: {}", data.len(), e);
                self.count_error();
                Vec::new()
            }
        }
    }

    /// Decode the units the parser still holds once the stream has ended
    pub fn finish(&mut self) -> Vec<Frame> {
        match self.decoder.flush() {
            Ok(packets) => self.decode_packets(&packets),
            Err(e) => {
                tracing::debug!("Flush failed: {}", e);
                self.count_error();
                Vec::new()
            }
        }
    }

    fn decode_packets(&mut self, packets: &[Packet]) -> Vec<Frame> {
        let mut frames = Vec::new();
        StatsCounters::add(&self.stats.packets_parsed, packets.len() as u64);

        for packet in packets {
            let pictures = match self.decoder.decode(packet) {
                Ok(pictures) => pictures,
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(
                        "Decode error on unit {} ({} bytes): {}",
                        packet.pts,
                        packet.size(),
                        e
                    );
                    self.count_error();
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Decoder failed on unit {}: {}", packet.pts, e);
                    self.count_error();
                    continue;
                }
            };

            for picture in &pictures {
                match self.decoder.convert(picture, self.target, self.format) {
                    Ok(mut frame) => {
                        frame.pts = self.next_pts;
                        self.next_pts += 1;
                        StatsCounters::add(&self.stats.frames_decoded, 1);
                        frames.push(frame);
                    }
                    Err(e) => {
                        tracing::warn!("Frame conversion failed: {}", e);
                        self.count_error();
                    }
                }
            }
        }

        frames
    }

    /// Shared statistics counters
    pub fn stats(&self) -> &Arc<StatsCounters> {
        &self.stats
    }

    /// Access the wrapped decoder
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn count_error(&self) {
        StatsCounters::add(&self.stats.decode_errors, 1);
    }
}
