//! H.264 decoding via FFmpeg
//!
//! Pairs the [`AnnexBParser`] with libavcodec's H.264 decoder. The decoder
//! keeps its state across `screenrecord` segment restarts; the SPS/PPS each
//! new segment starts with simply reconfigures it.

use crate::error::{Error, Result};
use crate::types::{Frame, FrameFormat, Packet, Resolution};

use super::annexb::AnnexBParser;
use super::convert::FrameConverter;
use super::Decoder;

use ffmpeg_next as ffmpeg;

/// H.264 elementary stream decoder backed by FFmpeg
pub struct FfmpegDecoder {
    parser: AnnexBParser,
    decoder: ffmpeg::decoder::Video,
    converter: FrameConverter,
}

impl FfmpegDecoder {
    /// Create a new decoder
    pub fn new() -> Result<Self> {
        // Initialize FFmpeg
        ffmpeg::init().map_err(|e| Error::FFmpeg(e.to_string()))?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let codec = ffmpeg::decoder::find(ffmpeg::codec::Id::H264).ok_or_else(|| {
            Error::CodecNotSupported("H.264 decoder not found. Install FFmpeg with h264 support.".into())
        })?;

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        // Output pictures as soon as they are complete instead of reordering
        context.set_flags(ffmpeg::codec::Flags::LOW_DELAY);

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| Error::FFmpeg(format!("Failed to open H.264 decoder: {}", e)))?;

        tracing::info!("H.264 decoder initialized ({})", codec.name());

        Ok(Self {
            parser: AnnexBParser::new(),
            decoder,
            converter: FrameConverter::new(),
        })
    }
}

impl Decoder for FfmpegDecoder {
    type Picture = ffmpeg::frame::Video;

    fn parse(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        Ok(self.parser.parse(data))
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(self.parser.flush())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<ffmpeg::frame::Video>> {
        let av_packet = ffmpeg::Packet::copy(&packet.data);
        self.decoder
            .send_packet(&av_packet)
            .map_err(|e| Error::Decode(format!("send_packet: {}", e)))?;

        let mut pictures = Vec::new();
        loop {
            let mut picture = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut picture) {
                Ok(()) => pictures.push(picture),
                // EAGAIN: needs more input, EOF: drained
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(Error::Decode(format!("receive_frame: {}", e))),
            }
        }
        Ok(pictures)
    }

    fn convert(
        &mut self,
        picture: &ffmpeg::frame::Video,
        target: Resolution,
        format: FrameFormat,
    ) -> Result<Frame> {
        self.converter.convert(picture, target, format)
    }
}
