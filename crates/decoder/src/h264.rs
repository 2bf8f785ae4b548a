//! H.264 frames via FFmpeg.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::util::frame::video::Video as VideoFrame;
use rp_common::{CompressionType, DecodeError, ImageSample, PixelFormat};
use tracing::{debug, trace};

use crate::FrameDecoder;

fn backend(e: ffmpeg::Error) -> DecodeError {
    DecodeError::Backend(e.to_string())
}

/// Output pixel layout matching the stream's declared format.
fn target_pixel(format: PixelFormat) -> Option<Pixel> {
    match format {
        PixelFormat::Rgb8 => Some(Pixel::RGB24),
        PixelFormat::Bgr8 => Some(Pixel::BGR24),
        PixelFormat::Rgba8 => Some(Pixel::RGBA),
        PixelFormat::Bgra8 => Some(Pixel::BGRA),
        PixelFormat::Yuyv => Some(Pixel::YUYV422),
        PixelFormat::Y8 => Some(Pixel::GRAY8),
        _ => None,
    }
}

/// One FFmpeg decoder context per stream. Each sample-data chunk carries
/// one access unit.
pub struct H264Decoder {
    decoder: ffmpeg::decoder::Video,
}

impl H264Decoder {
    pub fn new() -> Result<Self, DecodeError> {
        ffmpeg::init().map_err(backend)?;
        let codec = ffmpeg::decoder::find(ffmpeg::codec::Id::H264)
            .ok_or(DecodeError::Unavailable(CompressionType::H264))?;
        debug!(codec = codec.name(), "Opening H.264 decoder");
        let context = ffmpeg::codec::context::Context::new_with_codec(codec);
        let decoder = context.decoder().video().map_err(backend)?;
        Ok(Self { decoder })
    }

    /// Convert a decoded picture to the frame's format and pack its rows.
    fn convert(&self, frame: &ImageSample, decoded: &VideoFrame) -> Result<Vec<u8>, DecodeError> {
        let target = target_pixel(frame.format).ok_or_else(|| {
            DecodeError::Backend(format!("no H.264 output for {:?}", frame.format))
        })?;

        let mut scaler = ScalingContext::get(
            decoded.format(),
            decoded.width(),
            decoded.height(),
            target,
            frame.width,
            frame.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(backend)?;
        let mut output = VideoFrame::empty();
        scaler.run(decoded, &mut output).map_err(backend)?;

        pack_rows(
            output.data(0),
            output.stride(0),
            frame.row_stride() as usize,
            frame.height as usize,
        )
    }
}

/// Copy `height` rows of `row` bytes out of a plane whose rows are
/// `src_stride` bytes apart. Rows missing from `src` stay zeroed.
fn pack_rows(
    src: &[u8],
    src_stride: usize,
    row: usize,
    height: usize,
) -> Result<Vec<u8>, DecodeError> {
    if row == 0 {
        return Err(DecodeError::Backend(
            "frame declares a zero-byte row".to_string(),
        ));
    }
    let copy = row.min(src_stride);

    let mut data = vec![0u8; row * height];
    for (y, dst) in data.chunks_exact_mut(row).enumerate() {
        let start = y * src_stride;
        let Some(src_row) = src.get(start..start + copy) else {
            break;
        };
        dst[..copy].copy_from_slice(src_row);
    }
    Ok(data)
}

impl FrameDecoder for H264Decoder {
    fn name(&self) -> &str {
        "h264"
    }

    fn decode(&mut self, frame: &ImageSample, compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let packet = ffmpeg::Packet::copy(compressed);
        self.decoder.send_packet(&packet).map_err(backend)?;

        let mut decoded = VideoFrame::empty();
        self.decoder.receive_frame(&mut decoded).map_err(backend)?;
        trace!(
            stream = %frame.stream,
            frame = frame.frame_number,
            width = decoded.width(),
            height = decoded.height(),
            "H.264 frame decoded"
        );
        self.convert(frame, &decoded)
    }

    fn reset(&mut self) {
        self.decoder.flush();
    }
}
