//! In-memory capture file writer for tests.
//!
//! Produces files in the same chunk layout the recorder writes, so every
//! reader path can be exercised without checked-in binaries.

use std::io;
use std::path::Path;

use rp_common::{
    CaptureMode, CompressionType, DeviceInfo, FileFormat, FileHeader, MotionKind, PixelFormat,
    SampleKind, StreamInfo, StreamKind, SwInfo,
};

use crate::format::{chunk, record};

/// One image sample to be written by [`CaptureBuilder::image`].
#[derive(Clone, Debug)]
pub struct ImageRecord {
    pub stream: StreamKind,
    pub frame_number: u64,
    pub capture_time: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: u32,
    pub compression: CompressionType,
    pub timestamp: f64,
    pub metadata: Vec<(u32, f64)>,
    pixels: Vec<u8>,
    with_data: bool,
}

impl ImageRecord {
    /// A tightly packed frame filled with a pattern derived from the stream
    /// and frame number.
    pub fn new(
        stream: StreamKind,
        frame_number: u64,
        capture_time: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        let len = format.row_bytes(width) as usize * height as usize;
        let seed = frame_number.wrapping_mul(31).wrapping_add(stream as u64 * 101);
        let pixels = (0..len)
            .map(|i| (seed.wrapping_add(i as u64 * 7) & 0xff) as u8)
            .collect();
        Self {
            stream,
            frame_number,
            capture_time,
            width,
            height,
            format,
            stride: 0,
            compression: CompressionType::None,
            timestamp: capture_time as f64 / 1_000.0,
            metadata: Vec::new(),
            pixels,
            with_data: true,
        }
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    /// Replace the decoded pixel bytes.
    pub fn with_pixels(mut self, pixels: Vec<u8>) -> Self {
        self.pixels = pixels;
        self
    }

    pub fn with_metadata(mut self, id: u32, value: f64) -> Self {
        self.metadata.push((id, value));
        self
    }

    /// Write the sample without a sample-data chunk.
    pub fn without_data(mut self) -> Self {
        self.with_data = false;
        self
    }

    /// Decoded pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes as stored in the sample-data chunk.
    pub fn encoded(&self) -> Vec<u8> {
        match self.compression {
            CompressionType::Lz4 => lz4_flex::block::compress(&self.pixels),
            _ => self.pixels.clone(),
        }
    }
}

/// Builder for a complete capture file.
///
/// Header records can be set in any order. Samples and raw chunks are
/// appended to the frame region in call order.
#[derive(Clone, Debug)]
pub struct CaptureBuilder {
    format: FileFormat,
    magic: [u8; 4],
    capture_mode: CaptureMode,
    streams: Vec<StreamInfo>,
    device: DeviceInfo,
    sw_info: SwInfo,
    properties: Vec<(u32, f64)>,
    extra_headers: Vec<(u32, Vec<u8>)>,
    frames: Vec<u8>,
}

impl CaptureBuilder {
    fn new(format: FileFormat, magic: [u8; 4]) -> Self {
        Self {
            format,
            magic,
            capture_mode: CaptureMode::Unknown,
            streams: Vec::new(),
            device: DeviceInfo::default(),
            sw_info: SwInfo::default(),
            properties: Vec::new(),
            extra_headers: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// `RSCF` file with a pitch table in front of every payload.
    pub fn sdk() -> Self {
        Self::new(FileFormat::RsSdk, FileFormat::SDK_MAGIC)
    }

    /// `RSL2` file.
    pub fn linux() -> Self {
        Self::new(FileFormat::Linux, FileFormat::LINUX_V2_MAGIC)
    }

    pub fn stream(&mut self, info: StreamInfo) -> &mut Self {
        self.streams.push(info);
        self
    }

    pub fn capture_mode(&mut self, mode: CaptureMode) -> &mut Self {
        self.capture_mode = mode;
        self
    }

    pub fn device(&mut self, device: DeviceInfo) -> &mut Self {
        self.device = device;
        self
    }

    pub fn sw_info(&mut self, sw_info: SwInfo) -> &mut Self {
        self.sw_info = sw_info;
        self
    }

    pub fn property(&mut self, option: u32, value: f64) -> &mut Self {
        self.properties.push((option, value));
        self
    }

    /// Extra chunk in the header region.
    pub fn header_chunk(&mut self, id: u32, body: Vec<u8>) -> &mut Self {
        self.extra_headers.push((id, body));
        self
    }

    /// Raw chunk in the frame region.
    pub fn chunk(&mut self, id: u32, body: Vec<u8>) -> &mut Self {
        push_chunk(&mut self.frames, id, &body);
        self
    }

    pub fn image(&mut self, image: ImageRecord) -> &mut Self {
        let mut header = Vec::with_capacity(record::IMAGE_HEADER as usize);
        put_u32(&mut header, image.stream as u32);
        put_u32(&mut header, image.width);
        put_u32(&mut header, image.height);
        put_u32(&mut header, image.format as u32);
        put_u32(&mut header, image.stride);
        put_u32(&mut header, image.compression.to_raw());
        put_u64(&mut header, image.frame_number);
        header.extend_from_slice(&image.timestamp.to_le_bytes());
        put_u64(&mut header, image.capture_time);
        self.raw_sample(SampleKind::Image as u32, image.capture_time, header);

        if !image.metadata.is_empty() {
            let mut body = Vec::new();
            for (id, value) in &image.metadata {
                put_u32(&mut body, *id);
                body.extend_from_slice(&value.to_le_bytes());
            }
            push_chunk(&mut self.frames, chunk::IMAGE_METADATA, &body);
        }

        if image.with_data {
            let mut body = Vec::new();
            if self.format.pitch_table_len() > 0 {
                let stride = if image.stride > 0 {
                    image.stride
                } else {
                    image.format.row_bytes(image.width)
                };
                put_u32(&mut body, stride);
                body.resize(self.format.pitch_table_len() as usize, 0);
            }
            body.extend_from_slice(&image.encoded());
            push_chunk(&mut self.frames, chunk::SAMPLE_DATA, &body);
        }
        self
    }

    pub fn motion(
        &mut self,
        motion: MotionKind,
        frame_number: u32,
        capture_time: u64,
        data: [f32; 3],
    ) -> &mut Self {
        let mut header = Vec::with_capacity(record::MOTION_HEADER as usize);
        put_u32(&mut header, motion.to_raw());
        put_u32(&mut header, frame_number);
        header.extend_from_slice(&(capture_time as f64 / 1_000.0).to_le_bytes());
        for axis in data {
            header.extend_from_slice(&axis.to_le_bytes());
        }
        self.raw_sample(SampleKind::Motion as u32, capture_time, header)
    }

    pub fn time(&mut self, source: u32, frame_number: u32, capture_time: u64) -> &mut Self {
        let mut header = Vec::with_capacity(record::TIME_HEADER as usize);
        put_u32(&mut header, source);
        put_u32(&mut header, frame_number);
        header.extend_from_slice(&(capture_time as f64 / 1_000.0).to_le_bytes());
        self.raw_sample(SampleKind::Time as u32, capture_time, header)
    }

    pub fn debug_event(&mut self, event_id: u32, capture_time: u64, message: &str) -> &mut Self {
        let mut header = Vec::new();
        put_u32(&mut header, event_id);
        header.extend_from_slice(message.as_bytes());
        self.raw_sample(SampleKind::DebugEvent as u32, capture_time, header)
    }

    /// Sample-info chunk with an arbitrary kind tag followed by a
    /// sample-header chunk holding `header`.
    pub fn raw_sample(&mut self, kind: u32, capture_time: u64, header: Vec<u8>) -> &mut Self {
        let mut info = Vec::with_capacity(record::SAMPLE_INFO as usize);
        put_u32(&mut info, kind);
        put_u32(&mut info, 0);
        put_u64(&mut info, capture_time);
        push_chunk(&mut self.frames, chunk::SAMPLE_INFO, &info);
        push_chunk(&mut self.frames, chunk::SAMPLE_HEADER, &header);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut headers = Vec::new();

        let mut device = Vec::new();
        for field in [&self.device.name, &self.device.serial, &self.device.firmware] {
            device.extend_from_slice(field.as_bytes());
            device.push(0);
        }
        push_chunk(&mut headers, chunk::DEVICE_INFO, &device);

        let mut streams = Vec::new();
        for info in &self.streams {
            put_u32(&mut streams, info.stream as u32);
            put_u32(&mut streams, info.width);
            put_u32(&mut streams, info.height);
            put_u32(&mut streams, info.format as u32);
            put_u32(&mut streams, info.framerate);
            put_u32(&mut streams, info.frame_count);
            put_u32(&mut streams, info.compression.to_raw());
        }
        push_chunk(&mut headers, chunk::STREAM_INFO, &streams);

        if !self.properties.is_empty() {
            let mut body = Vec::new();
            for (option, value) in &self.properties {
                put_u32(&mut body, *option);
                body.extend_from_slice(&value.to_le_bytes());
            }
            push_chunk(&mut headers, chunk::PROPERTIES, &body);
        }

        let mut sw = Vec::new();
        for v in [self.sw_info.sdk, self.sw_info.driver] {
            for part in [v.major, v.minor, v.patch, v.build] {
                put_u32(&mut sw, part);
            }
        }
        push_chunk(&mut headers, chunk::SW_INFO, &sw);

        for (id, body) in &self.extra_headers {
            push_chunk(&mut headers, *id, body);
        }

        let first_frame_offset = FileHeader::SIZE as usize + headers.len();
        let file_size = first_frame_offset + self.frames.len();

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(&self.magic);
        put_u32(&mut out, 1);
        put_u32(&mut out, first_frame_offset as u32);
        put_u32(&mut out, self.streams.len() as u32);
        put_u64(&mut out, file_size as u64);
        put_u32(&mut out, self.capture_mode.to_raw());
        put_u32(&mut out, 0);
        out.extend_from_slice(&headers);
        out.extend_from_slice(&self.frames);
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.build())
    }

    pub fn write_temp(&self) -> io::Result<tempfile::NamedTempFile> {
        let file = tempfile::NamedTempFile::new()?;
        self.write_to(file.path())?;
        Ok(file)
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_chunk(buf: &mut Vec<u8>, id: u32, body: &[u8]) {
    put_u32(buf, id);
    put_u32(buf, body.len() as u32);
    buf.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_points_past_header_region() {
        let mut builder = CaptureBuilder::linux();
        builder.image(ImageRecord::new(StreamKind::Depth, 0, 0, 2, 2, PixelFormat::Z16));
        let bytes = builder.build();
        assert_eq!(&bytes[0..4], b"RSL2");
        let first = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let size = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
        assert_eq!(size, bytes.len());
        let id = u32::from_le_bytes(bytes[first..first + 4].try_into().unwrap());
        assert_eq!(id, chunk::SAMPLE_INFO);
    }

    #[test]
    fn lz4_records_store_compressed_bytes() {
        let record = ImageRecord::new(StreamKind::Color, 1, 0, 64, 4, PixelFormat::Rgb8)
            .with_compression(CompressionType::Lz4);
        let encoded = record.encoded();
        assert_ne!(encoded, record.pixels());
        let decoded = lz4_flex::block::decompress(&encoded, record.pixels().len()).unwrap();
        assert_eq!(decoded, record.pixels());
    }
}
