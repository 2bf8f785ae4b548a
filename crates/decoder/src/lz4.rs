//! Raw LZ4 block decompression.

use rp_common::{DecodeError, ImageSample};
use tracing::trace;

use crate::FrameDecoder;

/// Decoder for frames stored as a single LZ4 block without a size prefix.
#[derive(Debug, Default)]
pub struct Lz4Decoder;

impl Lz4Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for Lz4Decoder {
    fn name(&self) -> &str {
        "lz4"
    }

    fn decode(&mut self, frame: &ImageSample, compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let expected = frame.decoded_len();
        let pixels = lz4_flex::block::decompress(compressed, expected)
            .map_err(|e| DecodeError::Lz4(e.to_string()))?;
        if pixels.len() != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        trace!(
            stream = %frame.stream,
            frame = frame.frame_number,
            compressed = compressed.len(),
            decoded = expected,
            "LZ4 frame decoded"
        );
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_common::{CompressionType, FrameMetadata, PixelFormat, SampleHeader, StreamKind};

    fn frame(width: u32, height: u32) -> ImageSample {
        ImageSample {
            header: SampleHeader {
                capture_time: 0,
                offset: 0,
            },
            stream: StreamKind::Depth,
            width,
            height,
            format: PixelFormat::Z16,
            stride: 0,
            compression: CompressionType::Lz4,
            frame_number: 0,
            index_in_stream: 0,
            timestamp: 0.0,
            system_time: 0,
            metadata: FrameMetadata::new(),
            pixels: None,
        }
    }

    #[test]
    fn decodes_to_exact_frame_size() {
        let frame = frame(16, 8);
        let pixels: Vec<u8> = (0..frame.decoded_len()).map(|i| (i % 13) as u8).collect();
        let compressed = lz4_flex::block::compress(&pixels);

        let decoded = Lz4Decoder::new().decode(&frame, &compressed).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn garbage_input_is_an_error() {
        let frame = frame(16, 8);
        let result = Lz4Decoder::new().decode(&frame, &[0xff, 0xff, 0xff, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn short_output_is_a_size_mismatch() {
        let small = frame(4, 2);
        let pixels = vec![7u8; small.decoded_len()];
        let compressed = lz4_flex::block::compress(&pixels);

        let big = frame(16, 8);
        match Lz4Decoder::new().decode(&big, &compressed) {
            Err(DecodeError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, big.decoded_len());
                assert_eq!(actual, pixels.len());
            }
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }
}
