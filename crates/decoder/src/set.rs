//! Per-stream decoder instances and the factories that create them.

use std::collections::HashMap;
use std::sync::Arc;

use rp_common::{CompressionType, DecodeError, ImageSample, StreamKind};
use tracing::{debug, info};

use crate::lz4::Lz4Decoder;
use crate::FrameDecoder;

/// Creates a fresh decoder for one stream.
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>, DecodeError> + Send + Sync>;

struct StreamDecoder {
    compression: CompressionType,
    decoder: Box<dyn FrameDecoder>,
}

/// Maps each stream to its own decoder, created on first use from the
/// factory registered for the frame's compression.
pub struct DecoderSet {
    factories: HashMap<CompressionType, DecoderFactory>,
    active: HashMap<StreamKind, StreamDecoder>,
}

impl DecoderSet {
    /// A set with the built-in decoders registered.
    pub fn new() -> Self {
        let mut set = Self::empty();
        set.register(CompressionType::Lz4, || Ok(Box::new(Lz4Decoder::new())));
        #[cfg(feature = "ffmpeg")]
        set.register(CompressionType::H264, || {
            Ok(Box::new(crate::h264::H264Decoder::new()?))
        });
        set
    }

    /// A set with no decoders; only uncompressed frames can be materialized.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            active: HashMap::new(),
        }
    }

    /// Install or replace the factory for `compression`. Streams already
    /// holding a decoder of that kind keep it until the next reset.
    pub fn register<F>(&mut self, compression: CompressionType, factory: F)
    where
        F: Fn() -> Result<Box<dyn FrameDecoder>, DecodeError> + Send + Sync + 'static,
    {
        info!(?compression, "Registered frame decoder");
        self.factories.insert(compression, Arc::new(factory));
    }

    pub fn supports(&self, compression: CompressionType) -> bool {
        compression == CompressionType::None || self.factories.contains_key(&compression)
    }

    /// Turn a recorded payload into pixels.
    ///
    /// Uncompressed payloads are returned verbatim.
    ///
    /// # Panics
    ///
    /// Panics on [`CompressionType::Unsupported`]: the file declares a
    /// compression this reader cannot interpret at all.
    pub fn materialize(
        &mut self,
        frame: &ImageSample,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, DecodeError> {
        match frame.compression {
            CompressionType::None => Ok(payload),
            CompressionType::Unsupported(raw) => panic!(
                "frame {} of {} stream uses unsupported compression {raw}",
                frame.frame_number, frame.stream
            ),
            compression => self.decoder_for(frame.stream, compression)?.decode(frame, &payload),
        }
    }

    fn decoder_for(
        &mut self,
        stream: StreamKind,
        compression: CompressionType,
    ) -> Result<&mut dyn FrameDecoder, DecodeError> {
        let stale = self
            .active
            .get(&stream)
            .is_some_and(|d| d.compression != compression);
        if stale {
            self.active.remove(&stream);
        }

        if !self.active.contains_key(&stream) {
            let factory = self
                .factories
                .get(&compression)
                .ok_or(DecodeError::Unavailable(compression))?;
            let decoder = factory()?;
            debug!(%stream, decoder = decoder.name(), "Created stream decoder");
            self.active.insert(
                stream,
                StreamDecoder {
                    compression,
                    decoder,
                },
            );
        }

        match self.active.get_mut(&stream) {
            Some(entry) => Ok(entry.decoder.as_mut()),
            None => Err(DecodeError::Unavailable(compression)),
        }
    }

    /// Drop every per-stream decoder. New ones are created on the next frame.
    pub fn reset(&mut self) {
        for entry in self.active.values_mut() {
            entry.decoder.reset();
        }
        self.active.clear();
    }

    /// Number of streams currently holding a decoder.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSet")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rp_common::{FrameMetadata, PixelFormat, SampleHeader};

    fn frame(stream: StreamKind, compression: CompressionType) -> ImageSample {
        ImageSample {
            header: SampleHeader {
                capture_time: 0,
                offset: 0,
            },
            stream,
            width: 4,
            height: 2,
            format: PixelFormat::Y8,
            stride: 0,
            compression,
            frame_number: 1,
            index_in_stream: 0,
            timestamp: 0.0,
            system_time: 0,
            metadata: FrameMetadata::new(),
            pixels: None,
        }
    }

    /// Inverts every byte.
    struct Invert;

    impl FrameDecoder for Invert {
        fn name(&self) -> &str {
            "invert"
        }

        fn decode(&mut self, _: &ImageSample, compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
            Ok(compressed.iter().map(|b| !b).collect())
        }
    }

    #[test]
    fn uncompressed_payload_passes_through() {
        let mut set = DecoderSet::new();
        let payload = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let out = set
            .materialize(&frame(StreamKind::Depth, CompressionType::None), payload.clone())
            .unwrap();
        assert_eq!(out, payload);
        assert_eq!(set.active_count(), 0);
    }

    #[test]
    fn lz4_is_built_in() {
        let mut set = DecoderSet::new();
        let pixels = vec![9u8; 8];
        let out = set
            .materialize(
                &frame(StreamKind::Color, CompressionType::Lz4),
                lz4_flex::block::compress(&pixels),
            )
            .unwrap();
        assert_eq!(out, pixels);
        assert!(set.supports(CompressionType::Lz4));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn h264_without_backend_is_unavailable() {
        let mut set = DecoderSet::new();
        assert!(!set.supports(CompressionType::H264));
        let err = set
            .materialize(&frame(StreamKind::Color, CompressionType::H264), vec![0; 4])
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unavailable(CompressionType::H264)));
    }

    #[test]
    fn one_decoder_per_stream_until_reset() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut set = DecoderSet::empty();
        let counter = created.clone();
        set.register(CompressionType::H264, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Invert))
        });

        for _ in 0..3 {
            set.materialize(&frame(StreamKind::Depth, CompressionType::H264), vec![0])
                .unwrap();
            set.materialize(&frame(StreamKind::Color, CompressionType::H264), vec![0])
                .unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(set.active_count(), 2);

        set.reset();
        assert_eq!(set.active_count(), 0);
        let out = set
            .materialize(&frame(StreamKind::Depth, CompressionType::H264), vec![0x0f])
            .unwrap();
        assert_eq!(out, vec![0xf0]);
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[should_panic(expected = "unsupported compression 7")]
    fn unsupported_compression_panics() {
        let mut set = DecoderSet::new();
        let _ = set.materialize(
            &frame(StreamKind::Depth, CompressionType::Unsupported(7)),
            vec![0; 8],
        );
    }
}
