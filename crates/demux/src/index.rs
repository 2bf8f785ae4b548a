//! Incremental sample indexer.
//!
//! The indexer walks the chunk sequence from `first_frame_offset` and turns
//! each `sample_info` + `sample_header` pair into a catalog entry. Payload
//! chunks (metadata, pixel data) are skipped by their declared size and
//! never read, so indexing cost is independent of frame size.

use std::io::{Cursor, ErrorKind};

use byteorder::{LittleEndian, ReadBytesExt};
use rp_common::{
    CompressionType, DebugEventSample, DemuxError, FrameMetadata, ImageSample, MotionKind,
    MotionSample, PixelFormat, Sample, SampleHeader, SampleKind, StreamKind, TimeSample,
};
use tracing::{debug, trace, warn};

use crate::format::{chunk, record};
use crate::reader::BinaryReader;

/// Samples produced by one call to [`Indexer::index_next`].
#[derive(Debug, Default)]
pub struct IndexBatch {
    pub samples: Vec<Sample>,
    /// Set once the end of the file has been reached.
    pub complete: bool,
}

/// A sample-info chunk waiting for its sample header.
#[derive(Debug, Clone, Copy)]
struct PendingInfo {
    kind: SampleKind,
    capture_time: u64,
    at: u64,
}

/// Forward scanner over the frame region of a capture file.
#[derive(Debug)]
pub struct Indexer {
    reader: BinaryReader,
    first_frame_offset: u64,
    pending: Option<PendingInfo>,
    complete: bool,
    indexed: u64,
}

impl Indexer {
    /// Takes a dedicated reader and positions it at the first frame.
    pub fn new(mut reader: BinaryReader, first_frame_offset: u64) -> Result<Self, DemuxError> {
        reader.seek_to(first_frame_offset)?;
        Ok(Self {
            reader,
            first_frame_offset,
            pending: None,
            complete: false,
            indexed: 0,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of samples produced since open or the last rewind.
    pub fn indexed(&self) -> u64 {
        self.indexed
    }

    /// Restart scanning from the first frame.
    pub fn rewind(&mut self) -> Result<(), DemuxError> {
        self.reader.seek_to(self.first_frame_offset)?;
        self.pending = None;
        self.complete = false;
        self.indexed = 0;
        debug!(offset = self.first_frame_offset, "Indexer rewound");
        Ok(())
    }

    /// Index up to `max` further samples.
    ///
    /// Calling this after completion returns an empty, complete batch. A
    /// file that ends mid-record is treated as complete at the last whole
    /// record. A sample kind outside the known set is returned as
    /// [`DemuxError::UnknownSampleKind`].
    pub fn index_next(&mut self, max: usize) -> Result<IndexBatch, DemuxError> {
        let mut batch = IndexBatch::default();
        if self.complete {
            batch.complete = true;
            return Ok(batch);
        }

        while batch.samples.len() < max {
            match self.next_sample() {
                Ok(Some(sample)) => batch.samples.push(sample),
                Ok(None) => {
                    self.complete = true;
                    break;
                }
                Err(DemuxError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(
                        at = self.reader.position(),
                        "Capture file ends mid-record, indexing stops here"
                    );
                    self.complete = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.indexed += batch.samples.len() as u64;
        batch.complete = self.complete;
        trace!(
            count = batch.samples.len(),
            total = self.indexed,
            complete = self.complete,
            "Indexed batch"
        );
        if self.complete {
            debug!(
                path = %self.reader.path().display(),
                total = self.indexed,
                "Indexing complete"
            );
        }
        Ok(batch)
    }

    /// Scan chunks until one whole sample header has been read.
    fn next_sample(&mut self) -> Result<Option<Sample>, DemuxError> {
        loop {
            let at = self.reader.position();
            let Some(chunk) = self.reader.read_chunk_header()? else {
                return Ok(None);
            };
            let size = u64::from(chunk.size);

            match chunk.id {
                chunk::SAMPLE_INFO => {
                    if size < record::SAMPLE_INFO {
                        warn!(at, size, "Short sample info chunk, skipping");
                        self.reader.skip(size)?;
                        continue;
                    }
                    let raw_kind = self.reader.read_u32()?;
                    let _reserved = self.reader.read_u32()?;
                    let capture_time = self.reader.read_u64()?;
                    self.reader.skip(size - record::SAMPLE_INFO)?;

                    let kind = SampleKind::from_raw(raw_kind).ok_or(
                        DemuxError::UnknownSampleKind {
                            kind: raw_kind,
                            offset: at,
                        },
                    )?;
                    if let Some(orphan) = self.pending.replace(PendingInfo {
                        kind,
                        capture_time,
                        at,
                    }) {
                        warn!(at = orphan.at, "Sample info without a header, dropped");
                    }
                }
                chunk::SAMPLE_HEADER => {
                    let body = self.reader.read_bytes(size)?;
                    let Some(info) = self.pending.take() else {
                        warn!(at, "Sample header without sample info, skipping");
                        continue;
                    };
                    let header = SampleHeader {
                        capture_time: info.capture_time,
                        offset: self.reader.position(),
                    };
                    match parse_sample(info.kind, header, &body) {
                        Ok(sample) => return Ok(Some(sample)),
                        Err(reason) => {
                            warn!(at = info.at, %reason, "Dropping malformed sample record");
                        }
                    }
                }
                _ => self.reader.skip(size)?,
            }
        }
    }
}

/// Decode a kind-specific sample header body.
fn parse_sample(kind: SampleKind, header: SampleHeader, body: &[u8]) -> Result<Sample, String> {
    let need = match kind {
        SampleKind::Image => record::IMAGE_HEADER,
        SampleKind::Motion => record::MOTION_HEADER,
        SampleKind::Time => record::TIME_HEADER,
        SampleKind::DebugEvent => record::DEBUG_EVENT_HEADER,
    };
    if (body.len() as u64) < need {
        return Err(format!(
            "{kind:?} header holds {} bytes, needs {need}",
            body.len()
        ));
    }

    let mut cur = Cursor::new(body);
    // Lengths were checked above, so the fixed-width reads cannot fail.
    let io = |e: std::io::Error| e.to_string();

    let sample = match kind {
        SampleKind::Image => {
            let raw_stream = cur.read_u32::<LittleEndian>().map_err(io)?;
            let stream = StreamKind::from_raw(raw_stream)
                .ok_or_else(|| format!("unknown stream id {raw_stream}"))?;
            Sample::Image(ImageSample {
                header,
                stream,
                width: cur.read_u32::<LittleEndian>().map_err(io)?,
                height: cur.read_u32::<LittleEndian>().map_err(io)?,
                format: PixelFormat::from_raw(cur.read_u32::<LittleEndian>().map_err(io)?),
                stride: cur.read_u32::<LittleEndian>().map_err(io)?,
                compression: CompressionType::from_raw(
                    cur.read_u32::<LittleEndian>().map_err(io)?,
                ),
                frame_number: cur.read_u64::<LittleEndian>().map_err(io)?,
                index_in_stream: 0,
                timestamp: cur.read_f64::<LittleEndian>().map_err(io)?,
                system_time: cur.read_u64::<LittleEndian>().map_err(io)?,
                metadata: FrameMetadata::new(),
                pixels: None,
            })
        }
        SampleKind::Motion => {
            let motion = MotionKind::from_raw(cur.read_u32::<LittleEndian>().map_err(io)?);
            let frame_number = cur.read_u32::<LittleEndian>().map_err(io)?;
            let timestamp = cur.read_f64::<LittleEndian>().map_err(io)?;
            let mut data = [0f32; 3];
            for axis in &mut data {
                *axis = cur.read_f32::<LittleEndian>().map_err(io)?;
            }
            Sample::Motion(MotionSample {
                header,
                motion,
                frame_number,
                timestamp,
                data,
            })
        }
        SampleKind::Time => Sample::Time(TimeSample {
            header,
            source: cur.read_u32::<LittleEndian>().map_err(io)?,
            frame_number: cur.read_u32::<LittleEndian>().map_err(io)?,
            timestamp: cur.read_f64::<LittleEndian>().map_err(io)?,
        }),
        SampleKind::DebugEvent => {
            let event_id = cur.read_u32::<LittleEndian>().map_err(io)?;
            let message = String::from_utf8_lossy(&body[record::DEBUG_EVENT_HEADER as usize..])
                .into_owned();
            Sample::DebugEvent(DebugEventSample {
                header,
                event_id,
                message,
            })
        }
    };
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{CaptureBuilder, ImageRecord};
    use crate::header::read_headers;
    use rp_common::StreamInfo;

    fn stream(kind: StreamKind) -> StreamInfo {
        StreamInfo {
            stream: kind,
            width: 4,
            height: 2,
            format: PixelFormat::Y8,
            framerate: 30,
            frame_count: 0,
            compression: CompressionType::None,
        }
    }

    fn indexer_for(builder: &CaptureBuilder) -> (tempfile::NamedTempFile, Indexer) {
        let file = builder.write_temp().unwrap();
        let mut reader = BinaryReader::open(file.path()).unwrap();
        let headers = read_headers(&mut reader).unwrap();
        let indexer = Indexer::new(reader, headers.file.first_frame_offset).unwrap();
        (file, indexer)
    }

    fn mixed_capture() -> CaptureBuilder {
        let mut builder = CaptureBuilder::linux();
        builder.stream(stream(StreamKind::Depth));
        for i in 0..3u64 {
            builder.image(ImageRecord::new(StreamKind::Depth, i, i * 1_000, 4, 2, PixelFormat::Y8));
            builder.motion(MotionKind::Gyro, i as u32, i * 1_000 + 500, [0.1, 0.2, 0.3]);
        }
        builder.time(2, 9, 3_500);
        builder.debug_event(4, 3_600, "exposure change");
        builder
    }

    #[test]
    fn indexes_all_kinds_in_file_order() {
        let (_file, mut indexer) = indexer_for(&mixed_capture());
        let batch = indexer.index_next(usize::MAX).unwrap();
        assert!(batch.complete);
        assert_eq!(batch.samples.len(), 8);

        let kinds: Vec<_> = batch.samples.iter().map(Sample::kind).collect();
        assert_eq!(kinds[0], SampleKind::Image);
        assert_eq!(kinds[1], SampleKind::Motion);
        assert_eq!(kinds[6], SampleKind::Time);
        assert_eq!(kinds[7], SampleKind::DebugEvent);

        let image = batch.samples[2].as_image().unwrap();
        assert_eq!(image.frame_number, 1);
        assert_eq!(image.header.capture_time, 1_000);
        assert!(image.pixels.is_none());

        match &batch.samples[7] {
            Sample::DebugEvent(event) => assert_eq!(event.message, "exposure change"),
            other => panic!("expected debug event, got {other:?}"),
        }
    }

    #[test]
    fn batches_respect_max_and_offsets_increase() {
        let (_file, mut indexer) = indexer_for(&mixed_capture());
        let first = indexer.index_next(3).unwrap();
        assert_eq!(first.samples.len(), 3);
        assert!(!first.complete);

        let rest = indexer.index_next(100).unwrap();
        assert_eq!(rest.samples.len(), 5);
        assert!(rest.complete);

        let offsets: Vec<u64> = first
            .samples
            .iter()
            .chain(rest.samples.iter())
            .map(Sample::offset)
            .collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn index_after_complete_is_a_noop() {
        let (_file, mut indexer) = indexer_for(&mixed_capture());
        indexer.index_next(usize::MAX).unwrap();
        let again = indexer.index_next(10).unwrap();
        assert!(again.samples.is_empty());
        assert!(again.complete);
        assert_eq!(indexer.indexed(), 8);
    }

    #[test]
    fn rewind_restarts_from_first_frame() {
        let (_file, mut indexer) = indexer_for(&mixed_capture());
        let first = indexer.index_next(usize::MAX).unwrap();
        indexer.rewind().unwrap();
        assert!(!indexer.is_complete());
        let second = indexer.index_next(usize::MAX).unwrap();
        assert_eq!(first.samples, second.samples);
    }

    #[test]
    fn unknown_sample_kind_is_reported() {
        let mut builder = CaptureBuilder::linux();
        builder.stream(stream(StreamKind::Depth));
        builder.image(ImageRecord::new(StreamKind::Depth, 0, 0, 4, 2, PixelFormat::Y8));
        builder.raw_sample(9, 100, vec![0; 16]);
        let (_file, mut indexer) = indexer_for(&builder);

        let err = indexer.index_next(10).unwrap_err();
        assert!(matches!(err, DemuxError::UnknownSampleKind { kind: 9, .. }));
    }

    #[test]
    fn truncated_tail_completes_at_last_whole_record() {
        let mut builder = CaptureBuilder::linux();
        builder.stream(stream(StreamKind::Depth));
        for i in 0..2u64 {
            builder.image(ImageRecord::new(StreamKind::Depth, i, i * 10, 4, 2, PixelFormat::Y8));
        }
        let mut bytes = builder.build();
        bytes.extend_from_slice(&[5, 0, 0, 0, 16, 0, 0, 0, 0, 0]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &bytes).unwrap();

        let mut reader = BinaryReader::open(file.path()).unwrap();
        let headers = read_headers(&mut reader).unwrap();
        let mut indexer = Indexer::new(reader, headers.file.first_frame_offset).unwrap();
        let batch = indexer.index_next(usize::MAX).unwrap();
        assert!(batch.complete);
        assert_eq!(batch.samples.len(), 2);
    }

    #[test]
    fn image_with_unknown_stream_is_dropped() {
        let mut builder = CaptureBuilder::linux();
        builder.stream(stream(StreamKind::Depth));
        let mut bad = vec![0u8; record::IMAGE_HEADER as usize];
        bad[0] = 42;
        builder.raw_sample(0, 5, bad);
        builder.image(ImageRecord::new(StreamKind::Depth, 0, 10, 4, 2, PixelFormat::Y8));
        let (_file, mut indexer) = indexer_for(&builder);

        let batch = indexer.index_next(usize::MAX).unwrap();
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].capture_time(), 10);
    }
}
