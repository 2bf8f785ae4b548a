//! Capture-mode detection for files that do not record it.

use std::collections::BTreeMap;

use rp_common::{CaptureMode, DemuxError, StreamKind};
use tracing::debug;

use crate::catalog::SampleCatalog;
use crate::index::Indexer;

/// Decide whether the streams of a file were captured in lockstep.
///
/// Indexes until every stream has at least `min_frames` frames (or the file
/// ends), then walks the images in file order tracking the latest capture
/// time of each stream. The file is synced if at some point every stream
/// has been seen and all latest capture times agree. Indexed samples stay
/// in `catalog`.
pub fn detect_capture_mode(
    stream_count: usize,
    indexer: &mut Indexer,
    catalog: &mut SampleCatalog,
    batch: usize,
    min_frames: usize,
) -> Result<CaptureMode, DemuxError> {
    if stream_count <= 1 {
        return Ok(CaptureMode::Synced);
    }

    while !catalog.is_complete() && !enough_frames(catalog, stream_count, min_frames) {
        catalog.append(indexer.index_next(batch)?);
    }

    let mut latest: BTreeMap<StreamKind, u64> = BTreeMap::new();
    for image in catalog.iter().filter_map(|s| s.as_image()) {
        latest.insert(image.stream, image.header.capture_time);
        if latest.len() == stream_count {
            let mut times = latest.values();
            let first = times.next().copied();
            if times.all(|t| Some(*t) == first) {
                debug!(capture_time = ?first, "Streams share a capture time, file is synced");
                return Ok(CaptureMode::Synced);
            }
        }
    }

    debug!(
        indexed = catalog.len(),
        streams = latest.len(),
        "No common capture time found, file is asynced"
    );
    Ok(CaptureMode::Asynced)
}

fn enough_frames(catalog: &SampleCatalog, stream_count: usize, min_frames: usize) -> bool {
    let mut seen = 0;
    for stream in StreamKind::ALL {
        let len = catalog.stream_len(stream);
        if len > 0 {
            if len < min_frames {
                return false;
            }
            seen += 1;
        }
    }
    seen >= stream_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{CaptureBuilder, ImageRecord};
    use crate::header::read_headers;
    use crate::reader::BinaryReader;
    use rp_common::{CompressionType, PixelFormat, StreamInfo};

    fn info(stream: StreamKind) -> StreamInfo {
        StreamInfo {
            stream,
            width: 2,
            height: 2,
            format: PixelFormat::Y8,
            framerate: 30,
            frame_count: 0,
            compression: CompressionType::None,
        }
    }

    fn detect(builder: &CaptureBuilder, streams: usize) -> (CaptureMode, SampleCatalog) {
        let file = builder.write_temp().unwrap();
        let mut reader = BinaryReader::open(file.path()).unwrap();
        let headers = read_headers(&mut reader).unwrap();
        let mut indexer = Indexer::new(reader, headers.file.first_frame_offset).unwrap();
        let mut catalog = SampleCatalog::new();
        let mode = detect_capture_mode(streams, &mut indexer, &mut catalog, 4, 10).unwrap();
        (mode, catalog)
    }

    fn two_streams(offset: u64) -> CaptureBuilder {
        let mut builder = CaptureBuilder::linux();
        builder.stream(info(StreamKind::Depth)).stream(info(StreamKind::Color));
        for i in 0..20u64 {
            let t = i * 33_333;
            builder.image(ImageRecord::new(StreamKind::Depth, i, t, 2, 2, PixelFormat::Y8));
            builder.image(ImageRecord::new(
                StreamKind::Color,
                i,
                t + offset,
                2,
                2,
                PixelFormat::Y8,
            ));
        }
        builder
    }

    #[test]
    fn single_stream_is_synced_without_indexing() {
        let (mode, catalog) = detect(&two_streams(0), 1);
        assert_eq!(mode, CaptureMode::Synced);
        assert!(catalog.is_empty());
    }

    #[test]
    fn shared_capture_times_are_synced() {
        let (mode, _) = detect(&two_streams(0), 2);
        assert_eq!(mode, CaptureMode::Synced);
    }

    #[test]
    fn offset_capture_times_are_asynced() {
        let (mode, catalog) = detect(&two_streams(7_000), 2);
        assert_eq!(mode, CaptureMode::Asynced);
        assert!(catalog.stream_len(StreamKind::Depth) >= 10);
        assert!(catalog.stream_len(StreamKind::Color) >= 10);
    }
}
