//! State shared between the control surface and the streaming thread.
//!
//! Lock order is `indexer` before `state`. `frames` is never taken while
//! `state` is held, and `state` is never held across file I/O, decoding or
//! a consumer callback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rp_common::{CaptureMode, DemuxError, ImageSample, Sample, StreamKind};
use rp_decoder::DecoderSet;
use rp_demux::{CaptureHeaders, IndexBatch, Indexer, PayloadReader, SampleCatalog};
use tracing::{debug, info, trace, warn};

use crate::config::PlaybackConfig;
use crate::pacer::Pacer;
use crate::prefetch::{BufferLimits, PrefetchBuffer};
use crate::sink::Sinks;

// ---------------------------------------------------------------------------
// Guarded state
// ---------------------------------------------------------------------------

/// Everything guarded by the state lock.
#[derive(Debug, Default)]
pub(crate) struct PlaybackState {
    pub catalog: SampleCatalog,
    pub buffer: PrefetchBuffer,
    /// Next catalog index to prefetch.
    pub cursor: usize,
    pub motion_enabled: bool,
    pub pacer: Pacer,
}

impl PlaybackState {
    pub fn all_samples_buffered(&self, limits: BufferLimits) -> bool {
        let complete = self.catalog.is_complete();
        let exhausted = complete && self.cursor >= self.catalog.len();
        // A stream with no frame at or after the cursor in a fully indexed
        // file has nothing left to wait for.
        let drained = |stream| {
            complete
                && self
                    .catalog
                    .stream_indices(stream)
                    .last()
                    .map_or(true, |&idx| idx < self.cursor)
        };
        self.buffer
            .all_buffered(exhausted, self.motion_enabled, limits, drained)
    }

    /// Capture time playback would continue from.
    pub fn resume_point(&self) -> Option<u64> {
        self.buffer
            .front()
            .or_else(|| self.catalog.get(self.cursor))
            .map(Sample::capture_time)
    }

    /// Number of `stream` frames that precede catalog index `at`.
    pub fn stream_ordinal_at(&self, stream: StreamKind, at: usize) -> u32 {
        self.catalog
            .stream_indices(stream)
            .partition_point(|&idx| idx < at) as u32
    }

    /// Point every active stream's cursor at its first frame at or after
    /// catalog index `at`.
    pub fn align_stream_cursors(&mut self, at: usize) {
        let streams: Vec<StreamKind> = self.buffer.active_streams().collect();
        for stream in streams {
            let ordinal = self.stream_ordinal_at(stream, at);
            self.buffer.set_cursor(stream, ordinal);
        }
    }
}

/// Payload reader plus the decoders that turn payloads into pixels.
pub(crate) struct FrameReader {
    pub payload: PayloadReader,
    pub decoders: DecoderSet,
}

impl FrameReader {
    /// Read and decode `image`. Any failure short of an unsupported
    /// compression is logged and yields `None`.
    pub fn materialize(&mut self, image: &ImageSample) -> Option<ImageSample> {
        let payload = match self.payload.read_frame(image) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(
                    stream = %image.stream,
                    frame = image.frame_number,
                    offset = image.header.offset,
                    "No pixel data for frame"
                );
                return None;
            }
            Err(e) => {
                warn!(stream = %image.stream, frame = image.frame_number, error = %e, "Frame read failed");
                return None;
            }
        };

        let pixels = match self.decoders.materialize(image, payload.data) {
            Ok(pixels) => pixels,
            Err(e) => {
                warn!(
                    stream = %image.stream,
                    frame = image.frame_number,
                    compression = ?image.compression,
                    error = %e,
                    "Frame decode failed"
                );
                return None;
            }
        };

        let mut frame = image.clone();
        frame.metadata = payload.metadata;
        frame.pixels = Some(pixels);
        Some(frame)
    }
}

/// A sample kind outside the known set means the file is corrupt or from
/// an unsupported recorder. Raised wherever indexing meets one.
pub(crate) fn unknown_sample_kind(kind: u32, offset: u64) -> ! {
    panic!("capture file holds unknown sample kind {kind} at offset {offset}")
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    pub headers: CaptureHeaders,
    pub capture_mode: CaptureMode,
    pub config: PlaybackConfig,
    pub state: Mutex<PlaybackState>,
    pub indexer: Mutex<Indexer>,
    pub frames: Mutex<FrameReader>,
    pub sinks: Mutex<Sinks>,
    pub stop: AtomicBool,
    pub realtime: AtomicBool,
}

impl Shared {
    /// Index one more batch into the catalog. Returns `false` once the
    /// whole file has been indexed.
    ///
    /// # Panics
    ///
    /// Panics if the file contains a sample kind outside the known set.
    pub fn index_more(&self) -> bool {
        let mut indexer = self.indexer.lock();
        if self.state.lock().catalog.is_complete() {
            return false;
        }

        let batch = match indexer.index_next(self.config.batch()) {
            Ok(batch) => batch,
            Err(DemuxError::UnknownSampleKind { kind, offset }) => {
                unknown_sample_kind(kind, offset)
            }
            Err(e) => {
                warn!(error = %e, "Indexing failed, treating file as fully indexed");
                IndexBatch {
                    samples: Vec::new(),
                    complete: true,
                }
            }
        };

        let mut state = self.state.lock();
        state.catalog.append(batch);
        !state.catalog.is_complete()
    }

    pub fn rebase_pacer(&self) {
        let mut state = self.state.lock();
        let base = state.resume_point();
        state.pacer.rebase(base);
        debug!(base_capture = ?base, "Pacer time base reset");
    }

    fn is_realtime(&self) -> bool {
        self.realtime.load(Ordering::Relaxed)
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Streaming unit of work
    // -----------------------------------------------------------------------

    /// Deliver what is due, make sure something is left to read, prefetch
    /// one sample and, when everything needed is buffered, wait for the
    /// head to become due. Returns `false` at end of file.
    pub fn read_next_sample(&self) -> bool {
        self.deliver_due();

        loop {
            {
                let state = self.state.lock();
                if state.cursor < state.catalog.len() {
                    break;
                }
                if state.catalog.is_complete() {
                    if state.buffer.is_empty() {
                        return false;
                    }
                    break;
                }
            }
            self.index_more();
        }

        let limits = self.config.limits();
        if !self.state.lock().all_samples_buffered(limits) {
            self.prefetch_one();
        }
        if self.is_realtime() && self.state.lock().all_samples_buffered(limits) {
            self.wait_for_due();
        }
        true
    }

    /// Hand every due sample at the head of the buffer to the consumer.
    fn deliver_due(&self) {
        let slack = self.config.due_slack_us as i64;
        while !self.stopping() {
            let sample = {
                let mut state = self.state.lock();
                let Some(capture) = state.buffer.front().map(Sample::capture_time) else {
                    return;
                };
                if self.is_realtime() && state.pacer.time_until_due(capture) > slack {
                    return;
                }
                state.buffer.pop()
            };
            if let Some(sample) = sample {
                trace!(kind = ?sample.kind(), capture_time = sample.capture_time(), "Delivering sample");
                self.sinks.lock().deliver(sample);
            }
        }
    }

    /// Sleep until the head is due, indexing instead while the file is not
    /// fully indexed. Sleeps are capped so a pause is noticed promptly.
    fn wait_for_due(&self) {
        let slack = self.config.due_slack_us as i64;
        let max_sleep = self.config.max_sleep();
        while !self.stopping() && self.is_realtime() {
            let (wait, complete) = {
                let mut state = self.state.lock();
                let Some(capture) = state.buffer.front().map(Sample::capture_time) else {
                    return;
                };
                (state.pacer.time_until_due(capture), state.catalog.is_complete())
            };
            if wait <= slack {
                return;
            }
            if complete {
                thread::sleep(Duration::from_micros(wait as u64).min(max_sleep));
            } else {
                self.index_more();
            }
        }
    }

    /// Materialize the catalog entry at the cursor and advance the cursor.
    pub fn prefetch_one(&self) {
        let image = {
            let mut state = self.state.lock();
            let Some(sample) = state.catalog.get(state.cursor).cloned() else {
                return;
            };
            state.cursor += 1;
            match sample {
                Sample::Image(image) => {
                    if !state.buffer.is_active(image.stream) {
                        trace!(stream = %image.stream, frame = image.frame_number, "Skipping inactive stream");
                        return;
                    }
                    image
                }
                Sample::Motion(_) | Sample::Time(_) => {
                    if state.motion_enabled {
                        state.buffer.push(sample);
                    }
                    return;
                }
                Sample::DebugEvent(event) => {
                    debug!(event = event.event_id, message = %event.message, "Recorded debug event");
                    return;
                }
            }
        };

        let Some(frame) = self.frames.lock().materialize(&image) else {
            return;
        };

        let mut state = self.state.lock();
        if state.buffer.is_active(frame.stream) {
            trace!(stream = %frame.stream, frame = frame.frame_number, "Prefetched frame");
            state.buffer.push(Sample::Image(frame));
        }
    }

    // -----------------------------------------------------------------------
    // Random access
    // -----------------------------------------------------------------------

    /// Catalog index of the `n`-th frame of `stream`, indexing as needed.
    pub fn locate_frame(&self, stream: StreamKind, n: usize) -> Option<usize> {
        loop {
            {
                let state = self.state.lock();
                if let Some(idx) = state.catalog.stream_position(stream, n) {
                    return Some(idx);
                }
                if state.catalog.is_complete() {
                    return None;
                }
            }
            self.index_more();
        }
    }

    /// Catalog index of the first frame captured at or after `ts`. Only
    /// active streams are considered, or every stream when none is active.
    pub fn locate_time(&self, ts: u64) -> Option<usize> {
        let mut from = 0;
        loop {
            {
                let state = self.state.lock();
                let any_stream = state.buffer.active_streams().next().is_none();
                for idx in from..state.catalog.len() {
                    let Some(image) = state.catalog.image(idx) else {
                        continue;
                    };
                    if image.header.capture_time >= ts
                        && (any_stream || state.buffer.is_active(image.stream))
                    {
                        return Some(idx);
                    }
                }
                from = state.catalog.len();
                if state.catalog.is_complete() {
                    return None;
                }
            }
            self.index_more();
        }
    }

    /// Resolve one frame per active stream around the anchor at catalog
    /// index `anchor`, and decode them.
    ///
    /// Other streams get whichever of their nearest preceding and following
    /// frames is closer in capture time; ties go to the preceding frame.
    pub fn find_nearest_frames(&self, anchor: usize) -> BTreeMap<StreamKind, ImageSample> {
        let (anchor_frame, streams) = {
            let state = self.state.lock();
            let Some(frame) = state.catalog.image(anchor).cloned() else {
                return BTreeMap::new();
            };
            (frame, state.buffer.active_streams().collect::<Vec<_>>())
        };
        let target = anchor_frame.header.capture_time;

        let mut picks = Vec::with_capacity(streams.len());
        for stream in streams {
            if stream == anchor_frame.stream {
                picks.push(anchor_frame.clone());
                continue;
            }

            let prev = {
                let state = self.state.lock();
                let indices = state.catalog.stream_indices(stream);
                let split = indices.partition_point(|&idx| idx < anchor);
                split
                    .checked_sub(1)
                    .and_then(|p| state.catalog.image(indices[p]))
                    .cloned()
            };
            let next = self.next_frame_after(stream, anchor);

            let distance = |f: &ImageSample| f.header.capture_time.abs_diff(target);
            let pick = match (prev, next) {
                (Some(p), Some(n)) => {
                    if distance(&n) < distance(&p) {
                        n
                    } else {
                        p
                    }
                }
                (Some(p), None) => p,
                (None, Some(n)) => n,
                (None, None) => {
                    debug!(%stream, "No frame near seek target");
                    continue;
                }
            };
            picks.push(pick);
        }

        let mut frames = BTreeMap::new();
        let mut reader = self.frames.lock();
        for pick in picks {
            if let Some(frame) = reader.materialize(&pick) {
                frames.insert(frame.stream, frame);
            }
        }
        frames
    }

    /// First frame of `stream` after catalog index `anchor`, indexing
    /// forward as needed.
    fn next_frame_after(&self, stream: StreamKind, anchor: usize) -> Option<ImageSample> {
        loop {
            {
                let state = self.state.lock();
                let indices = state.catalog.stream_indices(stream);
                let split = indices.partition_point(|&idx| idx <= anchor);
                if let Some(&idx) = indices.get(split) {
                    return state.catalog.image(idx).cloned();
                }
                if state.catalog.is_complete() {
                    return None;
                }
            }
            self.index_more();
        }
    }

    /// Move the cursor to `anchor` with an empty buffer and prefetch the
    /// anchor frame.
    pub fn reposition(&self, anchor: usize) {
        {
            let mut state = self.state.lock();
            state.cursor = anchor;
            state.buffer.clear();
            state.align_stream_cursors(anchor);
        }
        self.prefetch_one();
    }
}

// ---------------------------------------------------------------------------
// Streaming thread
// ---------------------------------------------------------------------------

pub(crate) fn stream_loop(shared: Arc<Shared>) {
    debug!("Playback thread started");
    while !shared.stopping() {
        if !shared.read_next_sample() {
            info!("End of capture file reached");
            // Stopped before the handler runs so it may observe and resume.
            shared.stop.store(true, Ordering::Release);
            shared.sinks.lock().end_of_file();
            break;
        }
    }

    let drops = shared.state.lock().catalog.drops().clone();
    info!(
        dropped_frames = drops.total_frames(),
        dropped_motion = drops.motion,
        "Playback thread exiting"
    );
    for (stream, count) in &drops.per_stream {
        debug!(%stream, count, "Dropped frames");
    }
}
