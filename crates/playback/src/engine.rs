//! Playback engine: the public control surface over a capture file.
//!
//! Architecture:
//!
//! ```text
//! Caller thread                      Streaming thread ("playback-worker")
//! ┌──────────────────┐              ┌───────────────────────────┐
//! │ enable_stream    │   Mutex      │ read_next_sample          │
//! │ seek / reset     │◄──state────► │  - deliver due samples    │──► sample handler
//! │ resume / pause   │              │  - index more             │
//! └──────────────────┘              │  - prefetch one + decode  │──► end-of-file handler
//!                                   │  - pace against wall clock│
//!                                   └───────────────────────────┘
//! ```
//!
//! Control operations take `&mut self`; the only blocking one is
//! [`PlaybackEngine::pause`], which joins the streaming thread so that no
//! callback runs after it returns.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use rp_common::{
    CaptureMode, CompressionType, DecodeError, DemuxError, DeviceInfo, FileFormat, FileInfo,
    ImageSample, PixelFormat, Sample, StreamInfo, StreamKind, Version,
};
use rp_decoder::{DecoderSet, FrameDecoder};
use rp_demux::{
    detect_capture_mode, read_headers, BinaryReader, DropStats, Indexer, PayloadReader,
    SampleCatalog,
};
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::prefetch::ActiveStreamInfo;
use crate::shared::{stream_loop, unknown_sample_kind, FrameReader, PlaybackState, Shared};
use crate::sink::{channel_handlers, PlaybackEvent, Sinks};

/// Plays a recorded capture file back through consumer callbacks.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    // -----------------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------------

    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlaybackError> {
        Self::open_with_config(path, PlaybackConfig::default())
    }

    /// Open a capture file with two independent handles, one for indexing
    /// and one for frame payloads, and resolve its capture mode.
    ///
    /// # Panics
    ///
    /// Panics if capture-mode detection indexes a sample kind outside the
    /// known set, as playback would.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: PlaybackConfig,
    ) -> Result<Self, PlaybackError> {
        let path = path.as_ref();
        let mut index_reader = BinaryReader::open(path).map_err(DemuxError::Io)?;
        let headers = read_headers(&mut index_reader)?;
        let mut indexer = Indexer::new(index_reader, headers.file.first_frame_offset)?;
        let payload = PayloadReader::new(
            BinaryReader::open(path).map_err(DemuxError::Io)?,
            headers.file.format,
        );

        let mut catalog = SampleCatalog::new();
        let capture_mode = match headers.file.capture_mode {
            CaptureMode::Unknown => match detect_capture_mode(
                headers.streams.len(),
                &mut indexer,
                &mut catalog,
                config.batch(),
                config.validation_frames,
            ) {
                Err(DemuxError::UnknownSampleKind { kind, offset }) => {
                    unknown_sample_kind(kind, offset)
                }
                detected => detected?,
            },
            declared => declared,
        };

        info!(
            path = %path.display(),
            streams = headers.streams.len(),
            ?capture_mode,
            indexed = catalog.len(),
            "Opened capture for playback"
        );

        let state = PlaybackState {
            catalog,
            ..PlaybackState::default()
        };
        let shared = Shared {
            capture_mode,
            realtime: AtomicBool::new(config.realtime),
            config,
            state: Mutex::new(state),
            indexer: Mutex::new(indexer),
            frames: Mutex::new(FrameReader {
                payload,
                decoders: DecoderSet::new(),
            }),
            sinks: Mutex::new(Sinks::default()),
            stop: AtomicBool::new(true),
            headers,
        };

        Ok(Self {
            shared: Arc::new(shared),
            worker: None,
        })
    }

    // -----------------------------------------------------------------------
    // File queries
    // -----------------------------------------------------------------------

    pub fn file_info(&self) -> FileInfo {
        let headers = &self.shared.headers;
        FileInfo {
            format: headers.file.format,
            capture_mode: self.shared.capture_mode,
            version: headers.file.version,
            sdk_version: headers.sw_info.sdk.to_string(),
            driver_version: headers.sw_info.driver.to_string(),
        }
    }

    pub fn format(&self) -> FileFormat {
        self.shared.headers.file.format
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.shared.capture_mode
    }

    pub fn sdk_version(&self) -> Version {
        self.shared.headers.sw_info.sdk
    }

    pub fn driver_version(&self) -> Version {
        self.shared.headers.sw_info.driver
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.shared.headers.device
    }

    pub fn properties(&self) -> &BTreeMap<u32, f64> {
        &self.shared.headers.properties
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.shared.headers.streams.values()
    }

    pub fn stream_info(&self, stream: StreamKind) -> Option<&StreamInfo> {
        self.shared.headers.streams.get(&stream)
    }

    pub fn is_stream_profile_available(
        &self,
        stream: StreamKind,
        width: u32,
        height: u32,
        format: PixelFormat,
        framerate: u32,
    ) -> bool {
        self.stream_info(stream).is_some_and(|info| {
            info.width == width
                && info.height == height
                && info.format == format
                && info.framerate == framerate
        })
    }

    /// Frames recorded for `stream`. When the header does not declare a
    /// count the whole file is indexed to find it. Zero for absent streams.
    pub fn query_frame_count(&self, stream: StreamKind) -> u32 {
        let Some(info) = self.stream_info(stream) else {
            return 0;
        };
        if info.frame_count > 0 {
            return info.frame_count;
        }
        while self.shared.index_more() {}
        self.shared.state.lock().catalog.stream_len(stream) as u32
    }

    /// Wall-clock time since playback was last (re)anchored.
    pub fn query_run_time(&self) -> Duration {
        self.shared.state.lock().pacer.run_time()
    }

    pub fn drop_stats(&self) -> DropStats {
        self.shared.state.lock().catalog.drops().clone()
    }

    /// Per-stream ordinal of the next frame `stream` will deliver.
    pub fn stream_position(&self, stream: StreamKind) -> Option<u32> {
        self.shared
            .state
            .lock()
            .buffer
            .active(stream)
            .map(|entry| entry.cursor)
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.shared.config
    }

    pub fn is_streaming(&self) -> bool {
        self.worker.is_some() && !self.shared.stop.load(Ordering::Acquire)
    }

    pub fn is_realtime(&self) -> bool {
        self.shared.realtime.load(Ordering::Relaxed)
    }

    pub fn is_motion_enabled(&self) -> bool {
        self.shared.state.lock().motion_enabled
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    pub fn set_sample_handler<F>(&mut self, handler: F)
    where
        F: FnMut(Sample) + Send + 'static,
    {
        self.shared.sinks.lock().set_sample(Box::new(handler));
    }

    /// Required before [`PlaybackEngine::resume`].
    pub fn set_eof_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.shared.sinks.lock().set_eof(Box::new(handler));
    }

    /// Route samples and end-of-file into a channel, replacing both handlers.
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (on_sample, on_eof, rx) = channel_handlers();
        let mut sinks = self.shared.sinks.lock();
        sinks.set_sample(on_sample);
        sinks.set_eof(on_eof);
        rx
    }

    /// Replace the decoder used for `compression` on every stream.
    pub fn register_decoder<F>(&mut self, compression: CompressionType, factory: F)
    where
        F: Fn() -> Result<Box<dyn FrameDecoder>, DecodeError> + Send + Sync + 'static,
    {
        let mut frames = self.shared.frames.lock();
        frames.decoders.register(compression, factory);
        frames.decoders.reset();
    }

    // -----------------------------------------------------------------------
    // Stream selection
    // -----------------------------------------------------------------------

    /// Turn delivery of `stream` on or off.
    ///
    /// # Panics
    ///
    /// Panics if the file has no such stream.
    pub fn enable_stream(&mut self, stream: StreamKind, enabled: bool) {
        let Some(info) = self.stream_info(stream).cloned() else {
            panic!("stream {stream} is not present in the capture file");
        };
        if enabled && !self.shared.frames.lock().decoders.supports(info.compression) {
            warn!(%stream, compression = ?info.compression, "No decoder for stream, its frames will be dropped");
        }

        let mut state = self.shared.state.lock();
        if enabled {
            if !state.buffer.is_active(stream) {
                let cursor = state.stream_ordinal_at(stream, state.cursor);
                state.buffer.enable(ActiveStreamInfo::new(info, cursor));
            }
        } else {
            state.buffer.disable(stream);
        }
        debug!(%stream, enabled, "Stream selection changed");
    }

    pub fn enable_motion(&mut self, enabled: bool) {
        self.shared.state.lock().motion_enabled = enabled;
        debug!(enabled, "Motion delivery changed");
    }

    /// Toggle wall-clock pacing. Re-anchors the time base either way.
    pub fn set_realtime(&mut self, realtime: bool) {
        self.shared.realtime.store(realtime, Ordering::Relaxed);
        self.shared.rebase_pacer();
        info!(realtime, "Realtime playback changed");
    }

    // -----------------------------------------------------------------------
    // Streaming control
    // -----------------------------------------------------------------------

    /// Start the streaming thread.
    ///
    /// # Panics
    ///
    /// Panics if playback is already streaming or no end-of-file handler
    /// has been registered.
    pub fn resume(&mut self) -> Result<(), PlaybackError> {
        if let Some(handle) = self.worker.take() {
            if !self.shared.stop.load(Ordering::Acquire) {
                self.worker = Some(handle);
                panic!("resume called while playback is already streaming");
            }
            // Finished on its own at end of file; reap it.
            join_worker(handle);
        }
        assert!(
            self.shared.sinks.lock().has_eof_handler(),
            "resume requires an end-of-file handler"
        );

        self.shared.rebase_pacer();
        self.shared.stop.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("playback-worker".to_string())
            .spawn(move || stream_loop(shared))
            .map_err(|e| {
                self.shared.stop.store(true, Ordering::Release);
                PlaybackError::Spawn(e)
            })?;
        self.worker = Some(handle);

        info!(realtime = self.is_realtime(), "Playback resumed");
        Ok(())
    }

    /// Stop the streaming thread and wait for it to exit. A panic raised on
    /// the streaming thread is re-raised here.
    pub fn pause(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            join_worker(handle);
            info!("Playback paused");
        }
    }

    /// Pause and return to the first frame, discarding the catalog.
    pub fn reset(&mut self) -> Result<(), PlaybackError> {
        self.pause();

        let mut indexer = self.shared.indexer.lock();
        indexer.rewind()?;
        self.shared.frames.lock().decoders.reset();

        let mut state = self.shared.state.lock();
        state.catalog.clear();
        state.cursor = 0;
        state.buffer.clear();
        state.align_stream_cursors(0);
        info!("Playback reset to first frame");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Seeking
    // -----------------------------------------------------------------------

    /// Seek so that `stream` continues from its `n`-th frame.
    ///
    /// Returns the decoded frame of every active stream at the new
    /// position, or an empty map if `stream` has no such frame.
    pub fn seek_to_frame(
        &mut self,
        stream: StreamKind,
        n: u32,
    ) -> Result<BTreeMap<StreamKind, ImageSample>, PlaybackError> {
        let was_streaming = self.is_streaming();
        self.pause();
        let anchor = self.shared.locate_frame(stream, n as usize);
        debug!(%stream, n, ?anchor, "Seek to frame");
        self.finish_seek(anchor, was_streaming)
    }

    /// Seek to the first frame captured at or after `capture_time`
    /// (microseconds).
    pub fn seek_to_time(
        &mut self,
        capture_time: u64,
    ) -> Result<BTreeMap<StreamKind, ImageSample>, PlaybackError> {
        let was_streaming = self.is_streaming();
        self.pause();
        let anchor = self.shared.locate_time(capture_time);
        debug!(capture_time, ?anchor, "Seek to time");
        self.finish_seek(anchor, was_streaming)
    }

    fn finish_seek(
        &mut self,
        anchor: Option<usize>,
        was_streaming: bool,
    ) -> Result<BTreeMap<StreamKind, ImageSample>, PlaybackError> {
        let frames = match anchor {
            Some(anchor) => {
                // Decoders restart on the frames around the new position.
                self.shared.frames.lock().decoders.reset();
                let frames = self.shared.find_nearest_frames(anchor);
                self.shared.reposition(anchor);
                info!(anchor, frames = frames.len(), "Seek complete");
                frames
            }
            None => {
                info!("Seek target not found");
                BTreeMap::new()
            }
        };
        if was_streaming {
            self.resume()?;
        }
        Ok(frames)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("format", &self.format())
            .field("capture_mode", &self.capture_mode())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if let Err(panic) = handle.join() {
        std::panic::resume_unwind(panic);
    }
}
