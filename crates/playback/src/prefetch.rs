//! Materialized samples waiting for delivery, and the per-stream
//! bookkeeping that decides when enough of them are buffered.

use std::collections::{BTreeMap, VecDeque};

use rp_common::{Sample, StreamInfo, StreamKind};

/// Playback bookkeeping for one enabled stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStreamInfo {
    pub info: StreamInfo,
    /// Per-stream ordinal of the next frame to be delivered.
    pub cursor: u32,
    /// Frames of this stream currently queued.
    pub buffered: usize,
}

impl ActiveStreamInfo {
    pub fn new(info: StreamInfo, cursor: u32) -> Self {
        Self {
            info,
            cursor,
            buffered: 0,
        }
    }
}

/// Queue sizes at which prefetching may stop and wait for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// With no image stream active, motion samples needed beyond this count.
    pub motion_threshold: usize,
    /// Queue length that counts as full whatever the streams hold.
    pub max_depth: usize,
}

/// Queue of materialized samples in catalog order.
#[derive(Debug, Default)]
pub struct PrefetchBuffer {
    queue: VecDeque<Sample>,
    active: BTreeMap<StreamKind, ActiveStreamInfo>,
}

impl PrefetchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Active streams
    // -----------------------------------------------------------------------

    pub fn enable(&mut self, info: ActiveStreamInfo) {
        self.active.insert(info.info.stream, info);
    }

    /// Stop tracking `stream` and drop its queued frames.
    pub fn disable(&mut self, stream: StreamKind) -> bool {
        self.queue.retain(|s| s.stream() != Some(stream));
        self.active.remove(&stream).is_some()
    }

    pub fn is_active(&self, stream: StreamKind) -> bool {
        self.active.contains_key(&stream)
    }

    pub fn active(&self, stream: StreamKind) -> Option<&ActiveStreamInfo> {
        self.active.get(&stream)
    }

    pub fn active_streams(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.active.keys().copied()
    }

    pub fn set_cursor(&mut self, stream: StreamKind, cursor: u32) {
        if let Some(entry) = self.active.get_mut(&stream) {
            entry.cursor = cursor;
        }
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    pub fn push(&mut self, sample: Sample) {
        if let Some(entry) = sample.stream().and_then(|s| self.active.get_mut(&s)) {
            entry.buffered += 1;
        }
        self.queue.push_back(sample);
    }

    /// Take the head of the queue, advancing its stream's cursor past it.
    pub fn pop(&mut self) -> Option<Sample> {
        let sample = self.queue.pop_front()?;
        if let Some(image) = sample.as_image() {
            if let Some(entry) = self.active.get_mut(&image.stream) {
                entry.buffered = entry.buffered.saturating_sub(1);
                entry.cursor = image.index_in_stream + 1;
            }
        }
        Some(sample)
    }

    pub fn front(&self) -> Option<&Sample> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Empty the queue. Active streams stay enabled.
    pub fn clear(&mut self) {
        self.queue.clear();
        for entry in self.active.values_mut() {
            entry.buffered = 0;
        }
    }

    /// Whether prefetching can pause until the head becomes due. Never
    /// true for an empty queue.
    ///
    /// Once the catalog is `exhausted`, or the queue has reached
    /// `limits.max_depth`, any queued sample suffices. Otherwise every
    /// active image stream needs a queued frame unless `drained` reports it
    /// has no frames left to prefetch. With no image stream active the
    /// queue must hold more than `limits.motion_threshold` samples (more
    /// than zero when motion delivery is off).
    pub fn all_buffered<F>(
        &self,
        exhausted: bool,
        motion_enabled: bool,
        limits: BufferLimits,
        drained: F,
    ) -> bool
    where
        F: Fn(StreamKind) -> bool,
    {
        if self.queue.is_empty() {
            return false;
        }
        if exhausted || self.queue.len() >= limits.max_depth {
            return true;
        }
        if !self.active.is_empty() {
            return self
                .active
                .iter()
                .all(|(&stream, entry)| entry.buffered > 0 || drained(stream));
        }
        let threshold = if motion_enabled { limits.motion_threshold } else { 0 };
        self.queue.len() > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_common::{
        CompressionType, FrameMetadata, ImageSample, MotionKind, MotionSample, PixelFormat,
        SampleHeader,
    };

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

    fn image(stream: StreamKind, index_in_stream: u32) -> Sample {
        Sample::Image(ImageSample {
            header: SampleHeader {
                capture_time: u64::from(index_in_stream) * 1_000,
                offset: 0,
            },
            stream,
            width: 2,
            height: 2,
            format: PixelFormat::Y8,
            stride: 0,
            compression: CompressionType::None,
            frame_number: u64::from(index_in_stream),
            index_in_stream,
            timestamp: 0.0,
            system_time: 0,
            metadata: FrameMetadata::new(),
            pixels: Some(vec![0; 4]),
        })
    }

    fn accel() -> Sample {
        Sample::Motion(MotionSample {
            header: SampleHeader {
                capture_time: 0,
                offset: 0,
            },
            motion: MotionKind::Accel,
            frame_number: 0,
            timestamp: 0.0,
            data: [0.0, 9.8, 0.0],
        })
    }

    const LIMITS: BufferLimits = BufferLimits {
        motion_threshold: 4,
        max_depth: 16,
    };

    fn none_drained(_: StreamKind) -> bool {
        false
    }

    fn with_streams(streams: &[StreamKind]) -> PrefetchBuffer {
        let mut buffer = PrefetchBuffer::new();
        for &stream in streams {
            buffer.enable(ActiveStreamInfo::new(info(stream), 0));
        }
        buffer
    }

    #[test]
    fn needs_a_frame_from_every_active_stream() {
        let mut buffer = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        assert!(!buffer.all_buffered(false, false, LIMITS, none_drained));

        buffer.push(image(StreamKind::Depth, 0));
        buffer.push(image(StreamKind::Depth, 1));
        assert!(!buffer.all_buffered(false, false, LIMITS, none_drained));

        buffer.push(image(StreamKind::Color, 0));
        assert!(buffer.all_buffered(false, false, LIMITS, none_drained));
    }

    #[test]
    fn exhausted_catalog_needs_only_a_queued_sample() {
        let mut buffer = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        assert!(!buffer.all_buffered(true, false, LIMITS, none_drained));
        buffer.push(image(StreamKind::Depth, 0));
        assert!(buffer.all_buffered(true, false, LIMITS, none_drained));
    }

    #[test]
    fn motion_only_playback_uses_threshold() {
        let mut buffer = PrefetchBuffer::new();
        for _ in 0..4 {
            buffer.push(accel());
        }
        assert!(!buffer.all_buffered(false, true, LIMITS, none_drained));
        assert!(buffer.all_buffered(false, false, LIMITS, none_drained));
        buffer.push(accel());
        assert!(buffer.all_buffered(false, true, LIMITS, none_drained));
    }

    #[test]
    fn drained_stream_does_not_hold_back_the_others() {
        let mut buffer = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        buffer.push(image(StreamKind::Depth, 0));
        assert!(!buffer.all_buffered(false, false, LIMITS, none_drained));
        assert!(buffer.all_buffered(false, false, LIMITS, |s| s == StreamKind::Color));

        let empty = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        assert!(!empty.all_buffered(false, false, LIMITS, |_| true));
    }

    #[test]
    fn full_queue_counts_as_buffered() {
        let mut buffer = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        for i in 0..15 {
            buffer.push(image(StreamKind::Depth, i));
        }
        assert!(!buffer.all_buffered(false, false, LIMITS, none_drained));
        buffer.push(image(StreamKind::Depth, 15));
        assert!(buffer.all_buffered(false, false, LIMITS, none_drained));
    }

    #[test]
    fn pop_advances_stream_cursor() {
        let mut buffer = with_streams(&[StreamKind::Depth]);
        buffer.push(image(StreamKind::Depth, 6));
        assert_eq!(buffer.active(StreamKind::Depth).unwrap().buffered, 1);

        buffer.pop().unwrap();
        let entry = buffer.active(StreamKind::Depth).unwrap();
        assert_eq!(entry.buffered, 0);
        assert_eq!(entry.cursor, 7);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn disable_drops_queued_frames_of_that_stream() {
        let mut buffer = with_streams(&[StreamKind::Depth, StreamKind::Color]);
        buffer.push(image(StreamKind::Depth, 0));
        buffer.push(image(StreamKind::Color, 0));
        buffer.push(accel());

        assert!(buffer.disable(StreamKind::Depth));
        assert!(!buffer.disable(StreamKind::Depth));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.front().and_then(Sample::stream), Some(StreamKind::Color));
    }

    #[test]
    fn clear_resets_counts() {
        let mut buffer = with_streams(&[StreamKind::Depth]);
        buffer.push(image(StreamKind::Depth, 0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.active(StreamKind::Depth).unwrap().buffered, 0);
        assert!(buffer.is_active(StreamKind::Depth));
    }
}
