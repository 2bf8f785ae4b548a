//! Append-only catalog of indexed samples.

use std::collections::{BTreeMap, HashMap};

use rp_common::{ImageSample, Sample, StreamKind};

use crate::index::IndexBatch;

/// Frames lost during recording, inferred from gaps in device frame numbers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DropStats {
    pub per_stream: BTreeMap<StreamKind, u64>,
    /// Gaps in motion frame numbers, summed over all IMU sources.
    pub motion: u64,
}

impl DropStats {
    pub fn total_frames(&self) -> u64 {
        self.per_stream.values().sum()
    }

    fn record_image(&mut self, last: Option<u64>, stream: StreamKind, frame_number: u64) {
        if let Some(last) = last {
            let gap = frame_number.saturating_sub(last).saturating_sub(1);
            if gap > 0 {
                *self.per_stream.entry(stream).or_default() += gap;
            }
        }
    }
}

/// All samples discovered so far, in file order, plus a per-stream index of
/// image positions.
///
/// Entries are never reordered or removed except by [`SampleCatalog::clear`].
#[derive(Debug, Default)]
pub struct SampleCatalog {
    samples: Vec<Sample>,
    per_stream: BTreeMap<StreamKind, Vec<usize>>,
    complete: bool,
    drops: DropStats,
    last_frame: BTreeMap<StreamKind, u64>,
    last_motion: HashMap<u32, u32>,
}

impl SampleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch in order, assigning each image its position in its
    /// stream.
    pub fn append(&mut self, batch: IndexBatch) {
        for mut sample in batch.samples {
            let idx = self.samples.len();
            match &mut sample {
                Sample::Image(image) => {
                    let list = self.per_stream.entry(image.stream).or_default();
                    image.index_in_stream = list.len() as u32;
                    list.push(idx);

                    let last = self.last_frame.insert(image.stream, image.frame_number);
                    self.drops.record_image(last, image.stream, image.frame_number);
                }
                Sample::Motion(motion) => {
                    let source = motion.motion.to_raw();
                    if let Some(last) = self.last_motion.insert(source, motion.frame_number) {
                        let gap = motion.frame_number.saturating_sub(last).saturating_sub(1);
                        self.drops.motion += u64::from(gap);
                    }
                }
                Sample::Time(_) | Sample::DebugEvent(_) => {}
            }
            self.samples.push(sample);
        }
        self.complete |= batch.complete;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True once the indexer has reached the end of the file.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn get(&self, idx: usize) -> Option<&Sample> {
        self.samples.get(idx)
    }

    pub fn image(&self, idx: usize) -> Option<&ImageSample> {
        self.get(idx).and_then(Sample::as_image)
    }

    /// Number of indexed frames of `stream`.
    pub fn stream_len(&self, stream: StreamKind) -> usize {
        self.per_stream.get(&stream).map_or(0, Vec::len)
    }

    /// Catalog index of the `n`-th frame of `stream`.
    pub fn stream_position(&self, stream: StreamKind, n: usize) -> Option<usize> {
        self.per_stream.get(&stream)?.get(n).copied()
    }

    pub fn stream_indices(&self, stream: StreamKind) -> &[usize] {
        self.per_stream.get(&stream).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn drops(&self) -> &DropStats {
        &self.drops
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
