//! The sample union carried through indexing, prefetch and delivery.
//!
//! Catalog entries and delivered samples are the same type. An image entry
//! in the catalog has `pixels == None`; the engine fills the buffer in a
//! copy of the entry when it materializes the frame. Motion, time and
//! debug-event samples carry their whole payload in the header and are
//! never materialized lazily.

use std::collections::BTreeMap;

use crate::types::{CompressionType, PixelFormat, StreamKind};

/// Raw sample-kind tag as written in the capture file.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Image = 0,
    Motion = 1,
    Time = 2,
    DebugEvent = 3,
}

impl SampleKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Image),
            1 => Some(Self::Motion),
            2 => Some(Self::Time),
            3 => Some(Self::DebugEvent),
            _ => None,
        }
    }
}

/// Fields common to every sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleHeader {
    /// Capture clock in microseconds.
    pub capture_time: u64,
    /// File position where the sample's payload chunks begin.
    pub offset: u64,
}

/// Auxiliary per-frame values keyed by metadata id.
pub type FrameMetadata = BTreeMap<u32, f64>;

/// An image frame. `pixels` is only set once the frame has been materialized.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSample {
    pub header: SampleHeader,
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per row as recorded; 0 means tightly packed.
    pub stride: u32,
    pub compression: CompressionType,
    /// Frame number recorded by the device.
    pub frame_number: u64,
    /// Position of this frame in its stream's index list.
    pub index_in_stream: u32,
    /// Device timestamp in milliseconds.
    pub timestamp: f64,
    pub system_time: u64,
    pub metadata: FrameMetadata,
    pub pixels: Option<Vec<u8>>,
}

impl ImageSample {
    /// Bytes per row of the decoded buffer.
    pub fn row_stride(&self) -> u32 {
        if self.stride > 0 {
            self.stride
        } else {
            self.format.row_bytes(self.width)
        }
    }

    /// Size of a fully decoded frame.
    pub fn decoded_len(&self) -> usize {
        self.row_stride() as usize * self.height as usize
    }

    pub fn is_materialized(&self) -> bool {
        self.pixels.is_some()
    }
}

/// IMU reading source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionKind {
    Accel,
    Gyro,
    Other(u32),
}

impl MotionKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Accel,
            1 => Self::Gyro,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Accel => 0,
            Self::Gyro => 1,
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MotionSample {
    pub header: SampleHeader,
    pub motion: MotionKind,
    pub frame_number: u32,
    pub timestamp: f64,
    pub data: [f32; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimeSample {
    pub header: SampleHeader,
    pub source: u32,
    pub frame_number: u32,
    pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebugEventSample {
    pub header: SampleHeader,
    pub event_id: u32,
    pub message: String,
}

/// One recorded sample.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Image(ImageSample),
    Motion(MotionSample),
    Time(TimeSample),
    DebugEvent(DebugEventSample),
}

impl Sample {
    pub fn header(&self) -> &SampleHeader {
        match self {
            Self::Image(s) => &s.header,
            Self::Motion(s) => &s.header,
            Self::Time(s) => &s.header,
            Self::DebugEvent(s) => &s.header,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Image(_) => SampleKind::Image,
            Self::Motion(_) => SampleKind::Motion,
            Self::Time(_) => SampleKind::Time,
            Self::DebugEvent(_) => SampleKind::DebugEvent,
        }
    }

    pub fn capture_time(&self) -> u64 {
        self.header().capture_time
    }

    pub fn offset(&self) -> u64 {
        self.header().offset
    }

    pub fn as_image(&self) -> Option<&ImageSample> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<ImageSample> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Stream of an image sample; `None` for every other kind.
    pub fn stream(&self) -> Option<StreamKind> {
        self.as_image().map(|image| image.stream)
    }
}
