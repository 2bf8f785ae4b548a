//! Shared types for the recorded-session playback engine.
//!
//! Everything that crosses a crate boundary lives here: the stream and
//! pixel-format enums read from the capture header, the [`Sample`] union
//! produced by the indexer and delivered by the engine, and the error
//! enums of the demux and decode layers.

pub mod error;
pub mod sample;
pub mod types;

pub use error::{DecodeError, DemuxError};
pub use sample::{
    DebugEventSample, FrameMetadata, ImageSample, MotionKind, MotionSample, Sample, SampleHeader,
    SampleKind, TimeSample,
};
pub use types::{
    CaptureMode, CompressionType, DeviceInfo, FileFormat, FileHeader, FileInfo, PixelFormat,
    StreamInfo, StreamKind, SwInfo, Version,
};
