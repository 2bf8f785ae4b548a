//! Capture file demuxing: header parsing, incremental indexing, the sample
//! catalog and the frame payload reader.
//!
//! ```text
//!   BinaryReader ──► read_headers ──► CaptureHeaders
//!   BinaryReader ──► Indexer ──► IndexBatch ──► SampleCatalog
//!   BinaryReader ──► PayloadReader ──► FramePayload (raw / compressed bytes)
//! ```
//!
//! The indexer and the payload reader each own a separate [`BinaryReader`]
//! over the same file so that scanning ahead never disturbs a frame read.

pub mod catalog;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod format;
pub mod header;
pub mod index;
pub mod payload;
pub mod reader;
pub mod sync;

pub use catalog::{DropStats, SampleCatalog};
pub use header::{read_headers, CaptureHeaders};
pub use index::{IndexBatch, Indexer};
pub use payload::{FramePayload, PayloadReader};
pub use reader::BinaryReader;
pub use sync::detect_capture_mode;
