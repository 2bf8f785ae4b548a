//! Error enums of the demux and decode layers.

use thiserror::Error;

use crate::types::CompressionType;

/// Failures reading the capture container.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized capture file identifier {0:?}")]
    BadMagic([u8; 4]),

    #[error("unknown stream id {0} in stream table")]
    UnknownStream(u32),

    /// A sample-info chunk carried a kind outside the known set.
    #[error("unknown sample kind {kind} at offset {offset}")]
    UnknownSampleKind { kind: u32, offset: u64 },

    #[error("malformed record at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

/// Failures turning a compressed payload into pixels.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no decoder available for {0:?}")]
    Unavailable(CompressionType),

    #[error("LZ4 decompression failed: {0}")]
    Lz4(String),

    #[error("decoded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("decoder backend error: {0}")]
    Backend(String),
}
