//! Frame decompression for captured image streams.
//!
//! Each stream gets its own [`FrameDecoder`] instance, created lazily by a
//! per-compression factory held in a [`DecoderSet`]. Uncompressed frames
//! bypass the decoders entirely.
//!
//! | Compression | Decoder          | Availability            |
//! |-------------|------------------|-------------------------|
//! | none        | (pass-through)   | always                  |
//! | lz4         | [`Lz4Decoder`]   | always                  |
//! | h264        | `H264Decoder`    | `ffmpeg` feature        |

#[cfg(feature = "ffmpeg")]
pub mod h264;
pub mod lz4;
pub mod set;

use rp_common::{DecodeError, ImageSample};

#[cfg(feature = "ffmpeg")]
pub use h264::H264Decoder;
pub use lz4::Lz4Decoder;
pub use set::{DecoderFactory, DecoderSet};

/// Stateful decompressor bound to one stream.
pub trait FrameDecoder: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Decode one frame. The returned buffer holds `frame.decoded_len()`
    /// bytes laid out with `frame.row_stride()` bytes per row.
    fn decode(&mut self, frame: &ImageSample, compressed: &[u8]) -> Result<Vec<u8>, DecodeError>;

    /// Drop any inter-frame state, e.g. after a seek.
    fn reset(&mut self) {}
}
