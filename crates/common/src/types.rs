//! Header-level records: streams, formats, versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Physical image stream recorded in a capture file.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Depth = 0,
    Color = 1,
    Infrared = 2,
    Infrared2 = 3,
    Fisheye = 4,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Depth,
        StreamKind::Color,
        StreamKind::Infrared,
        StreamKind::Infrared2,
        StreamKind::Fisheye,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Depth => "depth",
            Self::Color => "color",
            Self::Infrared => "infrared",
            Self::Infrared2 => "infrared2",
            Self::Fisheye => "fisheye",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stream '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Pixel formats
// ---------------------------------------------------------------------------

/// Pixel layout of an image stream.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Any = 0,
    Z16 = 1,
    Disparity16 = 2,
    Xyz32f = 3,
    Yuyv = 4,
    Rgb8 = 5,
    Bgr8 = 6,
    Rgba8 = 7,
    Bgra8 = 8,
    Y8 = 9,
    Y16 = 10,
    Raw10 = 11,
    Raw16 = 12,
    Raw8 = 13,
}

impl PixelFormat {
    /// Unknown values map to [`PixelFormat::Any`].
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Z16,
            2 => Self::Disparity16,
            3 => Self::Xyz32f,
            4 => Self::Yuyv,
            5 => Self::Rgb8,
            6 => Self::Bgr8,
            7 => Self::Rgba8,
            8 => Self::Bgra8,
            9 => Self::Y8,
            10 => Self::Y16,
            11 => Self::Raw10,
            12 => Self::Raw16,
            13 => Self::Raw8,
            _ => Self::Any,
        }
    }

    /// Bits per pixel; 0 for [`PixelFormat::Any`].
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Y8 | Self::Raw8 => 8,
            Self::Raw10 => 10,
            Self::Z16 | Self::Disparity16 | Self::Yuyv | Self::Y16 | Self::Raw16 => 16,
            Self::Rgb8 | Self::Bgr8 => 24,
            Self::Rgba8 | Self::Bgra8 => 32,
            Self::Xyz32f => 96,
        }
    }

    /// Tightly packed row size in bytes for the given width.
    pub fn row_bytes(&self, width: u32) -> u32 {
        (width * self.bits_per_pixel()).div_ceil(8)
    }
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Per-stream payload compression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    H264,
    Lz4,
    /// A value this reader does not know. Materializing such a frame is fatal.
    Unsupported(u32),
}

impl CompressionType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::H264,
            2 => Self::Lz4,
            other => Self::Unsupported(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::H264 => 1,
            Self::Lz4 => 2,
            Self::Unsupported(raw) => raw,
        }
    }
}

// ---------------------------------------------------------------------------
// File-level metadata
// ---------------------------------------------------------------------------

/// Whether samples of different streams share capture timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Unknown,
    Synced,
    Asynced,
}

impl CaptureMode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Synced,
            2 => Self::Asynced,
            _ => Self::Unknown,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Synced => 1,
            Self::Asynced => 2,
        }
    }
}

/// Binary dialect selected by the header identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    /// `RSCF` files written by the SDK recorder.
    RsSdk,
    /// `RSL1` / `RSL2` files written by the Linux recorder.
    Linux,
}

impl FileFormat {
    pub const SDK_MAGIC: [u8; 4] = *b"RSCF";
    pub const LINUX_V1_MAGIC: [u8; 4] = *b"RSL1";
    pub const LINUX_V2_MAGIC: [u8; 4] = *b"RSL2";

    pub fn from_magic(magic: [u8; 4]) -> Option<Self> {
        match &magic {
            b"RSCF" => Some(Self::RsSdk),
            b"RSL1" | b"RSL2" => Some(Self::Linux),
            _ => None,
        }
    }

    /// Bytes of per-plane pitch values leading every sample-data chunk.
    pub fn pitch_table_len(&self) -> u64 {
        match self {
            Self::RsSdk => 4 * 4,
            Self::Linux => 0,
        }
    }
}

/// A `major.minor.patch.build` version quadruple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build: 0,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Versions of the software that produced the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwInfo {
    pub sdk: Version,
    pub driver: Version,
}

/// Identity of the recording device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub firmware: String,
}

/// Fixed record at the start of every capture file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub format: FileFormat,
    pub version: u32,
    pub first_frame_offset: u64,
    pub nstreams: u32,
    pub file_size: u64,
    pub capture_mode: CaptureMode,
    pub coordinate_system: u32,
}

impl FileHeader {
    pub const SIZE: u64 = 32;
}

/// Declared properties of one recorded stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream: StreamKind,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub framerate: u32,
    /// Declared frame count; 0 means it has to be counted by indexing.
    pub frame_count: u32,
    pub compression: CompressionType,
}

/// Summary returned by the engine's file query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub format: FileFormat,
    pub capture_mode: CaptureMode,
    pub version: u32,
    pub sdk_version: String,
    pub driver_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_kind_round_trips_raw_ids() {
        for kind in StreamKind::ALL {
            assert_eq!(StreamKind::from_raw(kind as u32), Some(kind));
        }
        assert_eq!(StreamKind::from_raw(5), None);
    }

    #[test]
    fn stream_kind_parses_names() {
        assert_eq!("Color".parse::<StreamKind>(), Ok(StreamKind::Color));
        assert_eq!(" depth ".parse::<StreamKind>(), Ok(StreamKind::Depth));
        assert!("thermal".parse::<StreamKind>().is_err());
    }

    #[test]
    fn compression_keeps_unknown_values() {
        assert_eq!(CompressionType::from_raw(2), CompressionType::Lz4);
        assert_eq!(CompressionType::from_raw(9), CompressionType::Unsupported(9));
        assert_eq!(CompressionType::Unsupported(9).to_raw(), 9);
    }

    #[test]
    fn magic_selects_dialect() {
        assert_eq!(FileFormat::from_magic(*b"RSCF"), Some(FileFormat::RsSdk));
        assert_eq!(FileFormat::from_magic(*b"RSL2"), Some(FileFormat::Linux));
        assert_eq!(FileFormat::from_magic(*b"MP4 "), None);
        assert_eq!(FileFormat::RsSdk.pitch_table_len(), 16);
        assert_eq!(FileFormat::Linux.pitch_table_len(), 0);
    }

    #[test]
    fn row_bytes_rounds_up_packed_formats() {
        assert_eq!(PixelFormat::Z16.row_bytes(640), 1280);
        assert_eq!(PixelFormat::Rgb8.row_bytes(4), 12);
        assert_eq!(PixelFormat::Raw10.row_bytes(3), 4);
    }

    #[test]
    fn version_display_omits_build() {
        let v = Version {
            major: 10,
            minor: 2,
            patch: 7,
            build: 99,
        };
        assert_eq!(v.to_string(), "10.2.7");
    }
}
