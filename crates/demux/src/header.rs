//! File header and header-region chunks.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use rp_common::{
    CaptureMode, CompressionType, DemuxError, DeviceInfo, FileFormat, FileHeader, PixelFormat,
    StreamInfo, StreamKind, SwInfo, Version,
};
use tracing::{debug, info, warn};

use crate::format::{chunk, record};
use crate::reader::BinaryReader;

/// Everything recorded ahead of the first frame.
#[derive(Clone, Debug)]
pub struct CaptureHeaders {
    pub file: FileHeader,
    pub streams: BTreeMap<StreamKind, StreamInfo>,
    pub sw_info: SwInfo,
    pub device: DeviceInfo,
    /// Recorded device options, keyed by option id.
    pub properties: BTreeMap<u32, f64>,
}

/// Parse the file header and the chunks up to `first_frame_offset`.
///
/// Leaves the reader positioned at `first_frame_offset`.
pub fn read_headers(reader: &mut BinaryReader) -> Result<CaptureHeaders, DemuxError> {
    reader.seek_to(0)?;
    let file = read_file_header(reader)?;

    let mut headers = CaptureHeaders {
        file,
        streams: BTreeMap::new(),
        sw_info: SwInfo::default(),
        device: DeviceInfo::default(),
        properties: BTreeMap::new(),
    };

    while reader.position() < headers.file.first_frame_offset {
        let at = reader.position();
        let Some(chunk) = reader.read_chunk_header()? else {
            break;
        };
        let body = reader.read_bytes(u64::from(chunk.size))?;
        match chunk.id {
            chunk::DEVICE_INFO => headers.device = parse_device_info(&body),
            chunk::STREAM_INFO => {
                headers.streams = parse_stream_infos(&body, headers.file.nstreams)?;
            }
            chunk::PROPERTIES => headers.properties = parse_properties(&body)?,
            chunk::SW_INFO => headers.sw_info = parse_sw_info(&body, at)?,
            other => debug!(id = other, size = chunk.size, at, "Skipping header chunk"),
        }
    }

    if headers.streams.len() != headers.file.nstreams as usize {
        warn!(
            declared = headers.file.nstreams,
            found = headers.streams.len(),
            "Stream table does not match declared stream count"
        );
    }

    reader.seek_to(headers.file.first_frame_offset)?;

    info!(
        format = ?headers.file.format,
        version = headers.file.version,
        streams = headers.streams.len(),
        capture_mode = ?headers.file.capture_mode,
        sdk = %headers.sw_info.sdk,
        driver = %headers.sw_info.driver,
        "Read capture headers"
    );

    Ok(headers)
}

fn read_file_header(reader: &mut BinaryReader) -> Result<FileHeader, DemuxError> {
    let raw = reader.read_bytes(FileHeader::SIZE)?;
    let mut cur = Cursor::new(&raw[..]);

    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic)?;
    let format = FileFormat::from_magic(magic).ok_or(DemuxError::BadMagic(magic))?;

    let version = cur.read_u32::<LittleEndian>()?;
    let first_frame_offset = u64::from(cur.read_u32::<LittleEndian>()?);
    let nstreams = cur.read_u32::<LittleEndian>()?;
    let file_size = cur.read_u64::<LittleEndian>()?;
    let capture_mode = CaptureMode::from_raw(cur.read_u32::<LittleEndian>()?);
    let coordinate_system = cur.read_u32::<LittleEndian>()?;

    if first_frame_offset < FileHeader::SIZE {
        return Err(DemuxError::Malformed {
            offset: 8,
            reason: format!("first frame offset {first_frame_offset} lies inside the file header"),
        });
    }

    Ok(FileHeader {
        magic,
        format,
        version,
        first_frame_offset,
        nstreams,
        file_size,
        capture_mode,
        coordinate_system,
    })
}

fn parse_device_info(body: &[u8]) -> DeviceInfo {
    let mut parts = body
        .split(|b| *b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());
    DeviceInfo {
        name: parts.next().unwrap_or_default(),
        serial: parts.next().unwrap_or_default(),
        firmware: parts.next().unwrap_or_default(),
    }
}

fn parse_stream_infos(
    body: &[u8],
    nstreams: u32,
) -> Result<BTreeMap<StreamKind, StreamInfo>, DemuxError> {
    let available = body.len() as u64 / record::STREAM_INFO;
    let count = available.min(u64::from(nstreams));
    let mut cur = Cursor::new(body);
    let mut streams = BTreeMap::new();

    for _ in 0..count {
        let raw_stream = cur.read_u32::<LittleEndian>()?;
        let stream = StreamKind::from_raw(raw_stream).ok_or(DemuxError::UnknownStream(raw_stream))?;
        let info = StreamInfo {
            stream,
            width: cur.read_u32::<LittleEndian>()?,
            height: cur.read_u32::<LittleEndian>()?,
            format: PixelFormat::from_raw(cur.read_u32::<LittleEndian>()?),
            framerate: cur.read_u32::<LittleEndian>()?,
            frame_count: cur.read_u32::<LittleEndian>()?,
            compression: CompressionType::from_raw(cur.read_u32::<LittleEndian>()?),
        };
        debug!(
            stream = %info.stream,
            width = info.width,
            height = info.height,
            format = ?info.format,
            fps = info.framerate,
            frames = info.frame_count,
            compression = ?info.compression,
            "Stream info"
        );
        streams.insert(stream, info);
    }

    Ok(streams)
}

fn parse_properties(body: &[u8]) -> Result<BTreeMap<u32, f64>, DemuxError> {
    let mut cur = Cursor::new(body);
    let mut properties = BTreeMap::new();
    for _ in 0..body.len() as u64 / record::PROPERTY {
        let option = cur.read_u32::<LittleEndian>()?;
        let value = cur.read_f64::<LittleEndian>()?;
        properties.insert(option, value);
    }
    Ok(properties)
}

fn parse_sw_info(body: &[u8], at: u64) -> Result<SwInfo, DemuxError> {
    if (body.len() as u64) < record::SW_INFO {
        return Err(DemuxError::Malformed {
            offset: at,
            reason: format!("sw info chunk holds {} bytes", body.len()),
        });
    }
    let mut cur = Cursor::new(body);
    let mut version = || -> std::io::Result<Version> {
        Ok(Version {
            major: cur.read_u32::<LittleEndian>()?,
            minor: cur.read_u32::<LittleEndian>()?,
            patch: cur.read_u32::<LittleEndian>()?,
            build: cur.read_u32::<LittleEndian>()?,
        })
    };
    let sdk = version()?;
    let driver = version()?;
    Ok(SwInfo { sdk, driver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::CaptureBuilder;

    fn depth_info() -> StreamInfo {
        StreamInfo {
            stream: StreamKind::Depth,
            width: 4,
            height: 2,
            format: PixelFormat::Z16,
            framerate: 30,
            frame_count: 0,
            compression: CompressionType::None,
        }
    }

    #[test]
    fn reads_header_region() {
        let mut builder = CaptureBuilder::sdk();
        builder
            .stream(depth_info())
            .capture_mode(CaptureMode::Synced)
            .device(DeviceInfo {
                name: "Camera".into(),
                serial: "0042".into(),
                firmware: "2.1".into(),
            })
            .sw_info(SwInfo {
                sdk: Version::new(10, 0, 26),
                driver: Version::new(1, 9, 6),
            })
            .property(65, 3.0);
        let file = builder.write_temp().unwrap();

        let mut reader = BinaryReader::open(file.path()).unwrap();
        let headers = read_headers(&mut reader).unwrap();

        assert_eq!(headers.file.format, FileFormat::RsSdk);
        assert_eq!(headers.file.capture_mode, CaptureMode::Synced);
        assert_eq!(headers.streams.len(), 1);
        assert_eq!(headers.streams[&StreamKind::Depth], depth_info());
        assert_eq!(headers.device.serial, "0042");
        assert_eq!(headers.sw_info.sdk.to_string(), "10.0.26");
        assert_eq!(headers.sw_info.driver.to_string(), "1.9.6");
        assert_eq!(headers.properties.get(&65), Some(&3.0));
        assert_eq!(reader.position(), headers.file.first_frame_offset);
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut bytes = CaptureBuilder::linux().build();
        bytes[0..4].copy_from_slice(b"RIFF");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &bytes).unwrap();

        let mut reader = BinaryReader::open(file.path()).unwrap();
        let err = read_headers(&mut reader).unwrap_err();
        assert!(matches!(err, DemuxError::BadMagic(m) if &m == b"RIFF"));
    }

    #[test]
    fn truncated_header_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"RSL2\x01\x00").unwrap();
        let mut reader = BinaryReader::open(file.path()).unwrap();
        assert!(matches!(read_headers(&mut reader), Err(DemuxError::Io(_))));
    }

    #[test]
    fn unknown_header_chunks_are_skipped() {
        let mut builder = CaptureBuilder::linux();
        builder.header_chunk(77, vec![1, 2, 3, 4, 5]).stream(depth_info());
        let file = builder.write_temp().unwrap();

        let mut reader = BinaryReader::open(file.path()).unwrap();
        let headers = read_headers(&mut reader).unwrap();
        assert!(headers.streams.contains_key(&StreamKind::Depth));
    }
}
