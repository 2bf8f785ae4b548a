//! Chunk identifiers and fixed record sizes of the capture format.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Chunk ids.
pub mod chunk {
    pub const DEVICE_INFO: u32 = 1;
    pub const STREAM_INFO: u32 = 2;
    pub const PROPERTIES: u32 = 3;
    pub const SW_INFO: u32 = 4;
    pub const SAMPLE_INFO: u32 = 5;
    pub const SAMPLE_HEADER: u32 = 6;
    pub const IMAGE_METADATA: u32 = 7;
    pub const SAMPLE_DATA: u32 = 8;
}

/// Payload sizes of fixed-width records.
pub mod record {
    pub const STREAM_INFO: u64 = 7 * 4;
    pub const PROPERTY: u64 = 4 + 8;
    pub const SW_INFO: u64 = 8 * 4;
    pub const SAMPLE_INFO: u64 = 4 + 4 + 8;
    pub const IMAGE_HEADER: u64 = 6 * 4 + 8 + 8 + 8;
    pub const MOTION_HEADER: u64 = 4 + 4 + 8 + 3 * 4;
    pub const TIME_HEADER: u64 = 4 + 4 + 8;
    pub const DEBUG_EVENT_HEADER: u64 = 4;
    pub const METADATA_ENTRY: u64 = 4 + 8;
}

/// `{ id, size }` prefix of every chunk (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub id: u32,
    /// Payload bytes following the header.
    pub size: u32,
}

impl ChunkHeader {
    pub const SIZE: u64 = 8;

    pub fn new(id: u32, size: u32) -> Self {
        Self { id, size }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let id = reader.read_u32::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        Ok(Self { id, size })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u32::<LittleEndian>(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn chunk_header_layout_is_id_then_size() {
        let mut buf = Vec::new();
        ChunkHeader::new(chunk::SAMPLE_DATA, 0x0102_0304)
            .write_to(&mut buf)
            .unwrap();
        assert_eq!(buf, [8, 0, 0, 0, 4, 3, 2, 1]);

        let parsed = ChunkHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, ChunkHeader::new(8, 0x0102_0304));
    }

    #[test]
    fn truncated_chunk_header_fails() {
        let err = ChunkHeader::read_from(&mut Cursor::new(&[1u8, 0, 0])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
