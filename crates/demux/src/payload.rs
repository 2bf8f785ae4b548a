//! Reads the metadata and pixel bytes that follow an image sample header.

use std::io::ErrorKind;

use byteorder::{ByteOrder, LittleEndian};
use rp_common::{DemuxError, FileFormat, FrameMetadata, ImageSample};
use tracing::{trace, warn};

use crate::format::{chunk, record};
use crate::reader::BinaryReader;

/// Payload of one image sample, still in its recorded encoding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramePayload {
    pub metadata: FrameMetadata,
    pub data: Vec<u8>,
}

/// Random-access frame reader.
///
/// Owns its own file handle, independent of the indexer's, so frames can be
/// fetched at catalog offsets while indexing continues further ahead.
#[derive(Debug)]
pub struct PayloadReader {
    reader: BinaryReader,
    format: FileFormat,
}

impl PayloadReader {
    pub fn new(reader: BinaryReader, format: FileFormat) -> Self {
        Self { reader, format }
    }

    /// Read the payload chunks of `frame`.
    ///
    /// Returns `Ok(None)` when the sample carries no pixel data: the next
    /// sample begins first, the data chunk is too short to hold its pitch
    /// table, or the file ends.
    pub fn read_frame(&mut self, frame: &ImageSample) -> Result<Option<FramePayload>, DemuxError> {
        match self.read_chunks(frame.header.offset) {
            Err(DemuxError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(
                    stream = %frame.stream,
                    frame = frame.frame_number,
                    offset = frame.header.offset,
                    "Frame payload truncated"
                );
                Ok(None)
            }
            other => other,
        }
    }

    fn read_chunks(&mut self, offset: u64) -> Result<Option<FramePayload>, DemuxError> {
        self.reader.seek_to(offset)?;
        let mut metadata = FrameMetadata::new();

        loop {
            let at = self.reader.position();
            let Some(chunk) = self.reader.read_chunk_header()? else {
                return Ok(None);
            };
            let size = u64::from(chunk.size);

            match chunk.id {
                chunk::IMAGE_METADATA => {
                    let body = self.reader.read_bytes(size)?;
                    if body.is_empty() {
                        warn!(at, "Empty image metadata chunk");
                    }
                    for entry in body.chunks_exact(record::METADATA_ENTRY as usize) {
                        let (id, value) = entry.split_at(4);
                        metadata.insert(LittleEndian::read_u32(id), LittleEndian::read_f64(value));
                    }
                }
                chunk::SAMPLE_DATA => {
                    let pitch = self.format.pitch_table_len();
                    if size < pitch {
                        warn!(at, size, "Sample data chunk shorter than its pitch table");
                        return Ok(None);
                    }
                    self.reader.skip(pitch)?;
                    let data = self.reader.read_bytes(size - pitch)?;
                    trace!(offset, bytes = data.len(), "Read frame payload");
                    return Ok(Some(FramePayload { metadata, data }));
                }
                chunk::SAMPLE_INFO => return Ok(None),
                _ if size == 0 => return Ok(None),
                _ => self.reader.skip(size)?,
            }
        }
    }
}
