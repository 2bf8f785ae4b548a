//! Positioned byte source over a capture file.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::format::ChunkHeader;

/// Buffered reader that tracks its own position so that offsets can be
/// recorded without a syscall per sample.
pub struct BinaryReader {
    inner: BufReader<File>,
    path: PathBuf,
    pos: u64,
    len: u64,
}

impl BinaryReader {
    /// Open a capture file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "Opened capture file handle");
        Ok(Self {
            inner: BufReader::with_capacity(64 * 1024, file),
            path,
            pos: 0,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    /// Move forward by `n` bytes, keeping the read buffer when possible.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let delta = i64::try_from(n)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "skip too large"))?;
        self.inner.seek_relative(delta)?;
        self.pos += n;
        Ok(())
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let value = self.inner.read_u32::<LittleEndian>()?;
        self.pos += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let value = self.inner.read_u64::<LittleEndian>()?;
        self.pos += 8;
        Ok(value)
    }

    /// Read exactly `n` bytes. Fails without allocating if the file does
    /// not hold that many bytes past the current position.
    pub fn read_bytes(&mut self, n: u64) -> io::Result<Vec<u8>> {
        if n > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {n} bytes at offset {} exceeds file length {}",
                    self.pos, self.len
                ),
            ));
        }
        let mut buf = vec![0u8; n as usize];
        self.inner.read_exact(&mut buf)?;
        self.pos += n;
        Ok(buf)
    }

    /// Read the next chunk header, or `None` if fewer than a header's worth
    /// of bytes remain.
    pub fn read_chunk_header(&mut self) -> io::Result<Option<ChunkHeader>> {
        if self.remaining() < ChunkHeader::SIZE {
            return Ok(None);
        }
        let header = ChunkHeader::read_from(&mut self.inner)?;
        self.pos += ChunkHeader::SIZE;
        Ok(Some(header))
    }
}

impl std::fmt::Debug for BinaryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryReader")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("len", &self.len)
            .finish()
    }
}
