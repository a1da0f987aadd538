//! Byte sources, and the producers that cut them into newline-aligned chunks.
//!
//! Two kinds of source feed the same pipeline through [ChunkSource]:
//! a sequential reader, whose bytes are copied into pooled buffers, and a
//! memory-mapped file, whose chunks are sub-slices of the mapping.

use std::{
    fs::File,
    io::{self, Read},
    mem,
    ops::Deref,
    path::Path,
};

use memchr::memrchr;
use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use crate::{
    error::BrcError,
    pool::{BufferPool, PooledBuf},
};

/// A run of complete records: starts at a record boundary and ends right after a newline.
/// Dropping a chunk hands its memory back, to the pool or to the OS.
pub struct Chunk<'a> {
    offset: u64,
    data: ChunkData<'a>,
}

enum ChunkData<'a> {
    Pooled(PooledBuf<'a>),
    Mapped {
        bytes: &'a [u8],
        file: Option<&'a MappedFile>,
    },
}

impl<'a> Chunk<'a> {
    fn pooled(offset: u64, buf: PooledBuf<'a>) -> Self {
        Self {
            offset,
            data: ChunkData::Pooled(buf),
        }
    }

    fn mapped(offset: u64, bytes: &'a [u8], file: Option<&'a MappedFile>) -> Self {
        Self {
            offset,
            data: ChunkData::Mapped { bytes, file },
        }
    }

    /// Position of the chunk's first byte in the source
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Deref for Chunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            ChunkData::Pooled(buf) => buf,
            ChunkData::Mapped { bytes, .. } => bytes,
        }
    }
}

impl Drop for Chunk<'_> {
    fn drop(&mut self) {
        // pooled buffers return themselves
        if let ChunkData::Mapped {
            bytes,
            file: Some(file),
        } = &self.data
        {
            file.release(self.offset as usize, bytes.len());
        }
    }
}

/// Anything that can be cut into [Chunk]s. Runs on the producer thread.
pub trait ChunkSource<'a>: Send {
    /// The next chunk, or `None` once the source is exhausted
    fn next_chunk(&mut self) -> Result<Option<Chunk<'a>>, BrcError>;
}

/// Where the bytes after the last emitted newline are
enum Carry<'a> {
    /// the previous chunk ended on a record boundary
    Empty,
    /// a partial record, already at the front of the next chunk's buffer
    Partial(PooledBuf<'a>),
    /// end of input was reached and everything was emitted
    Exhausted,
}

/// Produces chunks from a sequential reader, copying bytes into pooled buffers.
pub struct StreamChunker<'a, R> {
    reader: R,
    pool: &'a BufferPool,
    carry: Carry<'a>,
    offset: u64,
}

impl<'a, R: Read> StreamChunker<'a, R> {
    pub fn new(reader: R, pool: &'a BufferPool) -> Self {
        Self {
            reader,
            pool,
            carry: Carry::Empty,
            offset: 0,
        }
    }
}

impl<'a, R: Read + Send> ChunkSource<'a> for StreamChunker<'a, R> {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'a>>, BrcError> {
        let mut buf = match mem::replace(&mut self.carry, Carry::Exhausted) {
            Carry::Exhausted => return Ok(None),
            Carry::Empty => self.pool.acquire(),
            Carry::Partial(buf) => buf,
        };
        let chunk_size = self.pool.chunk_size();
        let offset = self.offset;

        let mut at_eof = fill(&mut self.reader, &mut buf, chunk_size).map_err(BrcError::Read)?;
        let last_newline = memrchr(b'\n', &buf);
        if last_newline.is_none() && !at_eof {
            // a final record may fill the buffer exactly, as long as nothing follows it
            at_eof = at_end(&mut self.reader).map_err(BrcError::Read)?;
        }
        if at_eof {
            if buf.is_empty() {
                return Ok(None);
            }
            self.offset += buf.len() as u64;
            // the last line may lack its newline; buffers have a spare byte for it
            if buf.last() != Some(&b'\n') {
                buf.push(b'\n');
            }
            return Ok(Some(Chunk::pooled(offset, buf)));
        }

        let Some(last_newline) = last_newline else {
            return Err(BrcError::RecordTooLong {
                offset,
                limit: chunk_size,
            });
        };
        let end = last_newline + 1;
        if end < buf.len() {
            let mut next = self.pool.acquire();
            next.extend_from_slice(&buf[end..]);
            buf.truncate(end);
            self.carry = Carry::Partial(next);
        } else {
            self.carry = Carry::Empty;
        }
        self.offset += end as u64;
        Ok(Some(Chunk::pooled(offset, buf)))
    }
}

/// Appends to `buf` until it holds `limit` bytes or the reader is exhausted.
/// Returns whether end of input was hit.
fn fill(reader: &mut impl Read, buf: &mut Vec<u8>, limit: usize) -> io::Result<bool> {
    let wanted = limit.saturating_sub(buf.len());
    // reads straight into the spare capacity, so recycled buffers aren't zeroed again
    let got = reader.by_ref().take(wanted as u64).read_to_end(buf)?;
    Ok(got < wanted)
}

/// Whether `reader` has nothing left. Consumes at most one byte.
fn at_end(reader: &mut impl Read) -> io::Result<bool> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(n) => return Ok(n == 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// A read-only memory mapping of a whole file
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BrcError> {
        let path = path.as_ref();
        let open_err = |source| BrcError::Open {
            path: path.to_owned(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        // SAFETY: the mapping is only ever read. Like any mmap reader, we rely on nobody
        // truncating the file while it is mapped.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(open_err)?;

        #[cfg(unix)]
        if let Err(e) = mmap.advise(memmap2::Advice::Sequential) {
            debug!("madvise(sequential) failed: {e}");
        }
        Ok(Self { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Tells the OS the pages under `offset..offset + len` won't be needed again.
    /// Saves the kernel from tearing down the whole mapping at exit.
    fn release(&self, offset: usize, len: usize) {
        #[cfg(unix)]
        {
            // SAFETY: the mapping is shared and read-only, so dropped pages are simply
            // re-read from the page cache should anything touch them again.
            let res = unsafe {
                self.mmap
                    .unchecked_advise_range(memmap2::UncheckedAdvice::DontNeed, offset, len)
            };
            if let Err(e) = res {
                warn!(offset, len, "madvise(dontneed) failed: {e}");
            }
        }
        #[cfg(not(unix))]
        let _ = (offset, len);
    }
}

/// Produces chunks that borrow directly from a mapped (or in-memory) input.
pub struct MappedChunker<'a> {
    input: &'a [u8],
    file: Option<&'a MappedFile>,
    pool: &'a BufferPool,
    pos: usize,
}

impl<'a> MappedChunker<'a> {
    /// Chunks of `file` are released back to the OS once consumed
    pub fn new(file: &'a MappedFile, pool: &'a BufferPool) -> Self {
        Self {
            input: file.as_bytes(),
            file: Some(file),
            pool,
            pos: 0,
        }
    }

    /// Chunks an in-memory input; nothing is released
    pub fn from_slice(input: &'a [u8], pool: &'a BufferPool) -> Self {
        Self {
            input,
            file: None,
            pool,
            pos: 0,
        }
    }
}

impl<'a> ChunkSource<'a> for MappedChunker<'a> {
    fn next_chunk(&mut self) -> Result<Option<Chunk<'a>>, BrcError> {
        let input: &'a [u8] = self.input;
        let remaining = &input[self.pos..];
        if remaining.is_empty() {
            return Ok(None);
        }
        let chunk_size = self.pool.chunk_size();
        let start = self.pos;

        if remaining.len() <= chunk_size {
            self.pos = input.len();
            if remaining.last() == Some(&b'\n') {
                return Ok(Some(Chunk::mapped(start as u64, remaining, self.file)));
            }
            // can't append to the mapping, so the unterminated tail gets copied
            let mut buf = self.pool.acquire();
            buf.extend_from_slice(remaining);
            buf.push(b'\n');
            if let Some(file) = self.file {
                file.release(start, remaining.len());
            }
            return Ok(Some(Chunk::pooled(start as u64, buf)));
        }

        let Some(last_newline) = memrchr(b'\n', &remaining[..chunk_size]) else {
            return Err(BrcError::RecordTooLong {
                offset: start as u64,
                limit: chunk_size,
            });
        };
        let chunk = &remaining[..=last_newline];
        self.pos += chunk.len();
        Ok(Some(Chunk::mapped(start as u64, chunk, self.file)))
    }
}
