//! Buffered sequential view over a single stripe.
//!
//! Only the MTF header parser uses this; it never multi-threads, so the
//! stream keeps a plain cursor plus a read-ahead buffer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use bakex_error::{BakError, Result};

const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// A forward-reading, seekable byte stream over one backup file.
pub struct BackupStream {
    file: File,
    file_size: u64,
    buffer: Vec<u8>,
    buf_pos: usize,
    buf_len: usize,
    logical_pos: u64,
}

impl BackupStream {
    /// Open a stripe file for sequential reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffer_size(path, DEFAULT_BUFFER_SIZE)
    }

    /// Open with an explicit read-ahead buffer size.
    pub fn with_buffer_size(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BakError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size == 0 {
            return Err(BakError::EmptyFile {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), file_size, "opened backup stream");
        Ok(Self {
            file,
            file_size,
            buffer: vec![0u8; buffer_size.max(512)],
            buf_pos: 0,
            buf_len: 0,
            logical_pos: 0,
        })
    }

    /// Current logical position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.logical_pos
    }

    /// Total file size.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Whether the logical position has reached end-of-file.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.logical_pos >= self.file_size
    }

    /// Fraction of the file consumed, in `[0.0, 1.0]`.
    #[must_use]
    pub fn progress_fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        self.logical_pos as f64 / self.file_size as f64
    }

    fn refill(&mut self) -> Result<()> {
        let n = self.file.read(&mut self.buffer)?;
        self.buf_len = n;
        self.buf_pos = 0;
        Ok(())
    }

    /// Read up to `dest.len()` bytes; short at end-of-file.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < dest.len() {
            if self.buf_pos >= self.buf_len {
                self.refill()?;
                if self.buf_len == 0 {
                    break;
                }
            }
            let avail = self.buf_len - self.buf_pos;
            let chunk = avail.min(dest.len() - total);
            dest[total..total + chunk]
                .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + chunk]);
            self.buf_pos += chunk;
            self.logical_pos += chunk as u64;
            total += chunk;
        }
        Ok(total)
    }

    /// Read exactly `dest.len()` bytes or fail with a short-read error.
    pub fn read_exact(&mut self, dest: &mut [u8]) -> Result<()> {
        let n = self.read(dest)?;
        if n != dest.len() {
            return Err(BakError::ShortRead {
                expected: dest.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Read `count` bytes into a fresh buffer; the result is short at EOF.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; count];
        let got = self.read(&mut data)?;
        data.truncate(got);
        Ok(data)
    }

    /// Skip forward `count` bytes, consuming the buffer where possible.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        let buffered = (self.buf_len - self.buf_pos) as u64;
        if count <= buffered {
            self.buf_pos += count as usize;
            self.logical_pos += count;
            return Ok(());
        }
        let target = self.logical_pos + count;
        self.seek(target)
    }

    /// Reposition to an absolute offset; the buffer is discarded.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.logical_pos = offset;
        self.buf_pos = 0;
        self.buf_len = 0;
        Ok(())
    }

    /// Read `dest.len()` bytes without advancing the position.
    ///
    /// Returns `false` when not enough bytes remain.
    pub fn peek(&mut self, dest: &mut [u8]) -> Result<bool> {
        let saved = self.logical_pos;
        if saved + dest.len() as u64 > self.file_size {
            return Ok(false);
        }
        // A peek that fits entirely in the buffered window avoids a seek.
        let buffered = self.buf_len - self.buf_pos;
        if dest.len() <= buffered {
            dest.copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + dest.len()]);
            return Ok(true);
        }
        self.read_exact(dest)?;
        self.seek(saved)?;
        Ok(true)
    }
}
