//! Byte-level access to backup stripe files.
//!
//! A striped `BACKUP DATABASE` writes N files that together form one
//! logical backup. [`StripeSet`] presents them as an ordered sequence with
//! positioned, thread-safe reads; [`BackupStream`] is the buffered
//! sequential view over a single stripe used by the header parser.

mod stream;

pub use stream::BackupStream;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::info;

use bakex_error::{BakError, Result};

struct Stripe {
    path: PathBuf,
    size: u64,
    /// Guards the seek+read pair so concurrent readers never race the
    /// file cursor.
    file: Mutex<File>,
}

/// An ordered set of stripe files with positioned reads.
///
/// Reads past end-of-file return a short count, never an error; the
/// caller decides whether a short page image is usable.
pub struct StripeSet {
    stripes: Vec<Stripe>,
}

impl std::fmt::Debug for StripeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSet").finish_non_exhaustive()
    }
}

impl StripeSet {
    /// Open every stripe for reading and probe its size.
    ///
    /// Fails with a file-io error when a path is missing or the file is
    /// empty. No retry is attempted here.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.is_empty() {
            return Err(BakError::config("at least one stripe file is required"));
        }
        let mut stripes = Vec::with_capacity(paths.len());
        for p in paths {
            let path = p.as_ref().to_path_buf();
            if !path.exists() {
                return Err(BakError::FileNotFound { path });
            }
            let file = File::open(&path)?;
            let size = file.metadata()?.len();
            if size == 0 {
                return Err(BakError::EmptyFile { path });
            }
            info!(path = %path.display(), size, "opened backup stripe");
            stripes.push(Stripe {
                path,
                size,
                file: Mutex::new(file),
            });
        }
        Ok(Self { stripes })
    }

    /// Number of stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Size of one stripe in bytes.
    #[must_use]
    pub fn stripe_size(&self, stripe_index: usize) -> u64 {
        self.stripes.get(stripe_index).map_or(0, |s| s.size)
    }

    /// Path of one stripe.
    #[must_use]
    pub fn stripe_path(&self, stripe_index: usize) -> Option<&Path> {
        self.stripes.get(stripe_index).map(|s| s.path.as_path())
    }

    /// Combined size of all stripes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.stripes.iter().map(|s| s.size).sum()
    }

    /// Positioned read into `buf`. Returns the number of bytes read,
    /// which is short (possibly 0) at end-of-file.
    pub fn read_at(&self, stripe_index: usize, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let stripe = self
            .stripes
            .get(stripe_index)
            .ok_or_else(|| BakError::format(format!("stripe index {stripe_index} out of range")))?;

        if offset >= stripe.size {
            return Ok(0);
        }

        let mut file = stripe.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Read exactly one full buffer; short reads are an error.
    pub fn read_exact_at(&self, stripe_index: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(stripe_index, offset, buf)?;
        if n != buf.len() {
            return Err(BakError::ShortRead {
                expected: buf.len(),
                actual: n,
            });
        }
        Ok(())
    }
}
