use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::format::{BagHeader, IndexEntry, ENTRY_SIZE, HEADER_SIZE};

/// Append-only writer for bag files.
///
/// # Write contract
/// Call [`append`] any number of times; each call stores one record and
/// returns its index. Call [`flush`] to make everything appended so far
/// durable and visible to readers, and [`close`] when done.
///
/// # Format layout written
/// ```text
/// [HEADER: 32 bytes]                   ← placeholder, rewritten on every flush
/// [RECORD 0] [RECORD 1] ... [RECORD K]  ← appended back to back
/// [INDEX: 24 bytes × K+1]               ← written by flush
/// [RECORD K+1] ...                      ← appends after a flush go past the old index
/// [INDEX: 24 bytes × N]                 ← final flush
/// ```
///
/// An index copy is never overwritten, and the header is only rewritten after
/// the new index is synced. A crash at any point leaves a header naming a
/// complete index, so only records appended since the last flush are lost.
pub struct BagWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    /// In-memory record index, written out in full on every flush.
    entries: Vec<IndexEntry>,
    /// Next write position in the file.
    cursor: u64,
    /// Number of records covered by the on-disk header.
    flushed: u64,
    /// Set after a failed write. The handle is gone and stays gone.
    poisoned: bool,
}

impl BagWriter {
    /// Create a new bag at `path`, truncating any existing file.
    ///
    /// The file is immediately a valid empty bag.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufWriter::new(File::create(&path)?);
        let header = BagHeader {
            index_offset: HEADER_SIZE,
            count: 0,
            index_checksum: xxh3_64(&[]),
        };
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        debug!(path = %path.display(), "created bag");
        Ok(Self {
            path,
            file: Some(file),
            entries: Vec::new(),
            cursor: HEADER_SIZE,
            flushed: 0,
            poisoned: false,
        })
    }

    /// Append one record and return its index.
    ///
    /// If the write fails the writer is poisoned: every later call returns
    /// [`Error::Poisoned`] and the header is never rewritten, so the bag still
    /// reads as of its last successful flush.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let file = self.handle()?;
        if let Err(err) = file.write_all(data) {
            return Err(self.poison(err));
        }

        let index = self.entries.len() as u64;
        self.entries.push(IndexEntry {
            offset: self.cursor,
            length: data.len() as u64,
            checksum: xxh3_64(data),
        });
        self.cursor += data.len() as u64;
        Ok(index)
    }

    /// Number of records appended so far, flushed or not.
    #[inline]
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write the full index after the data, sync, then point the header at it.
    ///
    /// A no-op when nothing was appended since the last flush. A failure at
    /// any step poisons the writer, like a failed [`append`](Self::append).
    pub fn flush(&mut self) -> Result<()> {
        let count = self.entries.len() as u64;
        self.handle()?;
        if count == self.flushed {
            return Ok(());
        }

        let index_offset = self.cursor;
        let mut index = Vec::with_capacity((count * ENTRY_SIZE) as usize);
        for entry in &self.entries {
            index.extend_from_slice(&entry.to_bytes());
        }
        let header = BagHeader {
            index_offset,
            count,
            index_checksum: xxh3_64(&index),
        };
        let index_end = index_offset + index.len() as u64;
        let file = self.handle()?;
        if let Err(err) = commit(file, &index, &header, index_end) {
            return Err(self.poison(err));
        }

        self.cursor = index_end;
        self.flushed = count;
        debug!(path = %self.path.display(), records = count, "flushed bag");
        Ok(())
    }

    /// Flush and release the file. Calling `close` twice is a no-op.
    ///
    /// Closing a poisoned writer reports the poisoning and writes nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned("bag writer"));
        }
        if self.file.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.file = None;
        Ok(())
    }

    /// Release the handle without flushing, leaving the file as of its last
    /// flush. Used when a sibling bag failed and this one must not advance.
    pub(crate) fn abandon(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.into_parts();
        }
    }

    fn handle(&mut self) -> Result<&mut BufWriter<File>> {
        if self.poisoned {
            return Err(Error::Poisoned("bag writer"));
        }
        self.file.as_mut().ok_or(Error::Closed("bag writer"))
    }

    /// Drop the handle after a failed write. Buffered bytes are discarded
    /// rather than written on drop.
    fn poison(&mut self, err: io::Error) -> Error {
        warn!(path = %self.path.display(), error = %err, "bag write failed, writer poisoned");
        self.poisoned = true;
        self.abandon();
        Error::Io(err)
    }
}

/// Index, then header, each synced before the next step. Leaves the file
/// positioned at `index_end`.
fn commit(
    file: &mut BufWriter<File>,
    index: &[u8],
    header: &BagHeader,
    index_end: u64,
) -> io::Result<()> {
    // ── Record index ───────────────────────────────────────────────────
    file.write_all(index)?;
    file.flush()?;
    file.get_ref().sync_data()?;

    // ── Header now that the index is durable ───────────────────────────
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.to_bytes())?;
    file.flush()?;
    file.get_ref().sync_data()?;
    file.seek(SeekFrom::Start(index_end))?;
    Ok(())
}

impl Drop for BagWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.close() {
                warn!(path = %self.path.display(), error = %err, "failed to close bag on drop");
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
impl BagWriter {
    /// Swap the handle for `/dev/full`, so the next write that reaches the
    /// device fails with ENOSPC.
    pub(crate) fn fail_writes(&mut self) {
        let full = File::options().write(true).open("/dev/full").unwrap();
        self.file = Some(BufWriter::new(full));
    }
}
