use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::ReaderConfig;
use crate::error::{Error, Result};
use crate::format::{check_entries, parse_entries, BagHeader, IndexEntry, ENTRY_SIZE, HEADER_SIZE};

/// Random-access reader for bag files.
///
/// # Open sequence
/// 1. Read the 32-byte header (magic check, index offset, record count).
/// 2. Check that the index region lies inside the file.
/// 3. With `cache_index`, load the whole index (24 bytes × N) in one read,
///    verify its checksum, and check record ordering.
///
/// # Access pattern
/// Without a cached index, entry `i` is read from `index_offset + 24 * i`
/// right before the data read — one extra small read per access in exchange
/// for O(1) memory. [`read_range`] fetches the entries for the whole range in
/// one read and the data of physically contiguous records in one read.
pub struct BagReader {
    path: PathBuf,
    file: Option<File>,
    header: BagHeader,
    entries: Option<Vec<IndexEntry>>,
    verify_checksums: bool,
    file_size: u64,
}

impl BagReader {
    /// Open a bag file.
    pub fn open(path: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let header = read_header(&mut file, &path, file_size)?;

        let entries = if config.cache_index {
            let index_len = header.count * ENTRY_SIZE;
            let mut index = vec![0u8; index_len as usize];
            file.seek(SeekFrom::Start(header.index_offset))?;
            file.read_exact(&mut index)?;
            if xxh3_64(&index) != header.index_checksum {
                return Err(Error::format(&path, "index checksum mismatch"));
            }
            let entries = parse_entries(&index);
            check_entries(0, &entries, header.index_offset)
                .map_err(|reason| Error::format(&path, reason))?;
            Some(entries)
        } else {
            None
        };

        debug!(
            path = %path.display(),
            records = header.count,
            cached = config.cache_index,
            "opened bag"
        );

        Ok(Self {
            path,
            file: Some(file),
            header,
            entries,
            verify_checksums: config.verify_checksums,
            file_size,
        })
    }

    /// Record count of the bag at `path`, from its header alone.
    pub fn count(path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(read_header(&mut file, path, file_size)?.count)
    }

    /// Total number of records.
    #[inline]
    pub fn len(&self) -> u64 {
        self.header.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &BagHeader {
        &self.header
    }

    /// Size of the bag file in bytes, header and index included.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Whether the full index is held in memory.
    pub fn is_cached(&self) -> bool {
        self.entries.is_some()
    }

    /// Index entry of record `i`.
    pub fn entry(&mut self, i: u64) -> Result<IndexEntry> {
        self.check_range(i, 1)?;
        let entries = self.entries_for(i, 1)?;
        Ok(entries[0])
    }

    /// Return exactly the bytes appended as record `i`.
    pub fn read(&mut self, i: u64) -> Result<Vec<u8>> {
        self.check_range(i, 1)?;
        let entry = self.entries_for(i, 1)?[0];
        let data = self.read_span(entry.offset, entry.length)?;
        self.verify(i, &entry, &data)?;
        Ok(data)
    }

    /// Return `count` records starting at `start`.
    ///
    /// Records that are physically contiguous are fetched with a single seek
    /// and read; a bag flushed once is contiguous throughout.
    pub fn read_range(&mut self, start: u64, count: u64) -> Result<Vec<Vec<u8>>> {
        self.check_range(start, count)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries_for(start, count)?;

        let mut records = Vec::with_capacity(count as usize);
        let mut run_start = 0;
        while run_start < entries.len() {
            let mut run_end = run_start + 1;
            while run_end < entries.len() && entries[run_end].offset == entries[run_end - 1].end() {
                run_end += 1;
            }

            let first = entries[run_start].offset;
            let span = self.read_span(first, entries[run_end - 1].end() - first)?;
            for (k, entry) in entries[run_start..run_end].iter().enumerate() {
                let at = (entry.offset - first) as usize;
                let data = span[at..at + entry.length as usize].to_vec();
                self.verify(start + (run_start + k) as u64, entry, &data)?;
                records.push(data);
            }
            run_start = run_end;
        }
        Ok(records)
    }

    /// Release the file handle. Later reads fail with a closed error.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Every read path starts here, so a closed reader fails even when the
    /// index is cached or the range is empty.
    fn check_range(&self, start: u64, count: u64) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Closed("bag reader"));
        }
        match start.checked_add(count) {
            Some(end) if end <= self.header.count => Ok(()),
            _ => Err(Error::Index {
                index: start.saturating_add(count.saturating_sub(1)),
                len: self.header.count,
            }),
        }
    }

    /// Entries `[start, start + count)`; the caller has range-checked them.
    fn entries_for(&mut self, start: u64, count: u64) -> Result<Vec<IndexEntry>> {
        if let Some(entries) = &self.entries {
            return Ok(entries[start as usize..(start + count) as usize].to_vec());
        }

        let mut buf = vec![0u8; (count * ENTRY_SIZE) as usize];
        let position = self.header.entry_position(start);
        let file = self.file.as_mut().ok_or(Error::Closed("bag reader"))?;
        file.seek(SeekFrom::Start(position))?;
        file.read_exact(&mut buf)?;

        let entries = parse_entries(&buf);
        check_entries(start, &entries, self.header.index_offset)
            .map_err(|reason| Error::format(&self.path, reason))?;
        Ok(entries)
    }

    fn read_span(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let file = self.file.as_mut().ok_or(Error::Closed("bag reader"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn verify(&self, i: u64, entry: &IndexEntry, data: &[u8]) -> Result<()> {
        if self.verify_checksums {
            let computed = xxh3_64(data);
            if computed != entry.checksum {
                return Err(Error::format(
                    &self.path,
                    format!(
                        "record {} checksum mismatch: expected {:016x}, got {:016x}",
                        i, entry.checksum, computed
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn read_header(file: &mut File, path: &Path, file_size: u64) -> Result<BagHeader> {
    if file_size < HEADER_SIZE {
        return Err(Error::format(
            path,
            format!("file is {} bytes, shorter than the {}-byte header", file_size, HEADER_SIZE),
        ));
    }
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut buf)?;
    let header = BagHeader::from_bytes(&buf).ok_or_else(|| Error::format(path, "invalid bag magic bytes"))?;

    match header.index_end() {
        Some(end) if header.index_offset >= HEADER_SIZE && end <= file_size => Ok(header),
        _ => Err(Error::format(
            path,
            format!(
                "index of {} entries at offset {} does not fit in a {}-byte file",
                header.count, header.index_offset, file_size
            ),
        )),
    }
}
