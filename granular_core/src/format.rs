/// Magic bytes at the start of every bag file.
pub const MAGIC: &[u8; 8] = b"GRNBAG01";

/// Fixed size of the bag header in bytes.
///   magic[8] + index_offset:u64 + count:u64 + index_checksum:u64
///   = 8 + 8 + 8 + 8 = 32
pub const HEADER_SIZE: u64 = 32;

/// Size of each IndexEntry in the record index, in bytes.
///   offset:u64 + length:u64 + checksum:u64 = 24
pub const ENTRY_SIZE: u64 = 24;

/// Size of one `(start, count)` pair inside a refs record.
pub const REF_SIZE: u64 = 16;

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 32-byte bag header.
///
/// The header always describes the index written by the most recent
/// successful flush. A fresh bag carries `count = 0` and an index offset equal
/// to `HEADER_SIZE`, so it is readable before anything is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagHeader {
    /// Byte offset of the record index from the start of the file.
    pub index_offset: u64,
    /// Number of records covered by the index.
    pub count: u64,
    /// xxhash3-64 of the `count * ENTRY_SIZE` index bytes.
    pub index_checksum: u64,
}

impl BagHeader {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..16].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_checksum.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes. Returns `None` on a magic
    /// mismatch; the caller knows the path to report.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Option<Self> {
        if &buf[..8] != MAGIC {
            return None;
        }
        Some(Self {
            index_offset: u64_at(buf, 8),
            count: u64_at(buf, 16),
            index_checksum: u64_at(buf, 24),
        })
    }

    /// File position of index entry `i`.
    #[inline]
    pub fn entry_position(&self, i: u64) -> u64 {
        self.index_offset + i * ENTRY_SIZE
    }

    /// End of the index region (exclusive).
    #[inline]
    pub fn index_end(&self) -> Option<u64> {
        self.count
            .checked_mul(ENTRY_SIZE)
            .and_then(|len| len.checked_add(self.index_offset))
    }
}

// ── Index entry ────────────────────────────────────────────────────────────

/// One entry in the record index — locates a single record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the record from the start of the file.
    pub offset: u64,
    /// Record length in bytes.
    pub length: u64,
    /// xxhash3-64 of the record bytes.
    pub checksum: u64,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize one entry; `buf` must hold at least `ENTRY_SIZE` bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: u64_at(buf, 0),
            length: u64_at(buf, 8),
            checksum: u64_at(buf, 16),
        }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Parse a run of index entries. `buf.len()` must be a multiple of `ENTRY_SIZE`.
pub fn parse_entries(buf: &[u8]) -> Vec<IndexEntry> {
    buf.chunks_exact(ENTRY_SIZE as usize)
        .map(IndexEntry::from_bytes)
        .collect()
}

/// Check that entries are laid out the way a [`BagWriter`] writes them, and
/// return a description of the first violation.
///
/// Records follow each other back to back from the end of the header. The
/// only gaps are index copies left by intermediate flushes: a flush after `k`
/// records writes `k` entries, so a gap in front of record `k` is exactly
/// `k * ENTRY_SIZE` bytes. Every record ends at or before `data_end`.
///
/// When `first > 0` the bytes in front of the first entry are not known, so
/// only its lower bound is checked.
///
/// [`BagWriter`]: crate::writer::BagWriter
pub fn check_entries(first: u64, entries: &[IndexEntry], data_end: u64) -> Result<(), String> {
    let mut floor = HEADER_SIZE;
    let mut previous_end = (first == 0).then_some(HEADER_SIZE);
    for (i, entry) in entries.iter().enumerate() {
        let index = first + i as u64;
        let end = entry
            .offset
            .checked_add(entry.length)
            .ok_or_else(|| format!("record {} length overflows", index))?;
        if entry.offset < floor {
            return Err(format!(
                "record {} starts at {} which overlaps the previous record or header (floor {})",
                index, entry.offset, floor
            ));
        }
        if let Some(previous_end) = previous_end {
            let gap = entry.offset - previous_end;
            if gap != 0 && Some(gap) != index.checked_mul(ENTRY_SIZE) {
                return Err(format!(
                    "record {} at offset {} is not contiguous: {}-byte gap is not an index copy",
                    index, entry.offset, gap
                ));
            }
        }
        if end > data_end {
            return Err(format!(
                "record {} ends at {} past the index at {}",
                index, end, data_end
            ));
        }
        floor = end;
        previous_end = Some(end);
    }
    Ok(())
}

// ── Refs ───────────────────────────────────────────────────────────────────

/// A datapoint's records in one key's bag: `[start, start + count)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefEntry {
    pub start: u64,
    pub count: u64,
}

impl RefEntry {
    /// One past the last record, or `None` if the range overflows.
    #[inline]
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(self.count)
    }
}

/// Encode one refs record: a `(start, count)` pair per key, in spec key order.
pub fn encode_refs(refs: &[RefEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(refs.len() * REF_SIZE as usize);
    for entry in refs {
        buf.extend_from_slice(&entry.start.to_le_bytes());
        buf.extend_from_slice(&entry.count.to_le_bytes());
    }
    buf
}

/// Decode a refs record for `keys` keys. Returns `None` when the record has
/// the wrong width.
pub fn decode_refs(buf: &[u8], keys: usize) -> Option<Vec<RefEntry>> {
    if buf.len() as u64 != keys as u64 * REF_SIZE {
        return None;
    }
    Some(
        buf.chunks_exact(REF_SIZE as usize)
            .map(|pair| RefEntry {
                start: u64_at(pair, 0),
                count: u64_at(pair, 8),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_bad_magic() {
        let header = BagHeader {
            index_offset: 4096,
            count: 7,
            index_checksum: 0xfeed,
        };
        let mut bytes = header.to_bytes();
        assert_eq!(BagHeader::from_bytes(&bytes), Some(header.clone()));
        bytes[0] = b'X';
        assert_eq!(BagHeader::from_bytes(&bytes), None);
    }

    #[test]
    fn entry_positions_are_direct() {
        let header = BagHeader {
            index_offset: 100,
            count: 10,
            index_checksum: 0,
        };
        assert_eq!(header.entry_position(0), 100);
        assert_eq!(header.entry_position(3), 100 + 3 * ENTRY_SIZE);
        assert_eq!(header.index_end(), Some(100 + 10 * ENTRY_SIZE));
    }

    fn at(offset: u64, length: u64) -> IndexEntry {
        IndexEntry { offset, length, checksum: 0 }
    }

    #[test]
    fn check_entries_allows_only_index_copy_gaps() {
        // Flushed after two records: a 2-entry index copy sits before record 2.
        let entries = [at(32, 4), at(36, 0), at(36 + 2 * ENTRY_SIZE, 8)];
        assert!(check_entries(0, &entries, 92).is_ok());
        assert!(check_entries(0, &entries, 91).is_err());

        let stray_gap = [at(32, 4), at(36, 0), at(80, 8)];
        let err = check_entries(0, &stray_gap, 88).unwrap_err();
        assert!(err.contains("not contiguous"), "{err}");

        // Record 0 sits right after the header.
        assert!(check_entries(0, &[at(40, 4)], 100).is_err());

        // A window starting mid-bag only bounds its first entry.
        assert!(check_entries(5, &[at(500, 4), at(504, 4)], 600).is_ok());
        assert!(check_entries(5, &[at(500, 4), at(505, 4)], 600).is_err());

        let overlapping = [at(32, 4), at(35, 4)];
        assert!(check_entries(0, &overlapping, 100).is_err());
    }

    #[test]
    fn refs_reject_wrong_width() {
        let refs = [RefEntry { start: 3, count: 2 }, RefEntry { start: 9, count: 0 }];
        let buf = encode_refs(&refs);
        assert_eq!(buf.len(), 32);
        assert_eq!(decode_refs(&buf, 2).unwrap(), refs.to_vec());
        assert!(decode_refs(&buf, 3).is_none());
        assert!(decode_refs(&buf[..31], 2).is_none());
    }

    #[test]
    fn ref_end_overflow_is_none() {
        assert_eq!(RefEntry { start: 3, count: 2 }.end(), Some(5));
        assert_eq!(RefEntry { start: u64::MAX - 1, count: 2 }.end(), None);
    }
}
