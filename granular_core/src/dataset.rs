//! Datapoint-level storage on top of bags.
//!
//! A dataset directory holds one bag per key plus `refs.bag`. Record `d` of
//! the refs bag lists, for every key in spec order, the `(start, count)` range
//! of datapoint `d`'s records in that key's bag. Ranges of one key are
//! back to back in datapoint order, so each key's bag is partitioned by its
//! refs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ReaderConfig;
use crate::datapoint::{Datapoint, Field, Query, Slice};
use crate::error::{Error, Result};
use crate::format::{decode_refs, encode_refs, RefEntry};
use crate::layout::{bag_path, dir_size, REFS_FILE};
use crate::reader::BagReader;
use crate::spec::Spec;
use crate::writer::BagWriter;

/// Sequential writer for one dataset directory.
pub struct DatasetWriter {
    directory: PathBuf,
    spec: Spec,
    /// One bag per key, in spec order.
    bags: Vec<BagWriter>,
    refs: BagWriter,
    closed: bool,
    /// Set when a write failed after validation. Every bag is abandoned at
    /// its last flush, so refs keep partitioning the key bags on disk.
    poisoned: bool,
}

impl DatasetWriter {
    /// Create the dataset directory (if needed), write `spec.json`, and
    /// create empty bags for every key and for the refs.
    pub fn create(directory: impl AsRef<Path>, spec: Spec) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        spec.save(&directory)?;

        let bags = spec
            .keys()
            .map(|key| BagWriter::create(bag_path(&directory, key)))
            .collect::<Result<Vec<_>>>()?;
        let refs = BagWriter::create(directory.join(REFS_FILE))?;

        debug!(dir = %directory.display(), keys = spec.len(), "created dataset");
        Ok(Self {
            directory,
            spec,
            bags,
            refs,
            closed: false,
            poisoned: false,
        })
    }

    /// Append one datapoint and return its index.
    ///
    /// The datapoint is checked against the spec before anything is written,
    /// so a schema error leaves the dataset untouched. Any later failure
    /// poisons the writer: the dataset stays as of the last flush and further
    /// calls return [`Error::Poisoned`].
    pub fn append(&mut self, datapoint: &Datapoint) -> Result<u64> {
        self.check_open()?;
        self.spec.check(datapoint)?;
        self.write(datapoint).map_err(|err| self.poison(err))
    }

    fn write(&mut self, datapoint: &Datapoint) -> Result<u64> {
        let mut refs = Vec::with_capacity(self.bags.len());
        for (key, bag) in self.spec.keys().zip(self.bags.iter_mut()) {
            let start = bag.len();
            match &datapoint[key] {
                Field::Scalar(bytes) => {
                    bag.append(bytes)?;
                }
                Field::List(items) => {
                    for item in items {
                        bag.append(item)?;
                    }
                }
            }
            refs.push(RefEntry {
                start,
                count: bag.len() - start,
            });
        }
        self.refs.append(&encode_refs(&refs))
    }

    /// Number of datapoints appended so far.
    pub fn len(&self) -> u64 {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Flush key bags, then the refs bag, so durable refs never point past
    /// durable key records.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush_bags().map_err(|err| self.poison(err))
    }

    fn flush_bags(&mut self) -> Result<()> {
        for bag in &mut self.bags {
            bag.flush()?;
        }
        self.refs.flush()
    }

    /// Close key bags, then the refs bag. Calling `close` twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned("dataset writer"));
        }
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        for bag in &mut self.bags {
            bag.close()?;
        }
        self.refs.close()?;
        self.closed = true;
        info!(dir = %self.directory.display(), datapoints = self.refs.len(), "closed dataset");
        Ok(())
    }
}

impl DatasetWriter {
    fn check_open(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned("dataset writer"));
        }
        if self.closed {
            return Err(Error::Closed("dataset writer"));
        }
        Ok(())
    }

    fn poison(&mut self, err: Error) -> Error {
        if !self.poisoned {
            warn!(dir = %self.directory.display(), error = %err, "dataset write failed, writer poisoned");
            self.poisoned = true;
            for bag in &mut self.bags {
                bag.abandon();
            }
            self.refs.abandon();
        }
        err
    }
}

#[cfg(all(test, target_os = "linux"))]
impl DatasetWriter {
    /// Make every bag fail on its next write that reaches the device.
    pub(crate) fn fail_writes(&mut self) {
        for bag in &mut self.bags {
            bag.fail_writes();
        }
        self.refs.fail_writes();
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if !self.closed && !self.poisoned {
            if let Err(err) = self.close() {
                warn!(dir = %self.directory.display(), error = %err, "failed to close dataset on drop");
            }
        }
    }
}

/// End of a datapoint's range in one key bag. Overflow can only come from a
/// corrupt refs record.
fn ref_end(path: &Path, d: u64, entry: &RefEntry) -> Result<u64> {
    entry.end().ok_or_else(|| {
        Error::format(
            path,
            format!(
                "refs of datapoint {} overflow: start {} count {}",
                d, entry.start, entry.count
            ),
        )
    })
}

/// Random-access reader for one dataset directory.
pub struct DatasetReader {
    directory: PathBuf,
    spec: Spec,
    refs: BagReader,
    /// One bag per key, in spec order.
    bags: Vec<BagReader>,
}

impl DatasetReader {
    /// Open a dataset, taking its spec from `spec.json`.
    pub fn open(directory: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let spec = Spec::load(&directory)?;
        let refs = BagReader::open(directory.join(REFS_FILE), config)?;
        let bags = spec
            .keys()
            .map(|key| BagReader::open(bag_path(&directory, key), config))
            .collect::<Result<Vec<_>>>()?;

        let mut reader = Self {
            directory,
            spec,
            refs,
            bags,
        };
        reader.check_bounds()?;
        debug!(dir = %reader.directory.display(), datapoints = reader.len(), "opened dataset");
        Ok(reader)
    }

    /// Open a dataset and require its persisted spec to equal `spec`.
    pub fn open_with_spec(directory: impl AsRef<Path>, spec: &Spec, config: &ReaderConfig) -> Result<Self> {
        let reader = Self::open(directory, config)?;
        if reader.spec != *spec {
            return Err(Error::Schema(format!(
                "dataset at {} has spec {:?}, expected {:?}",
                reader.directory.display(),
                reader.spec,
                spec
            )));
        }
        Ok(reader)
    }

    /// The last datapoint's refs must lie inside every key bag; since refs
    /// are back to back, that bounds all earlier refs too.
    fn check_bounds(&mut self) -> Result<()> {
        if self.refs.is_empty() {
            return Ok(());
        }
        let last = self.refs(self.len() - 1)?;
        for ((key, entry), bag) in self.spec.keys().zip(&last).zip(&self.bags) {
            let end = ref_end(bag.path(), self.len() - 1, entry)?;
            if end > bag.len() {
                return Err(Error::format(
                    bag.path(),
                    format!(
                        "refs for key '{}' end at record {} but the bag holds {}",
                        key,
                        end,
                        bag.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Number of datapoints.
    pub fn len(&self) -> u64 {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.spec.keys()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Raw `(start, count)` refs of datapoint `d`, in spec key order.
    pub fn refs(&mut self, d: u64) -> Result<Vec<RefEntry>> {
        let record = self.refs.read(d)?;
        decode_refs(&record, self.spec.len()).ok_or_else(|| {
            Error::format(
                self.refs.path(),
                format!(
                    "refs record {} is {} bytes, expected {} keys",
                    d,
                    record.len(),
                    self.spec.len()
                ),
            )
        })
    }

    /// Read every key of datapoint `d`.
    pub fn get(&mut self, d: u64) -> Result<Datapoint> {
        let query = Query::keys(self.spec.keys());
        self.get_with(d, &query)
    }

    /// Read only the keys named in `query`, and for list-valued keys with a
    /// `Slice::Range`, only the selected elements. Other bags are not touched.
    pub fn get_with(&mut self, d: u64, query: &Query) -> Result<Datapoint> {
        let mut plan = Vec::with_capacity(query.len());
        for (key, slice) in query.iter() {
            let position = self
                .spec
                .position(key)
                .ok_or_else(|| Error::Schema(format!("key '{}' is not in the spec", key)))?;
            if matches!(slice, Slice::Range(_)) && !self.spec.is_list(key) {
                return Err(Error::Schema(format!(
                    "key '{}' is scalar and cannot be sliced",
                    key
                )));
            }
            plan.push((key, position, slice));
        }

        let refs = self.refs(d)?;
        let mut datapoint = Datapoint::new();
        for (key, position, slice) in plan {
            let entry = refs[position];
            let bag = &mut self.bags[position];

            let field = if self.spec.is_list(key) {
                let (lo, hi) = match slice {
                    Slice::All => (0, entry.count),
                    Slice::Range(range) => {
                        if range.start > range.end || range.end > entry.count {
                            return Err(Error::Range {
                                key: key.to_string(),
                                lo: range.start,
                                hi: range.end,
                                count: entry.count,
                            });
                        }
                        (range.start, range.end)
                    }
                };
                // start + count fits and lo <= count, so start + lo fits.
                ref_end(bag.path(), d, &entry)?;
                Field::List(bag.read_range(entry.start + lo, hi - lo)?)
            } else {
                if entry.count != 1 {
                    return Err(Error::format(
                        bag.path(),
                        format!(
                            "scalar key '{}' of datapoint {} spans {} records",
                            key, d, entry.count
                        ),
                    ));
                }
                Field::Scalar(bag.read(entry.start)?)
            };
            datapoint.insert(key.to_string(), field);
        }
        Ok(datapoint)
    }

    /// Walk every datapoint's refs and check that each key's ranges are
    /// back to back, cover exactly its bag, and that scalar keys own exactly
    /// one record.
    pub fn verify(&mut self) -> Result<()> {
        let mut cursors = vec![0u64; self.spec.len()];
        let list_flags: Vec<bool> = self.spec.keys().map(|k| self.spec.is_list(k)).collect();
        for d in 0..self.len() {
            let refs = self.refs(d)?;
            for (position, entry) in refs.iter().enumerate() {
                if entry.start != cursors[position] {
                    return Err(Error::format(
                        self.bags[position].path(),
                        format!(
                            "datapoint {} starts at record {}, expected {}",
                            d, entry.start, cursors[position]
                        ),
                    ));
                }
                if !list_flags[position] && entry.count != 1 {
                    return Err(Error::format(
                        self.bags[position].path(),
                        format!("scalar datapoint {} spans {} records", d, entry.count),
                    ));
                }
                cursors[position] = ref_end(self.bags[position].path(), d, entry)?;
            }
        }
        for (cursor, bag) in cursors.iter().zip(&self.bags) {
            if *cursor != bag.len() {
                return Err(Error::format(
                    bag.path(),
                    format!("refs cover {} records but the bag holds {}", cursor, bag.len()),
                ));
            }
        }
        Ok(())
    }

    /// Bytes on disk of every file in the dataset directory.
    pub fn size(&self) -> Result<u64> {
        dir_size(&self.directory)
    }

    /// Release all file handles.
    pub fn close(&mut self) {
        self.refs.close();
        for bag in &mut self.bags {
            bag.close();
        }
    }
}
