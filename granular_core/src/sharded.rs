//! Datasets split across numbered shard directories.
//!
//! Each shard is a self-contained dataset. Shard `i` lives in `root/{i:06}`,
//! and shards in index order cover consecutive ranges of the global
//! datapoint index. Workers writing disjoint shard windows need no
//! coordination; readers only need each shard's length to map a global index
//! to `(shard, local)`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{ReaderConfig, ShardedWriterConfig};
use crate::dataset::{DatasetReader, DatasetWriter};
use crate::datapoint::{Datapoint, Query};
use crate::error::{Error, Result};
use crate::layout::{dir_size, parse_shard_name, shard_path, REFS_FILE};
use crate::reader::BagReader;
use crate::spec::Spec;

/// Writer that rolls over to a new shard directory every `shardlen`
/// datapoints.
pub struct ShardedDatasetWriter {
    root: PathBuf,
    spec: Spec,
    config: ShardedWriterConfig,
    current: Option<DatasetWriter>,
    /// Index of the shard held in `current`, or the next one to open.
    shard: u64,
    shards: u64,
    len: u64,
    closed: bool,
}

impl ShardedDatasetWriter {
    pub fn create(root: impl AsRef<Path>, spec: Spec, config: ShardedWriterConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), ?config, "created sharded dataset writer");
        Ok(Self {
            root,
            spec,
            shard: config.shardstart,
            config,
            current: None,
            shards: 0,
            len: 0,
            closed: false,
        })
    }

    /// Append one datapoint; returns `(shard index, index within shard)`.
    pub fn append(&mut self, datapoint: &Datapoint) -> Result<(u64, u64)> {
        if self.closed {
            return Err(Error::Closed("sharded dataset writer"));
        }
        self.spec.check(datapoint)?;

        if self
            .current
            .as_ref()
            .is_some_and(|writer| writer.len() >= self.config.shardlen)
        {
            self.roll()?;
        }
        let writer = match self.current.take() {
            Some(writer) => writer,
            None => self.open_shard()?,
        };
        let writer = self.current.insert(writer);

        let local = writer.append(datapoint)?;
        self.len += 1;
        Ok((self.shard, local))
    }

    /// Close the full shard and advance to this worker's next shard index.
    ///
    /// The index advances before the close, so a shard that was opened once
    /// is never recreated, even when closing it fails.
    fn roll(&mut self) -> Result<()> {
        let shard = self.shard;
        self.shard += self.config.shardstep;
        if let Some(mut writer) = self.current.take() {
            writer.close()?;
            info!(shard, datapoints = writer.len(), "shard complete");
        }
        Ok(())
    }

    fn open_shard(&mut self) -> Result<DatasetWriter> {
        if let Some(stop) = self.config.shardstop {
            if self.shard >= stop {
                return Err(Error::Capacity {
                    shard: self.shard,
                    stop,
                });
            }
        }
        let writer = DatasetWriter::create(shard_path(&self.root, self.shard), self.spec.clone())?;
        self.shards += 1;
        debug!(shard = self.shard, "opened shard");
        Ok(writer)
    }

    /// Datapoints appended by this writer across all its shards.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shard directories opened by this writer so far.
    pub fn shards(&self) -> u64 {
        self.shards
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flush the shard currently being written.
    pub fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed("sharded dataset writer"));
        }
        match self.current.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Close the shard currently being written. Calling `close` twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(writer) = self.current.as_mut() {
            writer.close()?;
        }
        self.current = None;
        self.closed = true;
        info!(root = %self.root.display(), shards = self.shards, datapoints = self.len, "closed sharded dataset writer");
        Ok(())
    }
}

impl Drop for ShardedDatasetWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!(root = %self.root.display(), error = %err, "failed to close sharded writer on drop");
            }
        }
    }
}

/// Datapoints in the shard at `path`, or `None` while its refs bag does not
/// exist yet (a shard still being created, or abandoned during creation).
fn shard_length(path: &Path) -> Result<Option<u64>> {
    let refs = path.join(REFS_FILE);
    match fs::metadata(&refs) {
        Ok(meta) if meta.len() == 0 => return Ok(None),
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    BagReader::count(&refs).map(Some)
}

struct ShardSlot {
    index: u64,
    path: PathBuf,
    len: u64,
    reader: Option<DatasetReader>,
}

/// Reader over every shard directory found under a root.
///
/// Opening reads one header per shard; a shard's dataset reader is opened on
/// first access and kept.
pub struct ShardedDatasetReader {
    root: PathBuf,
    config: ReaderConfig,
    slots: Vec<ShardSlot>,
    /// `offsets[i]` is the global index of shard `i`'s first datapoint;
    /// the last element is the total length.
    offsets: Vec<u64>,
    spec: Option<Spec>,
}

impl ShardedDatasetReader {
    pub fn open(root: impl AsRef<Path>, config: &ReaderConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();

        let mut found = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let index = match entry.file_name().to_str().and_then(parse_shard_name) {
                Some(index) => index,
                None => continue,
            };
            if config.owns_shard(index) {
                found.push((index, entry.path()));
            }
        }
        found.sort_unstable_by_key(|(index, _)| *index);

        let mut slots = Vec::with_capacity(found.len());
        let mut offsets = Vec::with_capacity(found.len() + 1);
        offsets.push(0);
        for (index, path) in found {
            let len = match shard_length(&path)? {
                Some(len) => len,
                None => {
                    warn!(shard = index, path = %path.display(), "skipping shard without refs");
                    continue;
                }
            };
            offsets.push(offsets[offsets.len() - 1] + len);
            slots.push(ShardSlot {
                index,
                path,
                len,
                reader: None,
            });
        }

        let spec = match slots.first() {
            Some(slot) => Some(Spec::load(&slot.path)?),
            None => None,
        };

        debug!(
            root = %root.display(),
            shards = slots.len(),
            datapoints = offsets[offsets.len() - 1],
            "opened sharded dataset"
        );
        Ok(Self {
            root,
            config: config.clone(),
            slots,
            offsets,
            spec,
        })
    }

    /// Total datapoints across all visible shards.
    pub fn len(&self) -> u64 {
        self.offsets[self.offsets.len() - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of visible shards.
    pub fn shards(&self) -> usize {
        self.slots.len()
    }

    /// Shard directory indices, in order.
    pub fn shard_indices(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.index).collect()
    }

    pub fn shard_lengths(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.len).collect()
    }

    /// Spec of the first shard; `None` when there are no shards.
    pub fn spec(&self) -> Option<&Spec> {
        self.spec.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map global index `d` to `(shard position, local index)`. Empty shards
    /// are skipped.
    pub fn locate(&self, d: u64) -> Result<(usize, u64)> {
        if d >= self.len() {
            return Err(Error::Index {
                index: d,
                len: self.len(),
            });
        }
        let position = self.offsets.partition_point(|&offset| offset <= d) - 1;
        Ok((position, d - self.offsets[position]))
    }

    /// Dataset reader for the shard at `position`, opened on first use.
    pub fn shard(&mut self, position: usize) -> Result<&mut DatasetReader> {
        let shards = self.slots.len();
        let slot = self.slots.get_mut(position).ok_or(Error::Index {
            index: position as u64,
            len: shards as u64,
        })?;
        let reader = match slot.reader.take() {
            Some(reader) => reader,
            None => {
                let reader = DatasetReader::open(&slot.path, &self.config)?;
                if let Some(spec) = &self.spec {
                    if reader.spec() != spec {
                        return Err(Error::Schema(format!(
                            "shard {} spec {:?} differs from first shard spec {:?}",
                            slot.index,
                            reader.spec(),
                            spec
                        )));
                    }
                }
                if reader.len() != slot.len {
                    return Err(Error::format(
                        &slot.path,
                        format!("shard length changed from {} to {} since open", slot.len, reader.len()),
                    ));
                }
                reader
            }
        };
        Ok(slot.reader.insert(reader))
    }

    pub fn get(&mut self, d: u64) -> Result<Datapoint> {
        let (position, local) = self.locate(d)?;
        self.shard(position)?.get(local)
    }

    pub fn get_with(&mut self, d: u64, query: &Query) -> Result<Datapoint> {
        let (position, local) = self.locate(d)?;
        self.shard(position)?.get_with(local, query)
    }

    /// Run [`DatasetReader::verify`] on every shard.
    pub fn verify(&mut self) -> Result<()> {
        for position in 0..self.slots.len() {
            self.shard(position)?.verify()?;
        }
        Ok(())
    }

    /// Bytes on disk across all visible shards.
    pub fn size(&self) -> Result<u64> {
        self.slots.iter().map(|slot| dir_size(&slot.path)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::Field;
    use crate::layout::SPEC_FILE;
    use tempfile::TempDir;

    fn spec() -> Spec {
        Spec::new([("foo", "bytes")]).unwrap()
    }

    fn point(foo: &[u8]) -> Datapoint {
        let mut dp = Datapoint::new();
        dp.insert("foo".into(), Field::from(foo));
        dp
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_failed_roll_never_reopens_written_shard() {
        let dir = TempDir::new().unwrap();
        let mut w = ShardedDatasetWriter::create(dir.path(), spec(), ShardedWriterConfig::new(2)).unwrap();
        w.append(&point(b"first")).unwrap();
        w.flush().unwrap();
        w.append(&point(b"second")).unwrap();

        // Closing the full shard fails, so the datapoint is not written.
        w.current.as_mut().unwrap().fail_writes();
        assert!(w.append(&point(b"third")).is_err());
        assert_eq!(w.append(&point(b"third")).unwrap(), (1, 0));
        w.close().unwrap();

        let mut r = ShardedDatasetReader::open(dir.path(), &ReaderConfig::default()).unwrap();
        assert_eq!(r.shard_indices(), vec![0, 1]);
        assert_eq!(r.shard_lengths(), vec![1, 1]);
        assert_eq!(r.get(0).unwrap(), point(b"first"));
        assert_eq!(r.get(1).unwrap(), point(b"third"));
    }

    #[test]
    fn test_shard_without_refs_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut w = ShardedDatasetWriter::create(dir.path(), spec(), ShardedWriterConfig::new(5)).unwrap();
        w.append(&point(b"kept")).unwrap();
        w.close().unwrap();

        // A shard caught between its directory and its refs bag.
        let partial = shard_path(dir.path(), 1);
        fs::create_dir_all(&partial).unwrap();
        spec().save(&partial).unwrap();
        assert!(partial.join(SPEC_FILE).exists());
        // One whose refs bag was created but never got a header.
        let empty = shard_path(dir.path(), 2);
        fs::create_dir_all(&empty).unwrap();
        fs::write(empty.join(REFS_FILE), b"").unwrap();

        let mut r = ShardedDatasetReader::open(dir.path(), &ReaderConfig::default()).unwrap();
        assert_eq!(r.shard_indices(), vec![0]);
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(0).unwrap(), point(b"kept"));
    }

    #[test]
    fn test_corrupt_refs_header_is_format_error() {
        let dir = TempDir::new().unwrap();
        let shard = shard_path(dir.path(), 0);
        fs::create_dir_all(&shard).unwrap();
        fs::write(shard.join(REFS_FILE), b"not a bag").unwrap();
        assert!(matches!(
            ShardedDatasetReader::open(dir.path(), &ReaderConfig::default()),
            Err(Error::Format { .. })
        ));
    }
}
