//! Reader and writer configuration.
//!
//! Both structs deserialize with per-field defaults, so a host can keep them
//! in a JSON file and only spell out what differs:
//!
//! ```ignore
//! let config: ReaderConfig = serde_json::from_str(r#"{ "cache_index": false }"#)?;
//! assert!(config.verify_checksums);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Load every bag index into memory at open time (default: true).
    /// When false, each read fetches just the index entries it needs.
    #[serde(default = "default_true")]
    pub cache_index: bool,

    /// Check the xxh3 checksum of every record read (default: true).
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    /// First shard index this reader sees (sharded datasets only).
    #[serde(default)]
    pub shardstart: u64,

    /// Shard indices at or above this are ignored (default: unbounded).
    #[serde(default)]
    pub shardstop: Option<u64>,

    /// Only every `shardstep`-th shard starting at `shardstart` is visible.
    #[serde(default = "default_step")]
    pub shardstep: u64,
}

fn default_true() -> bool {
    true
}

fn default_step() -> u64 {
    1
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cache_index: true,
            verify_checksums: true,
            shardstart: 0,
            shardstop: None,
            shardstep: default_step(),
        }
    }
}

impl ReaderConfig {
    /// Whether shard `index` falls inside this reader's window.
    pub fn owns_shard(&self, index: u64) -> bool {
        shard_in_window(index, self.shardstart, self.shardstop, self.shardstep)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.shardstep == 0 {
            return Err(Error::Config("shardstep must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedWriterConfig {
    /// Maximum datapoints per shard directory.
    pub shardlen: u64,

    /// First shard index this worker writes.
    #[serde(default)]
    pub shardstart: u64,

    /// Appends that would need a shard index at or above this fail with a
    /// capacity error (default: unbounded).
    #[serde(default)]
    pub shardstop: Option<u64>,

    /// Distance between consecutive shards of this worker. With N workers
    /// using `shardstart = worker_id` and `shardstep = N`, shard indices
    /// interleave without coordination.
    #[serde(default = "default_step")]
    pub shardstep: u64,
}

impl ShardedWriterConfig {
    pub fn new(shardlen: u64) -> Self {
        Self {
            shardlen,
            shardstart: 0,
            shardstop: None,
            shardstep: default_step(),
        }
    }

    pub fn with_window(mut self, shardstart: u64, shardstop: Option<u64>) -> Self {
        self.shardstart = shardstart;
        self.shardstop = shardstop;
        self
    }

    pub fn with_step(mut self, shardstep: u64) -> Self {
        self.shardstep = shardstep;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.shardlen == 0 {
            return Err(Error::Config("shardlen must be at least 1".into()));
        }
        if self.shardstep == 0 {
            return Err(Error::Config("shardstep must be at least 1".into()));
        }
        if let Some(stop) = self.shardstop {
            if stop < self.shardstart {
                return Err(Error::Config(format!(
                    "shardstop {} is below shardstart {}",
                    stop, self.shardstart
                )));
            }
        }
        Ok(())
    }
}

fn shard_in_window(index: u64, start: u64, stop: Option<u64>, step: u64) -> bool {
    if index < start || stop.is_some_and(|stop| index >= stop) {
        return false;
    }
    step <= 1 || (index - start) % step == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_config_defaults_fill_missing_fields() {
        let config: ReaderConfig = serde_json::from_str(r#"{ "cache_index": false }"#).unwrap();
        assert!(!config.cache_index);
        assert!(config.verify_checksums);
        assert_eq!(config.shardstep, 1);
        assert_eq!(config.shardstop, None);
    }

    #[test]
    fn window_respects_start_stop_and_step() {
        let config = ReaderConfig {
            shardstart: 1,
            shardstop: Some(8),
            shardstep: 3,
            ..Default::default()
        };
        let owned: Vec<u64> = (0..10).filter(|&i| config.owns_shard(i)).collect();
        assert_eq!(owned, vec![1, 4, 7]);
    }

    #[test]
    fn writer_config_rejects_zero_shardlen() {
        assert!(matches!(
            ShardedWriterConfig::new(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(ShardedWriterConfig::new(4).with_window(2, Some(1)).validate().is_err());
    }
}
