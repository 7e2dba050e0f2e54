//! File and directory naming inside a dataset.
//!
//! ```text
//! root/                 ← sharded dataset
//!   000000/             ← shard 0, a plain dataset directory
//!     spec.json
//!     refs.bag
//!     <key>.bag ...
//!   000001/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const SPEC_FILE: &str = "spec.json";
pub const REFS_FILE: &str = "refs.bag";

/// Name of the refs bag's stem; not usable as a key.
pub const REFS_STEM: &str = "refs";

pub fn bag_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.bag", key))
}

pub fn shard_path(root: &Path, index: u64) -> PathBuf {
    root.join(format!("{:06}", index))
}

/// Shard index encoded in a directory name, if it is one.
pub fn parse_shard_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Total size in bytes of the regular files directly inside `dir`.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
