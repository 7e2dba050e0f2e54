pub mod config;
pub mod datapoint;
pub mod dataset;
pub mod error;
pub mod format;
pub mod layout;
pub mod reader;
pub mod sharded;
pub mod spec;
pub mod writer;

pub use config::{ReaderConfig, ShardedWriterConfig};
pub use datapoint::{Datapoint, Field, Query, Slice};
pub use dataset::{DatasetReader, DatasetWriter};
pub use error::{Error, Result};
pub use format::{BagHeader, IndexEntry, RefEntry, ENTRY_SIZE, HEADER_SIZE, MAGIC};
pub use reader::BagReader;
pub use sharded::{ShardedDatasetReader, ShardedDatasetWriter};
pub use spec::{is_list_tag, Spec};
pub use writer::BagWriter;
