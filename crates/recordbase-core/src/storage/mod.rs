//! Record storage for recordbase.
//!
//! Records are JSON documents in sled trees. Every mutating write snapshots
//! the previous data into an embedded version, and identifiers come from
//! persistent per-resource counters.

mod config;
mod history;
mod id_generator;
mod record;
mod store;

pub use config::{StorageConfig, DEFAULT_ID_RETRY_LIMIT};
pub use history::{Change, ChangeKind, HistoryEngine, HistoryEntry};
pub use id_generator::{IdGenerator, IdTemplate};
pub use record::{new_id, Record, Version};
pub use store::{ListOptions, RecordStore};
