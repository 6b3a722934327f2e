//! Persistent key-value storage of source data.
//!
//! Values are JSON documents stored under a [`Key`], which is made up of a
//! [`Scope`] and a name. Two backends exist: `memory://` keeps everything in
//! a process wide map (used by tests), `local://` keeps a JSON file per key.

mod disk;
mod key;
mod kv;
mod memory;

pub use self::disk::Disk;
pub use self::key::{Key, ParseSegmentError, Scope, Segment};
pub use self::kv::{KeyValueError, KeyValueStore, KeyValueStoreDispatcher, StorageResult};
pub use self::memory::Memory;
