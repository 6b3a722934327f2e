//! The per-source journal.
//!
//! Every change to a source is recorded as a [`JournalEntry`] with a serial
//! one higher than the previous one. A single writer task per source owns
//! serial assignment, see [`JournalHandle`]. Readers get a consistent
//! [`SourceState`] snapshot without waiting for the writer.

mod state;
mod store;
mod writer;

pub use self::state::SourceState;
pub use self::store::JournalStore;
pub use self::writer::{JournalHandle, MirrorEntry};

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commons::storage::KeyValueError;
use crate::rpsl::{ObjectKey, RpslObject, SourceName};

//------------ Serial --------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Serial(u64);

impl Serial {
    pub fn new(serial: u64) -> Self {
        Serial(serial)
    }

    pub fn into_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Serial(self.0 + 1)
    }
}

impl From<u64> for Serial {
    fn from(serial: u64) -> Self {
        Serial(serial)
    }
}

impl FromStr for Serial {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s.trim()).map(Serial)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ Operation -----------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AddOrUpdate,
    Delete,
}

impl Operation {
    /// The tag used in the mirror protocol.
    pub fn tag(self) -> &'static str {
        match self {
            Operation::AddOrUpdate => "ADD",
            Operation::Delete => "DEL",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ADD" => Some(Operation::AddOrUpdate),
            "DEL" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.tag().fmt(f)
    }
}

//------------ Origin --------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Mirror,
}

//------------ JournalEntry --------------------------------------------------

/// An immutable record of a single change to a source.
///
/// Deletions keep the full body of the deleted object.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JournalEntry {
    source: SourceName,
    serial: Serial,
    operation: Operation,
    key: ObjectKey,
    object: RpslObject,
    timestamp: DateTime<Utc>,
    origin: Origin,
}

impl JournalEntry {
    pub fn new(source: SourceName, serial: Serial, operation: Operation, object: RpslObject, origin: Origin) -> Self {
        JournalEntry {
            source,
            serial,
            operation,
            key: object.key().clone(),
            object,
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn source(&self) -> &SourceName {
        &self.source
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn object(&self) -> &RpslObject {
        &self.object
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

//------------ JournalError --------------------------------------------------

#[derive(Debug)]
pub enum JournalError {
    SerialTooOld {
        source: SourceName,
        requested: Serial,
        oldest: Serial,
    },
    SerialGap {
        source: SourceName,
        expected: Serial,
        found: Serial,
    },
    InvalidRange {
        source: SourceName,
        from: Serial,
        to: Option<Serial>,
        current: Option<Serial>,
    },
    SerialNotIncreasing {
        source: SourceName,
        current: Serial,
        requested: Serial,
    },
    Storage(KeyValueError),
    WriterStopped(SourceName),
}

impl JournalError {
    pub fn is_storage(&self) -> bool {
        matches!(self, JournalError::Storage(_))
    }
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JournalError::SerialTooOld {
                source,
                requested,
                oldest,
            } => write!(
                f,
                "serial {requested} is older than the oldest journal entry {oldest} for source {source}"
            ),
            JournalError::SerialGap {
                source,
                expected,
                found,
            } => write!(f, "serial gap for source {source}: expected {expected}, found {found}"),
            JournalError::InvalidRange {
                source,
                from,
                to,
                current,
            } => {
                let to = to.map(|s| s.to_string()).unwrap_or_else(|| "LATEST".to_string());
                let current = current.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
                write!(f, "invalid range {from}-{to} for source {source}, current serial {current}")
            }
            JournalError::SerialNotIncreasing {
                source,
                current,
                requested,
            } => write!(
                f,
                "cannot set serial of source {source} to {requested}, current serial is {current}"
            ),
            JournalError::Storage(e) => write!(f, "storage error: {e}"),
            JournalError::WriterStopped(source) => write!(f, "journal writer for source {source} stopped"),
        }
    }
}

impl std::error::Error for JournalError {}

impl From<KeyValueError> for JournalError {
    fn from(e: KeyValueError) -> Self {
        JournalError::Storage(e)
    }
}
