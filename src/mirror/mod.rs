//! Mirroring sources between registries.
//!
//! The [`exporter`] serves snapshots and journal ranges of local sources
//! to downstream registries. The [`importer`] keeps a mirrored source in
//! sync with its upstream.

pub mod exporter;
pub mod importer;
pub mod protocol;

pub use self::exporter::ExportRegistry;
pub use self::importer::{ImportError, ImportSchedule, ImportStatus, Importer, ImporterHandle};
pub use self::protocol::{ErrorCode, GREETING, Line, ProtocolError, Request};
