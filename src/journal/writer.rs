//! The single writer of a source.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use crate::constants::COMMIT_QUEUE_SIZE;
use crate::rpsl::{RpslObject, SourceName};

use super::{JournalEntry, JournalError, JournalStore, Operation, Origin, Serial, SourceState};

//------------ MirrorEntry ---------------------------------------------------

/// A change received from an upstream registry, with the serial the
/// upstream assigned to it.
#[derive(Clone, Debug)]
pub struct MirrorEntry {
    pub serial: Serial,
    pub operation: Operation,
    pub object: RpslObject,
}

//------------ Command -------------------------------------------------------

type Reply<T> = oneshot::Sender<Result<T, JournalError>>;

enum Command {
    Commit {
        operation: Operation,
        object: RpslObject,
        reply: Reply<Arc<JournalEntry>>,
    },
    ApplyMirror {
        entries: Vec<MirrorEntry>,
        reply: Reply<usize>,
    },
    Reset {
        objects: Vec<RpslObject>,
        serial: Serial,
        reply: Reply<usize>,
    },
    LoadDump {
        objects: Vec<RpslObject>,
        serial: Option<Serial>,
        reply: Reply<usize>,
    },
    Expire {
        cutoff: DateTime<Utc>,
        reply: Reply<usize>,
    },
    SetSerial {
        serial: Serial,
        reply: Reply<()>,
    },
}

//------------ JournalHandle -------------------------------------------------

/// Access to the journal of a single source.
///
/// All changes are sent to a writer task which processes them one at a
/// time, in the order in which they were received. Reads are served from
/// the most recently published [`SourceState`].
#[derive(Clone)]
pub struct JournalHandle {
    source: SourceName,
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<Arc<SourceState>>>,
    serial: watch::Receiver<Option<Serial>>,
}

impl fmt::Debug for JournalHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JournalHandle")
            .field("source", &self.source)
            .field("serial", &*self.serial.borrow())
            .finish()
    }
}

impl JournalHandle {
    /// Loads the source from the store and starts its writer task.
    pub fn spawn(store: Arc<JournalStore>, source: SourceName) -> Result<Self, JournalError> {
        let state = store.load(&source)?;
        info!(
            "Loaded source {source} at serial {}, {} objects",
            state.serial().map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
            state.object_count()
        );

        let (serial_tx, serial_rx) = watch::channel(state.serial());
        let state = Arc::new(RwLock::new(Arc::new(state)));
        let (commands_tx, commands_rx) = mpsc::channel(COMMIT_QUEUE_SIZE);

        let writer = Writer {
            source: source.clone(),
            store,
            state: state.clone(),
            serial: serial_tx,
        };
        tokio::spawn(writer.run(commands_rx));

        Ok(JournalHandle {
            source,
            commands: commands_tx,
            state,
            serial: serial_rx,
        })
    }

    pub fn source(&self) -> &SourceName {
        &self.source
    }

    /// Returns the current state. It will not change while it is held.
    pub fn snapshot(&self) -> Arc<SourceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current_serial(&self) -> Option<Serial> {
        *self.serial.borrow()
    }

    pub fn range(&self, from: Serial, to: Option<Serial>) -> Result<Vec<Arc<JournalEntry>>, JournalError> {
        self.snapshot().range(from, to)
    }

    /// Returns a receiver that sees every new serial.
    pub fn subscribe(&self) -> watch::Receiver<Option<Serial>> {
        self.serial.clone()
    }

    /// Records a local change under the next serial.
    pub async fn commit(&self, operation: Operation, object: RpslObject) -> Result<Arc<JournalEntry>, JournalError> {
        self.request(|reply| Command::Commit {
            operation,
            object,
            reply,
        })
        .await
    }

    /// Applies changes received from an upstream and returns how many were
    /// applied.
    ///
    /// Entries at or below the current serial are skipped. An entry that
    /// does not directly follow the current serial ends the batch with a
    /// [`JournalError::SerialGap`], entries applied before it are kept.
    pub async fn apply_mirror(&self, entries: Vec<MirrorEntry>) -> Result<usize, JournalError> {
        self.request(|reply| Command::ApplyMirror { entries, reply }).await
    }

    /// Replaces all objects with a snapshot taken at the given serial and
    /// drops the journal.
    ///
    /// The serial is that of the upstream the snapshot was taken from and
    /// is accepted as is.
    pub async fn reset(&self, objects: Vec<RpslObject>, serial: Serial) -> Result<usize, JournalError> {
        self.request(|reply| Command::Reset {
            objects,
            serial,
            reply,
        })
        .await
    }

    /// Replaces all objects with those of a dump and drops the journal.
    ///
    /// The serial must be higher than the current one. Without a serial the
    /// source moves to the next serial. Either way, downstream mirrors find
    /// their next serial no longer in the journal and reload.
    pub async fn load_dump(&self, objects: Vec<RpslObject>, serial: Option<Serial>) -> Result<usize, JournalError> {
        self.request(|reply| Command::LoadDump {
            objects,
            serial,
            reply,
        })
        .await
    }

    /// Drops journal entries older than the cutoff and returns how many
    /// were dropped.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, JournalError> {
        self.request(|reply| Command::Expire { cutoff, reply }).await
    }

    /// Sets the serial of the source and drops the journal. The serial
    /// cannot be lowered.
    pub async fn set_serial(&self, serial: Serial) -> Result<(), JournalError> {
        self.request(|reply| Command::SetSerial { serial, reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, JournalError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| JournalError::WriterStopped(self.source.clone()))?;
        rx.await.map_err(|_| JournalError::WriterStopped(self.source.clone()))?
    }
}

//------------ Writer --------------------------------------------------------

struct Writer {
    source: SourceName,
    store: Arc<JournalStore>,
    state: Arc<RwLock<Arc<SourceState>>>,
    serial: watch::Sender<Option<Serial>>,
}

impl Writer {
    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Commit {
                    operation,
                    object,
                    reply,
                } => {
                    let _ = reply.send(self.commit(operation, object));
                }
                Command::ApplyMirror { entries, reply } => {
                    let _ = reply.send(self.apply_mirror(entries));
                }
                Command::Reset {
                    objects,
                    serial,
                    reply,
                } => {
                    let _ = reply.send(self.reset(objects, serial));
                }
                Command::LoadDump {
                    objects,
                    serial,
                    reply,
                } => {
                    let _ = reply.send(self.load_dump(objects, serial));
                }
                Command::Expire { cutoff, reply } => {
                    let _ = reply.send(self.expire(cutoff));
                }
                Command::SetSerial { serial, reply } => {
                    let _ = reply.send(self.set_serial(serial));
                }
            }
        }
        debug!("Journal writer for source {} stopped", self.source);
    }

    fn current(&self) -> Arc<SourceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn publish(&self, state: SourceState) {
        let serial = state.serial();
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
        self.serial.send_replace(serial);
    }

    fn commit(&self, operation: Operation, object: RpslObject) -> Result<Arc<JournalEntry>, JournalError> {
        let mut state = self.current().as_ref().clone();
        let entry = Arc::new(JournalEntry::new(
            self.source.clone(),
            state.next_serial(),
            operation,
            object,
            Origin::Local,
        ));

        self.store.save_entry(&entry)?;
        state.apply(entry.clone());
        self.publish(state);

        debug!("Committed {} {} as serial {} in {}", operation, entry.key(), entry.serial(), self.source);
        Ok(entry)
    }

    fn apply_mirror(&self, entries: Vec<MirrorEntry>) -> Result<usize, JournalError> {
        let mut state = self.current().as_ref().clone();
        let mut applied = 0;
        let mut res = Ok(());

        for mirrored in entries {
            if Some(mirrored.serial) <= state.serial() {
                continue;
            }
            if mirrored.serial != state.next_serial() {
                res = Err(JournalError::SerialGap {
                    source: self.source.clone(),
                    expected: state.next_serial(),
                    found: mirrored.serial,
                });
                break;
            }

            let entry = Arc::new(JournalEntry::new(
                self.source.clone(),
                mirrored.serial,
                mirrored.operation,
                mirrored.object,
                Origin::Mirror,
            ));
            if let Err(e) = self.store.save_entry(&entry) {
                res = Err(e.into());
                break;
            }
            state.apply(entry);
            applied += 1;
        }

        if applied > 0 {
            self.publish(state);
        }
        res.map(|_| applied)
    }

    fn load_dump(&self, objects: Vec<RpslObject>, serial: Option<Serial>) -> Result<usize, JournalError> {
        let state = self.current();
        let serial = match (serial, state.serial()) {
            (Some(requested), Some(current)) if requested <= current => {
                return Err(JournalError::SerialNotIncreasing {
                    source: self.source.clone(),
                    current,
                    requested,
                });
            }
            (Some(requested), _) => requested,
            (None, _) => state.next_serial(),
        };
        self.reset(objects, serial)
    }

    fn reset(&self, objects: Vec<RpslObject>, serial: Serial) -> Result<usize, JournalError> {
        let mut state = SourceState::new(self.source.clone());
        state.replace(objects, serial);
        self.store.save_reset(&state)?;

        let count = state.object_count();
        self.publish(state);

        info!("Reloaded source {} with {count} objects at serial {serial}", self.source);
        Ok(count)
    }

    fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, JournalError> {
        let mut state = self.current().as_ref().clone();
        let expired = state.expire(cutoff);
        if expired.is_empty() {
            return Ok(0);
        }

        self.store.remove_entries(&self.source, &expired)?;
        self.publish(state);
        Ok(expired.len())
    }

    fn set_serial(&self, serial: Serial) -> Result<(), JournalError> {
        let mut state = self.current().as_ref().clone();
        if let Some(current) = state.serial() {
            if serial < current {
                return Err(JournalError::SerialNotIncreasing {
                    source: self.source.clone(),
                    current,
                    requested: serial,
                });
            }
        }

        state.set_serial(serial);
        self.store.save_serial(&state)?;
        self.publish(state);
        Ok(())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpsl::parse;
    use crate::test;

    fn handle() -> JournalHandle {
        let store = Arc::new(JournalStore::create(&test::mem_storage()).unwrap());
        JournalHandle::spawn(store, test::source(test::TEST_SOURCE)).unwrap()
    }

    fn route(i: u32) -> RpslObject {
        parse(&test::route_text(&format!("10.{}.{}.0/24", i / 256, i % 256), 65000, "MAINT-TEST")).unwrap()
    }

    #[tokio::test]
    async fn concurrent_commits_get_unique_serials() {
        let handle = handle();

        let mut tasks = vec![];
        for i in 0..50 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.commit(Operation::AddOrUpdate, route(i)).await.unwrap().serial()
            }));
        }

        let mut serials = vec![];
        for task in tasks {
            serials.push(task.await.unwrap().into_u64());
        }
        serials.sort();
        assert_eq!(serials, (1..=50).collect::<Vec<_>>());

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.serial(), Some(Serial::new(50)));
        assert_eq!(snapshot.object_count(), 50);
        assert_eq!(handle.range(Serial::new(1), None).unwrap().len(), 50);
    }

    #[tokio::test]
    async fn snapshot_is_stable() {
        let handle = handle();
        handle.commit(Operation::AddOrUpdate, route(1)).await.unwrap();

        let before = handle.snapshot();
        handle.commit(Operation::AddOrUpdate, route(2)).await.unwrap();

        assert_eq!(before.object_count(), 1);
        assert_eq!(handle.snapshot().object_count(), 2);
    }

    #[tokio::test]
    async fn mirror_entries_must_be_contiguous() {
        let handle = handle();
        handle.reset(vec![route(1)], Serial::new(10)).await.unwrap();

        let entries = vec![
            MirrorEntry {
                serial: Serial::new(9),
                operation: Operation::AddOrUpdate,
                object: route(9),
            },
            MirrorEntry {
                serial: Serial::new(11),
                operation: Operation::AddOrUpdate,
                object: route(11),
            },
            MirrorEntry {
                serial: Serial::new(13),
                operation: Operation::AddOrUpdate,
                object: route(13),
            },
        ];

        match handle.apply_mirror(entries).await {
            Err(JournalError::SerialGap { expected, found, .. }) => {
                assert_eq!(expected, Serial::new(12));
                assert_eq!(found, Serial::new(13));
            }
            other => panic!("expected a gap, got {other:?}"),
        }

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.serial(), Some(Serial::new(11)));
        assert_eq!(snapshot.object_count(), 2);
        assert_eq!(handle.range(Serial::new(11), None).unwrap()[0].origin(), Origin::Mirror);
    }

    #[tokio::test]
    async fn set_serial_cannot_go_back() {
        let handle = handle();
        handle.set_serial(Serial::new(100)).await.unwrap();
        assert_eq!(handle.current_serial(), Some(Serial::new(100)));

        let entry = handle.commit(Operation::AddOrUpdate, route(1)).await.unwrap();
        assert_eq!(entry.serial(), Serial::new(101));

        assert!(matches!(
            handle.set_serial(Serial::new(50)).await,
            Err(JournalError::SerialNotIncreasing { .. })
        ));
    }

    #[tokio::test]
    async fn load_dump_moves_serial_forward() {
        let handle = handle();
        handle.commit(Operation::AddOrUpdate, route(1)).await.unwrap();

        // Without a serial the dump gets the next one.
        assert_eq!(handle.load_dump(vec![route(2)], None).await.unwrap(), 1);
        assert_eq!(handle.current_serial(), Some(Serial::new(2)));
        assert!(matches!(
            handle.range(Serial::new(2), None),
            Err(JournalError::SerialTooOld { .. })
        ));

        handle.load_dump(vec![route(3)], Some(Serial::new(100))).await.unwrap();
        assert_eq!(handle.current_serial(), Some(Serial::new(100)));

        for serial in [5, 100] {
            assert!(matches!(
                handle.load_dump(vec![route(4)], Some(Serial::new(serial))).await,
                Err(JournalError::SerialNotIncreasing { .. })
            ));
        }
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.serial(), Some(Serial::new(100)));
        assert!(snapshot.object(route(3).key()).is_some());
    }

    #[tokio::test]
    async fn load_dump_into_new_source_starts_at_one() {
        let handle = handle();
        handle.load_dump(vec![route(1)], None).await.unwrap();
        assert_eq!(handle.current_serial(), Some(Serial::new(1)));

        let entry = handle.commit(Operation::AddOrUpdate, route(2)).await.unwrap();
        assert_eq!(entry.serial(), Serial::new(2));
    }

    #[tokio::test]
    async fn subscribers_see_new_serials() {
        let handle = handle();
        let mut serials = handle.subscribe();

        handle.commit(Operation::AddOrUpdate, route(1)).await.unwrap();
        serials.changed().await.unwrap();
        assert_eq!(*serials.borrow(), Some(Serial::new(1)));
    }
}
