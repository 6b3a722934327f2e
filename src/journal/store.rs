//! Persistence of source state.
//!
//! For every source the store keeps:
//!
//! ```text
//!   <source>/status.json                    serial and last update
//!   <source>/objects/<class>/<pk>.json      the current objects
//!   <source>/journal/<serial>.json          the retained journal
//! ```
//!
//! A journal entry is written before the object it changes and before the
//! status. When the daemon stops between these writes, the entry is
//! replayed on the next start.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::commons::storage::{Key, KeyValueError, KeyValueStore, KeyValueStoreDispatcher, Scope, Segment, StorageResult};
use crate::constants::{JOURNAL_SCOPE, OBJECTS_SCOPE, SOURCES_NS, STATUS_KEY};
use crate::rpsl::{ObjectClass, ObjectKey, RpslObject, SourceName};

use super::{JournalEntry, Operation, Serial, SourceState};

//------------ StatusRecord --------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct StatusRecord {
    serial: Option<Serial>,
    last_update: Option<DateTime<Utc>>,

    /// Set while all objects of a source are being replaced. It stays set
    /// after an interrupted reload until the source is loaded again or
    /// gets a new change.
    #[serde(default)]
    reloading: bool,
}

impl StatusRecord {
    fn of(state: &SourceState, reloading: bool) -> Self {
        StatusRecord {
            serial: state.serial(),
            last_update: state.last_update(),
            reloading,
        }
    }

    fn after(entry: &JournalEntry) -> Self {
        StatusRecord {
            serial: Some(entry.serial()),
            last_update: Some(entry.timestamp()),
            reloading: false,
        }
    }
}

//------------ JournalStore --------------------------------------------------

#[derive(Debug)]
pub struct JournalStore {
    kv: KeyValueStore,
}

impl JournalStore {
    pub fn create(storage_uri: &Url) -> StorageResult<Self> {
        KeyValueStore::create(storage_uri, SOURCES_NS).map(|kv| JournalStore { kv })
    }

    /// Loads the state of a source, replaying any journal entries that
    /// were not fully applied.
    pub fn load(&self, source: &SourceName) -> StorageResult<SourceState> {
        self.kv.execute(&Self::source_scope(source)?, |kv| {
            let status: StatusRecord = kv.get_json(&Self::status_key(source)?)?.unwrap_or_default();

            if status.reloading {
                warn!(
                    "Reload of source {source} was interrupted, discarding its objects and journal, keeping serial {:?}",
                    status.serial
                );
                kv.delete_scope(&Self::objects_scope(source)?)?;
                kv.delete_scope(&Self::journal_scope(source)?)?;
                let mut state = SourceState::restore(source.clone(), status.serial, status.last_update, vec![]);
                state.mark_incomplete();
                return Ok(state);
            }

            let mut objects = vec![];
            for class in ObjectClass::ALL {
                for key in kv.keys(&Self::class_scope(source, class)?)? {
                    let object: RpslObject = kv.get_json(&key)?.ok_or(KeyValueError::UnknownKey(key))?;
                    objects.push(object);
                }
            }

            let mut state = SourceState::restore(source.clone(), status.serial, status.last_update, objects);

            let mut entries = vec![];
            for key in kv.keys(&Self::journal_scope(source)?)? {
                let entry: JournalEntry = kv.get_json(&key)?.ok_or(KeyValueError::UnknownKey(key))?;
                entries.push(entry);
            }
            entries.sort_by_key(|entry| entry.serial());

            for entry in entries {
                let entry = Arc::new(entry);
                if Some(entry.serial()) <= state.serial() {
                    state.add_journal_entry(entry);
                } else if entry.serial() == state.next_serial() {
                    info!("Replaying journal entry {} for source {source}", entry.serial());
                    Self::write_object(kv, &entry)?;
                    Self::write_status(kv, source, &StatusRecord::after(&entry))?;
                    state.apply(entry);
                } else {
                    warn!(
                        "Dropping journal entry {} for source {source}, current serial is {:?}",
                        entry.serial(),
                        state.serial()
                    );
                    kv.delete(&Self::journal_key(source, entry.serial())?)?;
                }
            }

            Ok(state)
        })
    }

    /// Persists a new journal entry and its effect.
    ///
    /// If anything but the journal entry itself fails to be written, the
    /// entry is removed again so that it is not replayed later.
    pub(super) fn save_entry(&self, entry: &JournalEntry) -> StorageResult<()> {
        let source = entry.source();
        self.kv.execute(&Self::source_scope(source)?, |kv| {
            let journal_key = Self::journal_key(source, entry.serial())?;
            kv.store_json(&journal_key, entry)?;

            let res =
                Self::write_object(kv, entry).and_then(|_| Self::write_status(kv, source, &StatusRecord::after(entry)));
            if res.is_err() {
                if let Err(e) = kv.delete(&journal_key) {
                    error!("Could not remove journal entry {} of source {source}: {e}", entry.serial());
                }
            }
            res
        })
    }

    /// Replaces all objects and the journal of a source.
    pub(super) fn save_reset(&self, state: &SourceState) -> StorageResult<()> {
        let source = state.source();
        self.kv.execute(&Self::source_scope(source)?, |kv| {
            Self::write_status(kv, source, &StatusRecord::of(state, true))?;
            kv.delete_scope(&Self::objects_scope(source)?)?;
            kv.delete_scope(&Self::journal_scope(source)?)?;
            for object in state.objects() {
                kv.store_json(&Self::object_key(source, object.key())?, object.as_ref())?;
            }
            Self::write_status(kv, source, &StatusRecord::of(state, false))
        })
    }

    pub(super) fn remove_entries(&self, source: &SourceName, serials: &[Serial]) -> StorageResult<()> {
        self.kv.execute(&Self::source_scope(source)?, |kv| {
            for serial in serials {
                kv.delete(&Self::journal_key(source, *serial)?)?;
            }
            Ok(())
        })
    }

    /// Saves a new serial and drops the journal.
    pub(super) fn save_serial(&self, state: &SourceState) -> StorageResult<()> {
        let source = state.source();
        self.kv.execute(&Self::source_scope(source)?, |kv| {
            kv.delete_scope(&Self::journal_scope(source)?)?;
            Self::write_status(kv, source, &StatusRecord::of(state, false))
        })
    }

    fn write_object(kv: &KeyValueStoreDispatcher, entry: &JournalEntry) -> StorageResult<()> {
        let key = Self::object_key(entry.source(), entry.key())?;
        match entry.operation() {
            Operation::AddOrUpdate => kv.store_json(&key, entry.object()),
            Operation::Delete => kv.delete(&key),
        }
    }

    fn write_status(kv: &KeyValueStoreDispatcher, source: &SourceName, status: &StatusRecord) -> StorageResult<()> {
        kv.store_json(&Self::status_key(source)?, status)
    }
}

/// # Keys
impl JournalStore {
    fn source_scope(source: &SourceName) -> StorageResult<Scope> {
        Ok(Scope::from_segment(Segment::parse(source.as_str())?))
    }

    fn sub_scope(source: &SourceName, sub: &str) -> StorageResult<Scope> {
        Ok(Self::source_scope(source)?.with_sub_scope(Segment::parse(sub)?))
    }

    fn objects_scope(source: &SourceName) -> StorageResult<Scope> {
        Self::sub_scope(source, OBJECTS_SCOPE)
    }

    fn journal_scope(source: &SourceName) -> StorageResult<Scope> {
        Self::sub_scope(source, JOURNAL_SCOPE)
    }

    fn class_scope(source: &SourceName, class: ObjectClass) -> StorageResult<Scope> {
        Ok(Self::objects_scope(source)?.with_sub_scope(Segment::parse(class.name())?))
    }

    fn status_key(source: &SourceName) -> StorageResult<Key> {
        Ok(Key::new_scoped(Self::source_scope(source)?, Segment::parse(STATUS_KEY)?))
    }

    fn object_key(source: &SourceName, key: &ObjectKey) -> StorageResult<Key> {
        let name = Segment::encode(&format!("{}.json", key.pk()))?;
        Ok(Key::new_scoped(Self::class_scope(source, key.class())?, name))
    }

    fn journal_key(source: &SourceName, serial: Serial) -> StorageResult<Key> {
        let name = Segment::parse(&format!("{serial}.json"))?;
        Ok(Key::new_scoped(Self::journal_scope(source)?, name))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Origin;
    use crate::rpsl::parse;
    use crate::test;

    fn entry(state: &SourceState, text: &str, operation: Operation) -> JournalEntry {
        JournalEntry::new(
            state.source().clone(),
            state.next_serial(),
            operation,
            parse(text).unwrap(),
            Origin::Local,
        )
    }

    fn commit(store: &JournalStore, state: &mut SourceState, text: &str, operation: Operation) {
        let entry = Arc::new(entry(state, text, operation));
        store.save_entry(&entry).unwrap();
        state.apply(entry);
    }

    #[test]
    fn save_and_load_disk() {
        let (_dir, uri) = test::tmp_storage();
        let source = test::source(test::TEST_SOURCE);
        let store = JournalStore::create(&uri).unwrap();

        let mut state = store.load(&source).unwrap();
        assert_eq!(state.serial(), None);

        commit(&store, &mut state, &test::mntner_text("MAINT-TEST", &[test::MD5_PW_HASH]), Operation::AddOrUpdate);
        commit(&store, &mut state, &test::route_text("192.0.2.0/24", 65530, "MAINT-TEST"), Operation::AddOrUpdate);
        commit(&store, &mut state, &test::route_text("2001:db8::/32", 65530, "MAINT-TEST"), Operation::AddOrUpdate);
        commit(&store, &mut state, &test::route_text("192.0.2.0/24", 65530, "MAINT-TEST"), Operation::Delete);

        let loaded = JournalStore::create(&uri).unwrap().load(&source).unwrap();
        assert_eq!(loaded.serial(), Some(Serial::new(4)));
        assert_eq!(loaded.object_count(), 2);
        assert_eq!(loaded.journal_len(), 4);
    }

    #[test]
    fn replay_unapplied_entry() {
        let uri = test::mem_storage();
        let source = test::source(test::TEST_SOURCE);
        let store = JournalStore::create(&uri).unwrap();

        let mut state = store.load(&source).unwrap();
        commit(&store, &mut state, &test::mntner_text("MAINT-TEST", &[test::MD5_PW_HASH]), Operation::AddOrUpdate);

        // Only the journal entry of the second change made it to storage.
        let pending = entry(&state, &test::route_text("192.0.2.0/24", 65530, "MAINT-TEST"), Operation::AddOrUpdate);
        let key = JournalStore::journal_key(&source, pending.serial()).unwrap();
        store.kv.store(&key, &pending).unwrap();

        let loaded = store.load(&source).unwrap();
        assert_eq!(loaded.serial(), Some(Serial::new(2)));
        assert_eq!(loaded.object_count(), 2);

        let again = store.load(&source).unwrap();
        assert_eq!(again.serial(), Some(Serial::new(2)));
    }

    #[test]
    fn reset_replaces_everything() {
        let uri = test::mem_storage();
        let source = test::source(test::TEST_SOURCE);
        let store = JournalStore::create(&uri).unwrap();

        let mut state = store.load(&source).unwrap();
        commit(&store, &mut state, &test::route_text("192.0.2.0/24", 65530, "MAINT-TEST"), Operation::AddOrUpdate);

        let objects = vec![parse(&test::route_text("198.51.100.0/24", 65531, "MAINT-TEST")).unwrap()];
        state.replace(objects, Serial::new(100));
        store.save_reset(&state).unwrap();

        let loaded = store.load(&source).unwrap();
        assert_eq!(loaded.serial(), Some(Serial::new(100)));
        assert_eq!(loaded.object_count(), 1);
        assert_eq!(loaded.journal_len(), 0);
    }

    #[test]
    fn interrupted_reset_keeps_serial() {
        let uri = test::mem_storage();
        let source = test::source(test::TEST_SOURCE);
        let store = JournalStore::create(&uri).unwrap();

        let mut state = store.load(&source).unwrap();
        commit(&store, &mut state, &test::route_text("192.0.2.0/24", 65530, "MAINT-TEST"), Operation::AddOrUpdate);
        store
            .kv
            .execute(&JournalStore::source_scope(&source).unwrap(), |kv| {
                JournalStore::write_status(kv, &source, &StatusRecord::of(&state, true))
            })
            .unwrap();

        let loaded = store.load(&source).unwrap();
        assert_eq!(loaded.serial(), Some(Serial::new(1)));
        assert_eq!(loaded.object_count(), 0);
        assert_eq!(loaded.journal_len(), 0);
        assert!(loaded.is_incomplete());

        // Still incomplete after another restart.
        let mut loaded = store.load(&source).unwrap();
        assert!(loaded.is_incomplete());

        // New changes continue after the kept serial.
        commit(&store, &mut loaded, &test::route_text("198.51.100.0/24", 65530, "MAINT-TEST"), Operation::AddOrUpdate);
        assert_eq!(loaded.serial(), Some(Serial::new(2)));
        assert!(!loaded.is_incomplete());

        let again = store.load(&source).unwrap();
        assert_eq!(again.serial(), Some(Serial::new(2)));
        assert_eq!(again.object_count(), 1);
        assert!(!again.is_incomplete());
    }
}
