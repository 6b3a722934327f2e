//! The state of a single source: its objects and retained journal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use imbl::OrdMap;

use crate::rpsl::{ObjectKey, ObjectLookup, RpslObject, SourceName};

use super::{JournalEntry, JournalError, Operation, Serial};

//------------ SourceState ---------------------------------------------------

/// A consistent view of a source at a given serial.
///
/// The writer task derives a new state for every change and publishes it
/// as a whole, so a reader holding a state never sees a partial update.
/// Objects and journal live in persistent maps: cloning a state shares
/// them and a change only copies the path to the changed node.
#[derive(Clone, Debug)]
pub struct SourceState {
    source: SourceName,
    serial: Option<Serial>,
    objects: OrdMap<ObjectKey, Arc<RpslObject>>,
    journal: OrdMap<Serial, Arc<JournalEntry>>,
    last_update: Option<DateTime<Utc>>,

    /// Set when replacing all objects was interrupted. The serial is kept
    /// but the objects are gone until the source is loaded again.
    incomplete: bool,
}

impl SourceState {
    pub fn new(source: SourceName) -> Self {
        SourceState {
            source,
            serial: None,
            objects: OrdMap::new(),
            journal: OrdMap::new(),
            last_update: None,
            incomplete: false,
        }
    }

    pub fn source(&self) -> &SourceName {
        &self.source
    }

    /// The serial of the last change, or `None` for a source that was
    /// never initialised.
    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    /// The serial that the next change will get.
    pub fn next_serial(&self) -> Serial {
        self.serial.map(Serial::next).unwrap_or(Serial::new(1))
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Whether the objects of the source were lost in an interrupted
    /// reload and must be loaded again.
    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<RpslObject>> {
        self.objects.values()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<&Arc<RpslObject>> {
        self.objects.get(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn oldest_journal_serial(&self) -> Option<Serial> {
        self.journal.iter().next().map(|(serial, _)| *serial)
    }

    pub fn newest_journal_serial(&self) -> Option<Serial> {
        self.journal.iter().next_back().map(|(serial, _)| *serial)
    }

    pub fn journal_entries(&self) -> impl Iterator<Item = &Arc<JournalEntry>> {
        self.journal.values()
    }

    /// Returns the journal entries from `from` up to and including `to`.
    ///
    /// Without `to` all entries up to the current serial are returned. A
    /// range starting just after the current serial is empty.
    pub fn range(&self, from: Serial, to: Option<Serial>) -> Result<Vec<Arc<JournalEntry>>, JournalError> {
        let current = self.serial.unwrap_or(Serial::new(0));
        let invalid = || JournalError::InvalidRange {
            source: self.source.clone(),
            from,
            to,
            current: self.serial,
        };

        let to = match to {
            Some(to) if to > current => return Err(invalid()),
            Some(to) => to,
            None => current,
        };

        if from == current.next() && to == current {
            return Ok(vec![]);
        }
        if from > to {
            return Err(invalid());
        }

        let oldest = self.oldest_journal_serial().unwrap_or(current.next());
        if from < oldest {
            return Err(JournalError::SerialTooOld {
                source: self.source.clone(),
                requested: from,
                oldest,
            });
        }

        Ok(self.journal.range(from..=to).map(|(_, entry)| entry.clone()).collect())
    }

    /// Returns the keys of all objects that reference the given key.
    pub fn references_to(&self, key: &ObjectKey) -> Vec<ObjectKey> {
        self.objects
            .values()
            .filter(|obj| obj.key() != key && obj.references(key))
            .map(|obj| obj.key().clone())
            .collect()
    }
}

/// # Changes
///
/// These are only used by the writer and when replaying the stored
/// journal.
impl SourceState {
    pub(super) fn apply(&mut self, entry: Arc<JournalEntry>) {
        match entry.operation() {
            Operation::AddOrUpdate => {
                self.objects.insert(entry.key().clone(), Arc::new(entry.object().clone()));
            }
            Operation::Delete => {
                self.objects.remove(entry.key());
            }
        }
        self.serial = Some(entry.serial());
        self.last_update = Some(entry.timestamp());
        self.incomplete = false;
        self.journal.insert(entry.serial(), entry);
    }

    pub(super) fn restore(
        source: SourceName,
        serial: Option<Serial>,
        last_update: Option<DateTime<Utc>>,
        objects: Vec<RpslObject>,
    ) -> Self {
        SourceState {
            source,
            serial,
            objects: objects.into_iter().map(|obj| (obj.key().clone(), Arc::new(obj))).collect(),
            journal: OrdMap::new(),
            last_update,
            incomplete: false,
        }
    }

    pub(super) fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    pub(super) fn add_journal_entry(&mut self, entry: Arc<JournalEntry>) {
        self.journal.insert(entry.serial(), entry);
    }

    pub(super) fn replace(&mut self, objects: Vec<RpslObject>, serial: Serial) {
        self.objects = objects.into_iter().map(|obj| (obj.key().clone(), Arc::new(obj))).collect();
        self.journal = OrdMap::new();
        self.serial = Some(serial);
        self.last_update = Some(Utc::now());
        self.incomplete = false;
    }

    /// Removes the oldest journal entries up to the first one that is not
    /// older than the cutoff and returns their serials.
    ///
    /// Only a leading run is removed, so the retained journal stays
    /// contiguous even if timestamps are out of order.
    pub(super) fn expire(&mut self, cutoff: DateTime<Utc>) -> Vec<Serial> {
        let expired: Vec<Serial> = self
            .journal
            .iter()
            .take_while(|(_, entry)| entry.timestamp() < cutoff)
            .map(|(serial, _)| *serial)
            .collect();
        for serial in &expired {
            self.journal.remove(serial);
        }
        expired
    }

    pub(super) fn set_serial(&mut self, serial: Serial) {
        self.serial = Some(serial);
        self.journal = OrdMap::new();
        self.last_update = Some(Utc::now());
    }
}

impl ObjectLookup for SourceState {
    fn get_object(&self, key: &ObjectKey) -> Option<Arc<RpslObject>> {
        self.objects.get(key).cloned()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Origin;
    use crate::rpsl::parse;
    use crate::test;

    fn state_with_routes(count: u32) -> SourceState {
        let mut state = SourceState::new(test::source(test::TEST_SOURCE));
        for i in 0..count {
            let obj = parse(&test::route_text(&format!("192.0.{i}.0/24"), 65000 + i, "MAINT-TEST")).unwrap();
            let entry = JournalEntry::new(
                state.source().clone(),
                state.next_serial(),
                Operation::AddOrUpdate,
                obj,
                Origin::Local,
            );
            state.apply(Arc::new(entry));
        }
        state
    }

    #[test]
    fn serials_increase() {
        let state = state_with_routes(3);
        assert_eq!(state.serial(), Some(Serial::new(3)));
        assert_eq!(state.next_serial(), Serial::new(4));
        assert_eq!(state.object_count(), 3);
        assert_eq!(state.oldest_journal_serial(), Some(Serial::new(1)));
    }

    #[test]
    fn range_rules() {
        let state = state_with_routes(5);

        let entries = state.range(Serial::new(2), Some(Serial::new(4))).unwrap();
        let serials: Vec<u64> = entries.iter().map(|e| e.serial().into_u64()).collect();
        assert_eq!(serials, vec![2, 3, 4]);

        assert_eq!(state.range(Serial::new(3), None).unwrap().len(), 3);
        assert!(state.range(Serial::new(6), None).unwrap().is_empty());

        assert!(matches!(
            state.range(Serial::new(2), Some(Serial::new(9))),
            Err(JournalError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.range(Serial::new(4), Some(Serial::new(2))),
            Err(JournalError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.range(Serial::new(8), None),
            Err(JournalError::InvalidRange { .. })
        ));
    }

    #[test]
    fn range_after_expiry_is_too_old() {
        let mut state = state_with_routes(4);
        let expired = state.expire(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(expired.len(), 4);
        assert_eq!(state.journal_len(), 0);
        assert_eq!(state.serial(), Some(Serial::new(4)));

        match state.range(Serial::new(2), None) {
            Err(JournalError::SerialTooOld { requested, oldest, .. }) => {
                assert_eq!(requested, Serial::new(2));
                assert_eq!(oldest, Serial::new(5));
            }
            other => panic!("expected too old, got {other:?}"),
        }
        assert!(state.range(Serial::new(5), None).unwrap().is_empty());
    }

    #[test]
    fn expiry_keeps_journal_contiguous() {
        let now = Utc::now();
        let mut state = SourceState::new(test::source(test::TEST_SOURCE));

        // The clock went back before the third change was made.
        for (i, age) in [10, 1, 20].into_iter().enumerate() {
            let obj = parse(&test::route_text(&format!("192.0.{i}.0/24"), 65000, "MAINT-TEST")).unwrap();
            let mut entry = JournalEntry::new(
                state.source().clone(),
                state.next_serial(),
                Operation::AddOrUpdate,
                obj,
                Origin::Local,
            );
            entry.timestamp = now - chrono::Duration::days(age);
            state.apply(Arc::new(entry));
        }

        let expired = state.expire(now - chrono::Duration::days(5));
        assert_eq!(expired, vec![Serial::new(1)]);
        assert_eq!(state.oldest_journal_serial(), Some(Serial::new(2)));

        let serials: Vec<u64> = state
            .range(Serial::new(2), None)
            .unwrap()
            .iter()
            .map(|e| e.serial().into_u64())
            .collect();
        assert_eq!(serials, vec![2, 3]);
        assert!(matches!(
            state.range(Serial::new(1), None),
            Err(JournalError::SerialTooOld { .. })
        ));
    }

    #[test]
    fn clones_share_unchanged_objects() {
        let state = state_with_routes(3);
        let mut changed = state.clone();
        let obj = parse(&test::route_text("198.51.100.0/24", 65010, "MAINT-TEST")).unwrap();
        let entry = JournalEntry::new(
            changed.source().clone(),
            changed.next_serial(),
            Operation::AddOrUpdate,
            obj,
            Origin::Local,
        );
        changed.apply(Arc::new(entry));

        assert_eq!(state.object_count(), 3);
        assert_eq!(state.journal_len(), 3);
        assert_eq!(changed.object_count(), 4);
        for object in state.objects() {
            assert!(Arc::ptr_eq(object, changed.object(object.key()).unwrap()));
        }
    }

    #[test]
    fn delete_keeps_body_in_journal() {
        let mut state = state_with_routes(1);
        let obj = state.objects().next().unwrap().as_ref().clone();
        let key = obj.key().clone();
        let entry = JournalEntry::new(
            state.source().clone(),
            state.next_serial(),
            Operation::Delete,
            obj,
            Origin::Local,
        );
        state.apply(Arc::new(entry));

        assert!(state.object(&key).is_none());
        let entries = state.range(Serial::new(2), None).unwrap();
        assert_eq!(entries[0].operation(), Operation::Delete);
        assert!(entries[0].object().text().contains("192.0.0.0/24"));
    }
}
