//! Processing submitted changes.
//!
//! A submission is handled in two phases. First every object is parsed and
//! validated against the current state of its source plus all other
//! objects in the same submission. Then the valid objects are authorized
//! and committed one by one. Authorization is repeated until no further
//! object passes, so that the order of objects in a submission does not
//! matter: a person maintained by a new mntner submitted before that
//! mntner is still accepted.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use base64::Engine;

use crate::auth::{self, Change, Credentials};
use crate::commons::api::{ChangeType, ObjectResult, Outcome, SubmissionReport, SubmissionRequest};
use crate::commons::error::Error;
use crate::commons::IrrdResult;
use crate::daemon::config::RuntimeConfig;
use crate::journal::{JournalHandle, Operation, SourceState};
use crate::rpsl::{self, ObjectKey, ObjectLookup, RpslObject, SourceName};

//------------ Item ----------------------------------------------------------

/// A single object of a submission.
struct Item {
    object: Option<Arc<RpslObject>>,
    delete: bool,
    before: Option<Arc<RpslObject>>,
    outcome: Option<Outcome>,
    warnings: Vec<String>,
}

impl Item {
    fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    fn source(&self) -> Option<SourceName> {
        self.object.as_ref().and_then(|o| o.source())
    }

    fn reject(&mut self, error: impl ToString) {
        self.outcome = Some(Outcome::Rejected {
            errors: vec![error.to_string()],
        });
    }

    fn into_result(self) -> ObjectResult {
        let change = self.object.as_ref().map(|_| {
            if self.delete {
                ChangeType::Delete
            } else if self.before.is_some() {
                ChangeType::Modify
            } else {
                ChangeType::Create
            }
        });
        ObjectResult {
            object: self.object.as_ref().map(|o| o.key().to_string()),
            source: self.object.as_ref().and_then(|o| o.source()),
            change,
            outcome: self.outcome.unwrap_or_else(|| Outcome::Denied {
                reason: auth::Denied::NoMatchingCredentials.to_string(),
            }),
            warnings: self.warnings,
        }
    }
}

//------------ Overlay -------------------------------------------------------

/// The state of a source with pending changes on top.
struct Overlay {
    state: Arc<SourceState>,
    changes: BTreeMap<ObjectKey, Option<Arc<RpslObject>>>,
}

impl Overlay {
    fn new(state: Arc<SourceState>) -> Self {
        Overlay {
            state,
            changes: BTreeMap::new(),
        }
    }
}

impl ObjectLookup for Overlay {
    fn get_object(&self, key: &ObjectKey) -> Option<Arc<RpslObject>> {
        match self.changes.get(key) {
            Some(change) => change.clone(),
            None => self.state.get_object(key),
        }
    }
}

/// A lookup that also finds one extra object.
struct WithObject<'a> {
    base: &'a dyn ObjectLookup,
    object: &'a Arc<RpslObject>,
}

impl ObjectLookup for WithObject<'_> {
    fn get_object(&self, key: &ObjectKey) -> Option<Arc<RpslObject>> {
        if key == self.object.key() {
            Some(self.object.clone())
        } else {
            self.base.get_object(key)
        }
    }
}

//------------ Submission ----------------------------------------------------

/// A parsed submission, ready to be processed.
pub struct Submission {
    items: Vec<Item>,
    passwords: Vec<String>,
    signatures: Vec<Vec<u8>>,
    signed_data: Vec<u8>,
    override_password: Option<String>,
}

impl Submission {
    /// Splits and parses the submitted objects.
    ///
    /// The pseudo attributes `delete:`, `password:` and `override:` are
    /// removed from the objects. Passwords and the override found in any
    /// object apply to the whole submission.
    pub fn parse(request: &SubmissionRequest) -> IrrdResult<Self> {
        let signatures = request
            .signatures
            .iter()
            .map(|sig| {
                base64::engine::general_purpose::STANDARD
                    .decode(sig.trim())
                    .map_err(|e| Error::invalid_request(format!("invalid signature encoding: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut submission = Submission {
            items: Vec::new(),
            passwords: request.passwords.clone(),
            signatures,
            signed_data: request.objects.as_bytes().to_vec(),
            override_password: request.override_password.clone(),
        };

        for text in rpsl::split_objects(&request.objects) {
            let (text, delete) = submission.strip_pseudo_attributes(&text);
            let mut item = Item {
                object: None,
                delete,
                before: None,
                outcome: None,
                warnings: Vec::new(),
            };
            match rpsl::parse(&text) {
                Ok(object) => item.object = Some(Arc::new(object)),
                Err(e) => item.reject(e),
            }
            submission.items.push(item);
        }

        if submission.items.is_empty() {
            return Err(Error::invalid_request("no objects submitted"));
        }
        Ok(submission)
    }

    fn strip_pseudo_attributes(&mut self, text: &str) -> (String, bool) {
        let mut delete = false;
        let mut res = String::with_capacity(text.len());
        for line in text.lines() {
            let pseudo = line
                .split_once(':')
                .filter(|(name, _)| !name.starts_with(char::is_whitespace))
                .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim()));
            match pseudo {
                Some((name, _)) if name == "delete" => delete = true,
                Some((name, value)) if name == "password" => self.passwords.push(value.to_string()),
                Some((name, value)) if name == "override" => self.override_password = Some(value.to_string()),
                _ => {
                    res.push_str(line);
                    res.push('\n');
                }
            }
        }
        (res, delete)
    }

    /// Rejects pending objects whose source cannot be written to.
    ///
    /// The closure returns the reason if the named source is not writable.
    pub fn check_sources(&mut self, mut check: impl FnMut(&SourceName) -> Option<String>) {
        for item in self.items.iter_mut().filter(|i| i.is_pending()) {
            match item.source() {
                None => item.reject("object has no valid source attribute"),
                Some(source) => {
                    if let Some(reason) = check(&source) {
                        item.reject(reason);
                    }
                }
            }
        }
    }

    /// The sources of all pending objects, in order.
    pub fn sources(&self) -> BTreeSet<SourceName> {
        self.items
            .iter()
            .filter(|i| i.is_pending())
            .filter_map(Item::source)
            .collect()
    }

    /// Validates, authorizes and commits the submission.
    ///
    /// The caller must hold the submission lock of every source in
    /// `journals`, and `journals` must contain every source returned by
    /// [`Submission::sources`].
    pub async fn process(
        mut self,
        journals: &BTreeMap<SourceName, JournalHandle>,
        runtime: &RuntimeConfig,
    ) -> SubmissionReport {
        let mut overlays: BTreeMap<SourceName, Overlay> = journals
            .iter()
            .map(|(name, journal)| (name.clone(), Overlay::new(journal.snapshot())))
            .collect();

        for item in self.items.iter_mut().filter(|i| i.is_pending()) {
            let has_journal = item.source().is_some_and(|s| journals.contains_key(&s));
            if !has_journal {
                item.reject("source is not writable");
            }
        }

        self.validate(&overlays, runtime);
        self.authorize_and_commit(journals, &mut overlays, runtime).await;

        SubmissionReport::new(self.items.into_iter().map(Item::into_result).collect())
    }

    fn validate(&mut self, overlays: &BTreeMap<SourceName, Overlay>, runtime: &RuntimeConfig) {
        // Objects may refer to each other within a submission.
        let mut batch: BTreeMap<SourceName, Overlay> = overlays
            .iter()
            .map(|(name, overlay)| (name.clone(), Overlay::new(overlay.state.clone())))
            .collect();
        let mut deleted: BTreeSet<ObjectKey> = BTreeSet::new();
        for item in self.items.iter().filter(|i| i.is_pending()) {
            let (Some(object), Some(source)) = (&item.object, item.source()) else {
                continue;
            };
            if item.delete {
                deleted.insert(object.key().clone());
            } else if let Some(overlay) = batch.get_mut(&source) {
                overlay.changes.insert(object.key().clone(), Some(object.clone()));
            }
        }

        for item in self.items.iter_mut().filter(|i| i.is_pending()) {
            let (Some(object), Some(source)) = (item.object.clone(), item.source()) else {
                continue;
            };
            let Some(overlay) = batch.get(&source) else {
                continue;
            };
            item.before = overlay.state.get_object(object.key());

            if item.delete {
                if item.before.is_none() {
                    item.reject(format!("cannot delete {}: object does not exist", object.key()));
                    continue;
                }
                let referencing: Vec<ObjectKey> = overlay
                    .state
                    .references_to(object.key())
                    .into_iter()
                    .filter(|k| !deleted.contains(k))
                    .collect();
                if let Err(errors) = rpsl::validate_deletion(object.key(), &referencing) {
                    item.outcome = Some(Outcome::Rejected {
                        errors: errors.messages(),
                    });
                }
            } else {
                match rpsl::validate(&object, overlay, runtime.reference_validation()) {
                    Ok(report) => item.warnings = report.into_warnings(),
                    Err(errors) => {
                        item.outcome = Some(Outcome::Rejected {
                            errors: errors.messages(),
                        })
                    }
                }
            }
        }
    }

    async fn authorize_and_commit(
        &mut self,
        journals: &BTreeMap<SourceName, JournalHandle>,
        overlays: &mut BTreeMap<SourceName, Overlay>,
        runtime: &RuntimeConfig,
    ) {
        let credentials = Credentials {
            passwords: &self.passwords,
            signatures: &self.signatures,
            signed_data: &self.signed_data,
            override_password: self.override_password.as_deref(),
        };
        let policy = runtime.auth_policy();
        let mut denied: BTreeMap<usize, String> = BTreeMap::new();

        loop {
            let mut progress = false;

            for (idx, item) in self.items.iter_mut().enumerate() {
                if !item.is_pending() {
                    continue;
                }
                let (Some(object), Some(source)) = (item.object.clone(), item.source()) else {
                    continue;
                };
                let (Some(overlay), Some(journal)) = (overlays.get_mut(&source), journals.get(&source)) else {
                    continue;
                };

                let before = overlay.get_object(object.key());
                if item.delete && before.is_none() {
                    item.reject(format!("cannot delete {}: object does not exist", object.key()));
                    continue;
                }

                let change = Change {
                    before: before.as_deref(),
                    after: &object,
                    delete: item.delete,
                };
                // A new maintainer may authorize its own creation.
                let res = if before.is_none() {
                    let lookup = WithObject {
                        base: &*overlay,
                        object: &object,
                    };
                    auth::authorize(change, credentials, policy, &lookup)
                } else {
                    auth::authorize(change, credentials, policy, &*overlay)
                };

                let authorized = match res {
                    Ok(authorized) => authorized,
                    Err(reason) => {
                        denied.insert(idx, reason.to_string());
                        continue;
                    }
                };

                let (operation, committed) = match (item.delete, &before) {
                    (true, Some(before)) => (Operation::Delete, before.as_ref().clone()),
                    _ => (Operation::AddOrUpdate, object.as_ref().clone()),
                };
                match journal.commit(operation, committed).await {
                    Ok(entry) => {
                        info!(
                            "Committed {} {} in {} at serial {} ({:?})",
                            operation,
                            object.key(),
                            source,
                            entry.serial(),
                            authorized
                        );
                        if !item.delete {
                            item.before = before;
                        }
                        item.outcome = Some(Outcome::Accepted { serial: entry.serial() });
                        let change = if item.delete { None } else { Some(object.clone()) };
                        overlay.changes.insert(object.key().clone(), change);
                        progress = true;
                    }
                    Err(e) => {
                        error!("Could not commit {} in {}: {}", object.key(), source, e);
                        item.reject(e);
                    }
                }
            }

            if !progress {
                break;
            }
        }

        for (idx, item) in self.items.iter_mut().enumerate() {
            if item.is_pending() {
                let reason = denied
                    .remove(&idx)
                    .unwrap_or_else(|| auth::Denied::NoMatchingCredentials.to_string());
                debug!("Denied change for submitted object {}: {}", idx + 1, reason);
                item.outcome = Some(Outcome::Denied { reason });
            }
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::daemon::config::{Config, SourceConfig};
    use crate::journal::{JournalStore, Serial};
    use crate::test;

    struct Fixture {
        journal: JournalHandle,
        runtime: RuntimeConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(f: impl FnOnce(&mut Config)) -> Self {
            let storage = test::mem_storage();
            let store = Arc::new(JournalStore::create(&storage).unwrap());
            let journal = JournalHandle::spawn(store, test::source(test::TEST_SOURCE)).unwrap();
            let mut config = Config::test(
                &storage,
                vec![SourceConfig::authoritative(test::source(test::TEST_SOURCE))],
            );
            config.override_password = Some(test::MD5_PW_HASH.to_string());
            f(&mut config);
            let runtime = RuntimeConfig::from_config(&config, 1).unwrap();
            Fixture { journal, runtime }
        }

        async fn submit(&self, request: SubmissionRequest) -> SubmissionReport {
            let mut submission = Submission::parse(&request).unwrap();
            submission.check_sources(|name| {
                (name.to_string() != test::TEST_SOURCE).then(|| format!("unknown source {name}"))
            });
            let journals = BTreeMap::from([(test::source(test::TEST_SOURCE), self.journal.clone())]);
            submission.process(&journals, &self.runtime).await
        }

        async fn submit_text(&self, objects: String, password: &str) -> SubmissionReport {
            self.submit(SubmissionRequest {
                objects,
                passwords: vec![password.to_string()],
                ..Default::default()
            })
            .await
        }
    }

    fn maintained_objects() -> String {
        let auth = test::MD5_PW_HASH;
        format!(
            "{}\n{}\n{}",
            test::person_text("PERSON-TEST", "MNT-TEST"),
            test::mntner_text("MNT-TEST", &[auth]),
            test::route_text("192.0.2.0/24", 65001, "MNT-TEST"),
        )
    }

    #[tokio::test]
    async fn batch_order_does_not_matter() {
        let fixture = Fixture::new();
        let report = fixture
            .submit_text(maintained_objects(), test::MD5_PW_PASSWORD)
            .await;

        assert!(report.all_accepted(), "{report:?}");
        let serials: Vec<_> = report.results().iter().filter_map(|r| r.outcome.serial()).collect();
        let mut sorted = serials.clone();
        sorted.sort();
        assert_eq!(sorted, vec![Serial::new(1), Serial::new(2), Serial::new(3)]);
        assert!(report.results().iter().all(|r| r.change == Some(ChangeType::Create)));
        assert_eq!(fixture.journal.current_serial(), Some(Serial::new(3)));
    }

    #[tokio::test]
    async fn wrong_password_is_denied_without_change() {
        let fixture = Fixture::new();
        let report = fixture.submit_text(maintained_objects(), test::MD5_PW_PASSWORD).await;
        assert!(report.all_accepted());

        let mut person = test::person_text("PERSON-TEST", "MNT-TEST");
        person.push_str("remarks: changed\n");
        let report = fixture.submit_text(person, "wrong").await;
        let result = &report.results()[0];
        assert_eq!(
            result.outcome,
            Outcome::Denied {
                reason: "no matching credentials".to_string()
            }
        );
        assert_eq!(result.change, Some(ChangeType::Modify));
        assert_eq!(fixture.journal.current_serial(), Some(Serial::new(3)));
    }

    #[tokio::test]
    async fn inline_passwords_and_deletion() {
        let fixture = Fixture::new();
        fixture.submit_text(maintained_objects(), test::MD5_PW_PASSWORD).await;

        let text = format!(
            "{}delete: no longer announced\npassword: {}\n",
            test::route_text("192.0.2.0/24", 65001, "MNT-TEST"),
            test::MD5_PW_PASSWORD
        );
        let report = fixture.submit(SubmissionRequest {
            objects: text,
            ..Default::default()
        })
        .await;
        let result = &report.results()[0];
        assert_eq!(result.change, Some(ChangeType::Delete));
        assert_eq!(result.outcome.serial(), Some(Serial::new(4)));
        assert!(fixture.journal.snapshot().object_count() == 2);

        // Deleting it again fails.
        let text = format!("{}delete: again\n", test::route_text("192.0.2.0/24", 65001, "MNT-TEST"));
        let report = fixture.submit_text(text, test::MD5_PW_PASSWORD).await;
        assert!(matches!(report.results()[0].outcome, Outcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn referenced_objects_cannot_be_deleted() {
        let fixture = Fixture::new();
        fixture.submit_text(maintained_objects(), test::MD5_PW_PASSWORD).await;

        let text = format!("{}delete: cleanup\n", test::person_text("PERSON-TEST", "MNT-TEST"));
        let report = fixture.submit_text(text, test::MD5_PW_PASSWORD).await;
        assert!(matches!(report.results()[0].outcome, Outcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn invalid_objects_are_rejected() {
        let fixture = Fixture::new();
        let unknown_source = test::with_source(&test::route_text("192.0.2.0/24", 65001, "MNT-TEST"), "OTHER");
        let dangling = test::route_text("198.51.100.0/24", 65001, "MNT-MISSING");
        let garbage = "this is not rpsl\n".to_string();

        let report = fixture
            .submit_text(format!("{unknown_source}\n{dangling}\n{garbage}"), "x")
            .await;

        assert_eq!(report.results().len(), 3);
        assert!(report.results().iter().all(|r| matches!(r.outcome, Outcome::Rejected { .. })));
        assert_eq!(report.results()[2].object, None);
        assert_eq!(fixture.journal.current_serial(), None);
    }

    #[tokio::test]
    async fn protected_class_needs_override() {
        let fixture = Fixture::with_config(|config| {
            config.protected_classes = vec![rpsl::ObjectClass::Mntner];
        });
        let report = fixture.submit_text(text_with_mntner(), test::MD5_PW_PASSWORD).await;
        assert_eq!(
            report.results()[1].outcome,
            Outcome::Denied {
                reason: "protected object class mntner".to_string()
            }
        );
        assert_eq!(fixture.journal.current_serial(), None);

        let report = fixture
            .submit(SubmissionRequest {
                objects: text_with_mntner(),
                passwords: vec![test::MD5_PW_PASSWORD.to_string()],
                override_password: Some(test::MD5_PW_PASSWORD.to_string()),
                ..Default::default()
            })
            .await;
        assert!(report.all_accepted(), "{report:?}");
    }

    fn text_with_mntner() -> String {
        format!(
            "{}\n{}",
            test::person_text("PERSON-TEST", "MNT-TEST"),
            test::mntner_text("MNT-TEST", &[test::MD5_PW_HASH])
        )
    }

    #[test]
    fn bad_signature_encoding() {
        let request = SubmissionRequest {
            objects: test::person_text("PERSON-TEST", "MNT-TEST"),
            signatures: vec!["not base64!".to_string()],
            ..Default::default()
        };
        assert!(Submission::parse(&request).is_err());
        assert!(Submission::parse(&SubmissionRequest::default()).is_err());
    }
}
