//! Authorization of local changes against the maintainers of an object.
//!
//! Every maintainer in the effective `mnt-by` set is tried in turn and any
//! one of them passing authorizes the change. A maintainer passes if any of
//! its `auth` methods matches the supplied credentials. Delegation through
//! `MNTNER` and `LIST` methods is followed breadth first, with a visited set
//! and a depth cap.

pub mod keycert;
mod methods;
mod passwords;

pub use self::methods::AuthMethod;
pub use self::passwords::PasswordHash;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    str::FromStr,
};

use crate::rpsl::{ObjectClass, ObjectKey, ObjectLookup, RpslObject};

//------------ Credentials ---------------------------------------------------

/// The credentials supplied with a submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct Credentials<'a> {
    pub passwords: &'a [String],

    /// Detached signatures over `signed_data`.
    pub signatures: &'a [Vec<u8>],
    pub signed_data: &'a [u8],
    pub override_password: Option<&'a str>,
}

//------------ AuthPolicy ----------------------------------------------------

/// The parts of the configuration that affect authorization.
#[derive(Clone, Copy, Debug)]
pub struct AuthPolicy<'a> {
    pub override_hash: Option<&'a PasswordHash>,
    pub protected_classes: &'a [ObjectClass],
    pub auth_lists: &'a HashMap<String, Vec<String>>,
    pub max_depth: usize,
}

//------------ Change --------------------------------------------------------

/// A change to authorize.
#[derive(Clone, Copy, Debug)]
pub struct Change<'a> {
    /// The current version of the object, if it exists.
    pub before: Option<&'a RpslObject>,

    /// The submitted object.
    pub after: &'a RpslObject,

    pub delete: bool,
}

impl Change<'_> {
    /// The maintainer sets that must each be satisfied.
    ///
    /// Creations use the submitted `mnt-by`, updates and deletions the
    /// existing one. An update that changes `mnt-by` must satisfy both.
    fn maintainer_sets(&self) -> Vec<Vec<String>> {
        match self.before {
            None => vec![self.after.mnt_by()],
            Some(before) => {
                let existing = before.mnt_by();
                let mut sets = vec![existing.clone()];
                if !self.delete {
                    let mut new = self.after.mnt_by();
                    let mut sorted_existing = existing;
                    sorted_existing.sort();
                    new.sort();
                    if new != sorted_existing {
                        sets.push(self.after.mnt_by());
                    }
                }
                sets
            }
        }
    }
}

//------------ Authorized / Denied -------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Authorized {
    /// The name of the (first) maintainer that authorized the change.
    Maintainer(String),
    Override,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Denied {
    NoMatchingCredentials,
    UnknownMaintainer(String),
    ProtectedObjectClass(ObjectClass),
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Denied::NoMatchingCredentials => write!(f, "no matching credentials"),
            Denied::UnknownMaintainer(name) => write!(f, "unknown maintainer {name}"),
            Denied::ProtectedObjectClass(class) => write!(f, "protected object class {class}"),
        }
    }
}

impl std::error::Error for Denied {}

//------------ authorize -----------------------------------------------------

/// Decides whether a local change may be committed.
pub fn authorize(
    change: Change,
    credentials: Credentials,
    policy: AuthPolicy,
    lookup: &dyn ObjectLookup,
) -> Result<Authorized, Denied> {
    if let (Some(hash), Some(password)) = (policy.override_hash, credentials.override_password) {
        if hash.verify(password) {
            debug!("Override password used for {}", change.after.key());
            return Ok(Authorized::Override);
        }
    }

    let class = change.after.class();
    if policy.protected_classes.contains(&class) {
        return Err(Denied::ProtectedObjectClass(class));
    }

    let checker = Checker {
        credentials,
        policy,
        lookup,
    };

    let mut authorized_by = None;
    for set in change.maintainer_sets() {
        let name = checker.check_set(&set)?;
        authorized_by.get_or_insert(name);
    }

    authorized_by.map(Authorized::Maintainer).ok_or(Denied::NoMatchingCredentials)
}

struct Checker<'a> {
    credentials: Credentials<'a>,
    policy: AuthPolicy<'a>,
    lookup: &'a dyn ObjectLookup,
}

impl Checker<'_> {
    fn mntner(&self, name: &str) -> Option<std::sync::Arc<RpslObject>> {
        self.lookup.get_object(&ObjectKey::new(ObjectClass::Mntner, name))
    }

    /// Passes if any maintainer in the set passes.
    fn check_set(&self, set: &[String]) -> Result<String, Denied> {
        let mut unknown = None;
        let mut any_known = false;

        for name in set {
            if self.mntner(name).is_none() {
                unknown.get_or_insert_with(|| name.clone());
                continue;
            }
            any_known = true;
            if self.check_mntner(name) {
                return Ok(name.clone());
            }
        }

        match unknown {
            Some(name) if !any_known => Err(Denied::UnknownMaintainer(name)),
            _ => Err(Denied::NoMatchingCredentials),
        }
    }

    /// Evaluates a maintainer and its delegates.
    fn check_mntner(&self, root: &str) -> bool {
        let mut queue = VecDeque::from([(root.to_ascii_uppercase(), 0usize)]);
        let mut visited = HashSet::new();

        while let Some((name, depth)) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                trace!("Maintainer {name} already visited");
                continue;
            }

            let Some(mntner) = self.mntner(&name) else {
                debug!("Delegated maintainer {name} does not exist");
                continue;
            };

            for value in mntner.values("auth") {
                let method = match AuthMethod::from_str(value) {
                    Ok(method) => method,
                    Err(e) => {
                        debug!("Ignoring auth method of {name}: {e}");
                        continue;
                    }
                };

                match method {
                    AuthMethod::Password(hash) => {
                        if self.credentials.passwords.iter().any(|p| hash.verify(p)) {
                            return true;
                        }
                    }
                    AuthMethod::Key(key_name) => {
                        if self.check_signature(&key_name) {
                            return true;
                        }
                    }
                    AuthMethod::Mntner(delegate) => self.delegate(&mut queue, delegate, depth),
                    AuthMethod::List(list) => match self.policy.auth_lists.get(&list) {
                        Some(members) => {
                            for member in members {
                                self.delegate(&mut queue, member.to_ascii_uppercase(), depth);
                            }
                        }
                        None => debug!("Unknown auth list {list} used by {name}"),
                    },
                }
            }
        }

        false
    }

    fn delegate(&self, queue: &mut VecDeque<(String, usize)>, name: String, depth: usize) {
        if depth < self.policy.max_depth {
            queue.push_back((name, depth + 1));
        } else {
            debug!("Maximum delegation depth reached at {name}");
        }
    }

    fn check_signature(&self, key_name: &str) -> bool {
        if self.credentials.signatures.is_empty() {
            return false;
        }

        let Some(key_cert) = self.lookup.get_object(&ObjectKey::new(ObjectClass::KeyCert, key_name)) else {
            debug!("Key {key_name} not found");
            return false;
        };

        match keycert::public_key(&key_cert) {
            Ok(key) => self
                .credentials
                .signatures
                .iter()
                .any(|signature| keycert::verify(&key, self.credentials.signed_data, signature)),
            Err(e) => {
                warn!("Cannot read public key from {key_name}: {e}");
                false
            }
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use openssl::sign::Signer;

    use super::*;
    use crate::rpsl::parse;
    use crate::test;

    fn lookup(objects: &[String]) -> BTreeMap<ObjectKey, Arc<RpslObject>> {
        objects
            .iter()
            .map(|text| {
                let object = parse(text).unwrap();
                (object.key().clone(), Arc::new(object))
            })
            .collect()
    }

    fn policy<'a>(lists: &'a HashMap<String, Vec<String>>, override_hash: Option<&'a PasswordHash>) -> AuthPolicy<'a> {
        AuthPolicy {
            override_hash,
            protected_classes: &[],
            auth_lists: lists,
            max_depth: 5,
        }
    }

    fn passwords(pw: &[&str]) -> Vec<String> {
        pw.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn create_with_password() {
        let lists = HashMap::new();
        let store = lookup(&[test::mntner_text("MAINT-A", &["MD5-PW $1$xxxxxxxx$UYCIxa628.9qXjpQCjM4a."])]);
        let route = parse(&test::route_text("192.0.2.0/24", 65530, "MAINT-A")).unwrap();
        let change = Change {
            before: None,
            after: &route,
            delete: false,
        };

        let good = passwords(&["wrong", "password"]);
        let res = authorize(
            change,
            Credentials {
                passwords: &good,
                ..Default::default()
            },
            policy(&lists, None),
            &store,
        );
        assert_eq!(res, Ok(Authorized::Maintainer("MAINT-A".to_string())));

        let bad = passwords(&["wrong"]);
        let res = authorize(
            change,
            Credentials {
                passwords: &bad,
                ..Default::default()
            },
            policy(&lists, None),
            &store,
        );
        assert_eq!(res, Err(Denied::NoMatchingCredentials));
    }

    #[test]
    fn unknown_maintainer() {
        let lists = HashMap::new();
        let store = lookup(&[]);
        let route = parse(&test::route_text("192.0.2.0/24", 65530, "MAINT-GONE")).unwrap();
        let change = Change {
            before: None,
            after: &route,
            delete: false,
        };
        let res = authorize(change, Credentials::default(), policy(&lists, None), &store);
        assert_eq!(res, Err(Denied::UnknownMaintainer("MAINT-GONE".to_string())));
    }

    #[test]
    fn changing_mnt_by_needs_old_and_new() {
        let lists = HashMap::new();
        let old_hash = PasswordHash::scrypt("old-secret").unwrap().to_string();
        let new_hash = PasswordHash::scrypt("new-secret").unwrap().to_string();
        let store = lookup(&[
            test::mntner_text("MAINT-OLD", &[&old_hash]),
            test::mntner_text("MAINT-NEW", &[&new_hash]),
        ]);
        let before = parse(&test::route_text("192.0.2.0/24", 65530, "MAINT-OLD")).unwrap();
        let after = parse(&test::route_text("192.0.2.0/24", 65530, "MAINT-NEW")).unwrap();
        let change = Change {
            before: Some(&before),
            after: &after,
            delete: false,
        };

        let only_new = passwords(&["new-secret"]);
        let creds = Credentials {
            passwords: &only_new,
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, policy(&lists, None), &store),
            Err(Denied::NoMatchingCredentials)
        );

        let only_old = passwords(&["old-secret"]);
        let creds = Credentials {
            passwords: &only_old,
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, policy(&lists, None), &store),
            Err(Denied::NoMatchingCredentials)
        );

        let both = passwords(&["old-secret", "new-secret"]);
        let creds = Credentials {
            passwords: &both,
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, policy(&lists, None), &store),
            Ok(Authorized::Maintainer("MAINT-OLD".to_string()))
        );

        // deleting only needs the current maintainer
        let delete = Change {
            before: Some(&before),
            after: &after,
            delete: true,
        };
        let creds = Credentials {
            passwords: &only_old,
            ..Default::default()
        };
        assert!(authorize(delete, creds, policy(&lists, None), &store).is_ok());
    }

    #[test]
    fn delegation_cycles_terminate() {
        let hash = PasswordHash::md5_crypt("deep").unwrap().to_string();
        let mut lists = HashMap::new();
        lists.insert("FRIENDS".to_string(), vec!["MAINT-C".to_string()]);

        let store = lookup(&[
            test::mntner_text("MAINT-A", &["MNTNER MAINT-B"]),
            test::mntner_text("MAINT-B", &["MNTNER MAINT-A", "LIST FRIENDS"]),
            test::mntner_text("MAINT-C", &[&hash]),
        ]);
        let route = parse(&test::route_text("192.0.2.0/24", 65530, "MAINT-A")).unwrap();
        let change = Change {
            before: None,
            after: &route,
            delete: false,
        };

        let good = passwords(&["deep"]);
        let creds = Credentials {
            passwords: &good,
            ..Default::default()
        };
        assert!(authorize(change, creds, policy(&lists, None), &store).is_ok());

        let bad = passwords(&["shallow"]);
        let creds = Credentials {
            passwords: &bad,
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, policy(&lists, None), &store),
            Err(Denied::NoMatchingCredentials)
        );

        // MAINT-C is two hops away from MAINT-A
        let shallow = AuthPolicy {
            max_depth: 1,
            ..policy(&lists, None)
        };
        let creds = Credentials {
            passwords: &good,
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, shallow, &store),
            Err(Denied::NoMatchingCredentials)
        );
    }

    #[test]
    fn signature_and_override() {
        let lists = HashMap::new();
        let key = test::signing_key();
        let key_cert = test::key_cert_text(&key, "MAINT-SIGNED");
        let key_name = parse(&key_cert).unwrap().pk().to_string();
        let store = lookup(&[test::mntner_text("MAINT-SIGNED", &[&key_name]), key_cert]);

        let route_text = test::route_text("192.0.2.0/24", 65530, "MAINT-SIGNED");
        let route = parse(&route_text).unwrap();
        let change = Change {
            before: None,
            after: &route,
            delete: false,
        };

        let signature = Signer::new_without_digest(&key)
            .unwrap()
            .sign_oneshot_to_vec(route_text.as_bytes())
            .unwrap();
        let signatures = vec![signature];
        let creds = Credentials {
            signatures: &signatures,
            signed_data: route_text.as_bytes(),
            ..Default::default()
        };
        assert!(authorize(change, creds, policy(&lists, None), &store).is_ok());

        let creds = Credentials {
            signatures: &signatures,
            signed_data: b"something else",
            ..Default::default()
        };
        assert_eq!(
            authorize(change, creds, policy(&lists, None), &store),
            Err(Denied::NoMatchingCredentials)
        );

        let override_hash = PasswordHash::scrypt("override").unwrap();
        let protected = AuthPolicy {
            protected_classes: &[ObjectClass::Route],
            ..policy(&lists, Some(&override_hash))
        };
        assert_eq!(
            authorize(change, Credentials::default(), protected, &store),
            Err(Denied::ProtectedObjectClass(ObjectClass::Route))
        );
        let creds = Credentials {
            override_password: Some("override"),
            ..Default::default()
        };
        assert_eq!(authorize(change, creds, protected, &store), Ok(Authorized::Override));
    }
}
