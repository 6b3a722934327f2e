//! Schema and reference validation of parsed objects.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::auth::{AuthMethod, keycert};
use crate::rpsl::{
    AsNumber, ObjectClass, ObjectKey, Prefix, RpslObject, SourceName, Syntax,
    fields::{SetKind, is_email, is_key_cert_name, is_mntner_name, is_nic_handle, is_set_name},
};

//------------ ObjectLookup --------------------------------------------------

/// Read access to the objects of a source.
pub trait ObjectLookup {
    fn get_object(&self, key: &ObjectKey) -> Option<Arc<RpslObject>>;

    fn exists(&self, key: &ObjectKey) -> bool {
        self.get_object(key).is_some()
    }
}

impl ObjectLookup for BTreeMap<ObjectKey, Arc<RpslObject>> {
    fn get_object(&self, key: &ObjectKey) -> Option<Arc<RpslObject>> {
        self.get(key).cloned()
    }
}

//------------ ReferenceMode -------------------------------------------------

/// Whether dangling references reject an object or only produce a warning.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    #[default]
    Strict,
    Advisory,
}

//------------ ValidationError -----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    SyntaxError {
        attribute: String,
        value: String,
        reason: String,
    },
    MissingMandatoryAttribute(&'static str),
    MultipleValuesNotAllowed(String),
    UnknownAttribute(String),
    DanglingReference {
        attribute: String,
        value: String,
        classes: Vec<ObjectClass>,
    },
    ReferencedByOthers {
        key: ObjectKey,
        by: Vec<ObjectKey>,
    },
    KeyFingerprintMismatch {
        expected: String,
        found: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationError::SyntaxError {
                attribute,
                value,
                reason,
            } => write!(f, "invalid value '{value}' for attribute '{attribute}': {reason}"),
            ValidationError::MissingMandatoryAttribute(attribute) => {
                write!(f, "mandatory attribute '{attribute}' is missing")
            }
            ValidationError::MultipleValuesNotAllowed(attribute) => {
                write!(f, "attribute '{attribute}' occurs multiple times, but is single-valued")
            }
            ValidationError::UnknownAttribute(attribute) => write!(f, "unknown attribute '{attribute}'"),
            ValidationError::DanglingReference {
                attribute,
                value,
                classes,
            } => {
                let classes: Vec<&str> = classes.iter().map(|c| c.name()).collect();
                write!(
                    f,
                    "object '{value}' referenced in attribute '{attribute}' not found (expected {})",
                    classes.join(" or ")
                )
            }
            ValidationError::ReferencedByOthers { key, by } => {
                let by: Vec<String> = by.iter().map(ObjectKey::to_string).collect();
                write!(f, "object {key} is still referenced by {}", by.join(", "))
            }
            ValidationError::KeyFingerprintMismatch { expected, found } => {
                write!(f, "key-cert name {found} does not match key fingerprint {expected}")
            }
        }
    }
}

/// All problems found with an object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ValidationError::to_string).collect()
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(e: ValidationError) -> Self {
        ValidationErrors(vec![e])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// The outcome of a successful validation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationReport {
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}

//------------ validate ------------------------------------------------------

/// Validates an object against its class schema and the objects it refers
/// to.
pub fn validate(
    object: &RpslObject,
    lookup: &dyn ObjectLookup,
    mode: ReferenceMode,
) -> Result<ValidationReport, ValidationErrors> {
    let schema = object.class().schema();
    let mut errors = Vec::new();
    let mut report = ValidationReport::default();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for attribute in object.attributes() {
        *counts.entry(attribute.name()).or_default() += 1;
    }

    for (name, count) in &counts {
        match schema.attribute(name) {
            None => errors.push(ValidationError::UnknownAttribute(name.to_string())),
            Some(spec) if !spec.multiple && *count > 1 => {
                errors.push(ValidationError::MultipleValuesNotAllowed(name.to_string()))
            }
            _ => {}
        }
    }

    for spec in schema.attributes.iter().filter(|s| s.mandatory) {
        if !counts.contains_key(spec.name) {
            errors.push(ValidationError::MissingMandatoryAttribute(spec.name));
        }
    }

    for attribute in object.attributes() {
        let Some(spec) = schema.attribute(attribute.name()) else {
            continue;
        };

        if let Err(reason) = check_syntax(spec.syntax, attribute.value()) {
            errors.push(ValidationError::SyntaxError {
                attribute: attribute.name().to_string(),
                value: attribute.value().to_string(),
                reason,
            });
            continue;
        }

        if spec.references.is_empty() {
            continue;
        }

        for value in attribute.list_values() {
            if spec.syntax == Syntax::MbrsByRef && value.eq_ignore_ascii_case("ANY") {
                continue;
            }

            let is_self = spec.references.contains(&object.class()) && value.eq_ignore_ascii_case(object.pk());
            let found = is_self
                || spec
                    .references
                    .iter()
                    .any(|class| lookup.exists(&ObjectKey::new(*class, value)));

            if !found {
                let dangling = ValidationError::DanglingReference {
                    attribute: attribute.name().to_string(),
                    value: value.to_string(),
                    classes: spec.references.to_vec(),
                };
                match mode {
                    ReferenceMode::Strict => errors.push(dangling),
                    ReferenceMode::Advisory => report.warnings.push(dangling.to_string()),
                }
            }
        }
    }

    if object.class() == ObjectClass::KeyCert && errors.is_empty() {
        if let Err(e) = check_key_cert(object) {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(report)
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Checks that an object can be deleted, given the keys of the objects
/// that currently refer to it.
pub fn validate_deletion(key: &ObjectKey, referencing: &[ObjectKey]) -> Result<(), ValidationErrors> {
    let by: Vec<ObjectKey> = referencing.iter().filter(|k| *k != key).cloned().collect();
    if by.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ReferencedByOthers { key: key.clone(), by }.into())
    }
}

fn check_key_cert(object: &RpslObject) -> Result<(), ValidationError> {
    let pem = format!("{}\n", object.values("certif").collect::<Vec<_>>().join("\n"));
    let fingerprint = keycert::fingerprint(&pem).map_err(|e| ValidationError::SyntaxError {
        attribute: "certif".to_string(),
        value: String::new(),
        reason: format!("cannot read public key: {e}"),
    })?;

    let expected = format!("KEY-{fingerprint}");
    if object.pk() == expected {
        Ok(())
    } else {
        Err(ValidationError::KeyFingerprintMismatch {
            expected,
            found: object.pk().to_string(),
        })
    }
}

//------------ Syntax checks -------------------------------------------------

fn check_all(value: &str, check: impl Fn(&str) -> bool, what: &str) -> Result<(), String> {
    let mut items = value
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .peekable();

    if items.peek().is_none() {
        return Err(format!("expected {what}"));
    }

    for item in items {
        if !check(item) {
            return Err(format!("'{item}' is not {what}"));
        }
    }
    Ok(())
}

fn is_as_number(value: &str) -> bool {
    AsNumber::from_str(value).is_ok()
}

/// Strips a range operator such as `^+`, `^-`, `^24` or `^24-32`.
fn strip_range_operator(value: &str) -> Option<&str> {
    match value.split_once('^') {
        None => Some(value),
        Some((base, op)) => {
            let valid = op == "+"
                || op == "-"
                || op
                    .split('-')
                    .all(|n| !n.is_empty() && n.len() <= 3 && n.bytes().all(|b| b.is_ascii_digit()));
            if valid { Some(base) } else { None }
        }
    }
}

fn is_route_set_member(value: &str) -> bool {
    match strip_range_operator(value) {
        Some(base) => {
            Prefix::from_str(base).is_ok() || is_as_number(base) || SetKind::of(base).is_some()
        }
        None => false,
    }
}

fn check_syntax(syntax: Syntax, value: &str) -> Result<(), String> {
    let value = value.trim();
    match syntax {
        Syntax::FreeText => Ok(()),
        Syntax::AsNumber => AsNumber::from_str(value).map(|_| ()).map_err(|e| e.to_string()),
        Syntax::Ipv4Prefix | Syntax::Ipv6Prefix => {
            let prefix = Prefix::from_str(value).map_err(|e| e.to_string())?;
            if prefix.is_ipv4() == (syntax == Syntax::Ipv4Prefix) {
                Ok(())
            } else {
                Err("wrong address family".to_string())
            }
        }
        Syntax::PrefixList => check_all(value, |v| Prefix::from_str(v).is_ok(), "a prefix"),
        Syntax::Email => {
            if is_email(value) {
                Ok(())
            } else {
                Err("not an e-mail address".to_string())
            }
        }
        Syntax::AuthMethod => AuthMethod::from_str(value).map(|_| ()).map_err(|e| e.to_string()),
        Syntax::AsSetName => check_all(value, |v| is_set_name(v, SetKind::AsSet), "an as-set name"),
        Syntax::RouteSetName => check_all(value, |v| is_set_name(v, SetKind::RouteSet), "a route-set name"),
        Syntax::AsSetMembers => check_all(
            value,
            |v| is_as_number(v) || is_set_name(v, SetKind::AsSet),
            "an AS number or as-set name",
        ),
        Syntax::RouteSetMembers => check_all(value, is_route_set_member, "a prefix, AS number or set name"),
        Syntax::MntnerName => {
            if is_mntner_name(value) {
                Ok(())
            } else {
                Err("not a maintainer name".to_string())
            }
        }
        Syntax::MntnerList => check_all(value, is_mntner_name, "a maintainer name"),
        Syntax::MbrsByRef => check_all(
            value,
            |v| v.eq_ignore_ascii_case("ANY") || is_mntner_name(v),
            "a maintainer name or ANY",
        ),
        Syntax::SetList => check_all(value, |v| SetKind::of(v).is_some(), "a set name"),
        Syntax::NicHandle => check_all(value, is_nic_handle, "a NIC handle"),
        Syntax::KeyCertName => {
            if is_key_cert_name(value) {
                Ok(())
            } else {
                Err("not a key-cert name".to_string())
            }
        }
        Syntax::Source => SourceName::from_str(value).map(|_| ()).map_err(|e| e.to_string()),
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpsl::parse;

    fn store(objects: &[&str]) -> BTreeMap<ObjectKey, Arc<RpslObject>> {
        objects
            .iter()
            .map(|text| {
                let object = parse(text).unwrap();
                (object.key().clone(), Arc::new(object))
            })
            .collect()
    }

    const MNTNER: &str = "\
mntner:  MAINT-EXAMPLE
admin-c: PERSON1-TEST
upd-to:  noc@example.net
auth:    MD5-PW $1$xxxxxxxx$UYCIxa628.9qXjpQCjM4a.
mnt-by:  MAINT-EXAMPLE
source:  TEST
";

    const PERSON: &str = "\
person:  Example Person
address: Somewhere
phone:   +31 20 000 0000
nic-hdl: PERSON1-TEST
mnt-by:  MAINT-EXAMPLE
source:  TEST
";

    #[test]
    fn valid_mntner_referring_to_itself() {
        let lookup = store(&[PERSON]);
        let object = parse(MNTNER).unwrap();
        let report = validate(&object, &lookup, ReferenceMode::Strict).unwrap();
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn dangling_reference_strict_and_advisory() {
        let lookup = store(&[]);
        let object = parse(MNTNER).unwrap();

        let errors = validate(&object, &lookup, ReferenceMode::Strict).unwrap_err();
        assert_eq!(errors.errors().len(), 1);
        assert!(matches!(
            &errors.errors()[0],
            ValidationError::DanglingReference { attribute, value, .. }
                if attribute == "admin-c" && value == "PERSON1-TEST"
        ));

        let report = validate(&object, &lookup, ReferenceMode::Advisory).unwrap();
        assert_eq!(report.warnings().len(), 1);
    }

    #[test]
    fn schema_errors() {
        let lookup = store(&[]);
        let object = parse(
            "route: 192.0.2.0/24\norigin: AS65530\norigin: AS65531\nfoo: bar\nmember-of: MAINT-X\nsource: TEST\n",
        )
        .unwrap();

        let errors = validate(&object, &lookup, ReferenceMode::Advisory).unwrap_err();
        let errors = errors.errors();
        assert!(errors.contains(&ValidationError::MultipleValuesNotAllowed("origin".to_string())));
        assert!(errors.contains(&ValidationError::UnknownAttribute("foo".to_string())));
        assert!(errors.contains(&ValidationError::MissingMandatoryAttribute("mnt-by")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::SyntaxError { attribute, .. } if attribute == "member-of")));
    }

    #[test]
    fn set_members_syntax() {
        assert!(check_syntax(Syntax::AsSetMembers, "AS65530, AS-FOO AS65531:AS-BAR").is_ok());
        assert!(check_syntax(Syntax::AsSetMembers, "AS65530, RS-FOO").is_err());
        assert!(check_syntax(Syntax::RouteSetMembers, "192.0.2.0/24^+, RS-FOO, AS-BAR^24-32, AS1").is_ok());
        assert!(check_syntax(Syntax::RouteSetMembers, "192.0.2.0/24^x").is_err());
        assert!(check_syntax(Syntax::MbrsByRef, "ANY").is_ok());
        assert!(check_syntax(Syntax::PrefixList, "").is_err());
    }

    #[test]
    fn deletion_of_referenced_object() {
        let person = parse(PERSON).unwrap();
        let mntner = parse(MNTNER).unwrap();

        assert!(validate_deletion(person.key(), &[]).is_ok());
        assert!(validate_deletion(mntner.key(), &[mntner.key().clone()]).is_ok());

        let errors = validate_deletion(person.key(), &[mntner.key().clone()]).unwrap_err();
        assert_eq!(
            errors.to_string(),
            "object person/PERSON1-TEST is still referenced by mntner/MAINT-EXAMPLE"
        );
    }
}
