use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::rpsl::{AsNumber, ObjectClass, Prefix, SourceName};

//------------ ObjectKey -----------------------------------------------------

/// Identifies an object within a source: its class and primary key.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ObjectKey {
    class: ObjectClass,
    pk: String,
}

impl ObjectKey {
    /// Creates a key, the primary key is normalised to upper case.
    pub fn new(class: ObjectClass, pk: &str) -> Self {
        ObjectKey {
            class,
            pk: pk.trim().to_ascii_uppercase(),
        }
    }

    pub fn class(&self) -> ObjectClass {
        self.class
    }

    pub fn pk(&self) -> &str {
        &self.pk
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.pk)
    }
}

//------------ Attribute -----------------------------------------------------

/// A single attribute with its cleaned value.
///
/// Comments are removed from the value, continuation lines are joined
/// with newlines.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attribute {
    name: String,
    value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the value split into its comma or white space separated
    /// items.
    pub fn list_values(&self) -> impl Iterator<Item = &str> {
        self.value
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

//------------ RpslObject ----------------------------------------------------

/// A parsed RPSL object.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RpslObject {
    key: ObjectKey,
    attributes: Vec<Attribute>,

    /// The object text, one attribute or continuation per line, ending
    /// with a newline.
    text: String,
}

impl RpslObject {
    pub(super) fn new(key: ObjectKey, attributes: Vec<Attribute>, text: String) -> Self {
        RpslObject { key, attributes, text }
    }

    pub fn class(&self) -> ObjectClass {
        self.key.class()
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn pk(&self) -> &str {
        self.key.pk()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// All values for the named attribute, in order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.name() == name)
            .map(Attribute::value)
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|a| a.name() == name).map(Attribute::value)
    }

    /// All list items for the named attribute, in order.
    pub fn list_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |a| a.name() == name)
            .flat_map(Attribute::list_values)
    }

    /// The maintainers in `mnt-by`, upper case and without duplicates.
    pub fn mnt_by(&self) -> Vec<String> {
        let mut res: Vec<String> = Vec::new();
        for name in self.list_values("mnt-by") {
            let name = name.to_ascii_uppercase();
            if !res.contains(&name) {
                res.push(name);
            }
        }
        res
    }

    pub fn source(&self) -> Option<SourceName> {
        self.first_value("source").and_then(|s| SourceName::from_str(s).ok())
    }

    /// The origin of a route or route6 object.
    pub fn origin(&self) -> Option<AsNumber> {
        if self.class().is_route() {
            self.first_value("origin").and_then(|v| AsNumber::from_str(v).ok())
        } else {
            None
        }
    }

    /// The prefix of a route or route6 object.
    pub fn prefix(&self) -> Option<Prefix> {
        if self.class().is_route() {
            self.first_value(self.class().name())
                .and_then(|v| Prefix::from_str(v).ok())
        } else {
            None
        }
    }

    /// Returns whether any value of a referencing attribute names the
    /// given key.
    pub fn references(&self, key: &ObjectKey) -> bool {
        let schema = self.class().schema();
        self.attributes.iter().any(|attribute| {
            schema
                .attribute(attribute.name())
                .filter(|spec| spec.references.contains(&key.class()))
                .map(|_| {
                    attribute
                        .list_values()
                        .any(|v| v.eq_ignore_ascii_case(key.pk()))
                })
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for RpslObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.text.fmt(f)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::rpsl::parse;
    use crate::test;

    #[test]
    fn first_value_outlives_attribute_name() {
        let object = parse(&test::person_text("PERSON-TEST", "MNT-TEST")).unwrap();
        let value = {
            let name = String::from("nic-hdl");
            object.first_value(&name)
        };
        assert_eq!(value, Some("PERSON-TEST"));
        assert_eq!(object.first_value("remarks"), None);
    }
}
