//! Parsing RPSL text into objects.

use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;

use crate::rpsl::{
    AsNumber, Attribute, ObjectClass, ObjectKey, Prefix, RpslObject, Syntax,
    fields::{SetKind, is_key_cert_name, is_mntner_name, is_nic_handle, is_set_name},
};

lazy_static! {
    static ref ATTRIBUTE_NAME: Regex = Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap();
}

//------------ ParseError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    Empty,
    InvalidLine { line: usize, content: String },
    InvalidAttributeName { line: usize, name: String },
    BlankLineInObject { line: usize },
    UnknownClass(String),
    MissingPrimaryKey { class: ObjectClass, attribute: &'static str },
    InvalidPrimaryKey { class: ObjectClass, value: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty object"),
            ParseError::InvalidLine { line, content } => write!(f, "line {line}: cannot parse '{content}'"),
            ParseError::InvalidAttributeName { line, name } => {
                write!(f, "line {line}: invalid attribute name '{name}'")
            }
            ParseError::BlankLineInObject { line } => write!(f, "line {line}: blank line inside object"),
            ParseError::UnknownClass(class) => write!(f, "unknown object class '{class}'"),
            ParseError::MissingPrimaryKey { class, attribute } => {
                write!(f, "{class} object is missing primary key attribute '{attribute}'")
            }
            ParseError::InvalidPrimaryKey { class, value } => {
                write!(f, "invalid primary key for {class} object: '{value}'")
            }
        }
    }
}

impl std::error::Error for ParseError {}

//------------ parse ---------------------------------------------------------

fn is_comment(line: &str) -> bool {
    line.starts_with('%') || line.starts_with('#')
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t') || line.starts_with('+')
}

fn strip_comment(value: &str) -> &str {
    match value.find('#') {
        Some(pos) => value[..pos].trim(),
        None => value.trim(),
    }
}

/// Parses the text of a single object.
///
/// Leading and trailing blank lines are ignored, a blank line anywhere else
/// is an error. Lines starting with `%` are dropped from the object text,
/// lines starting with `#` are kept in the text but not parsed.
pub fn parse(raw: &str) -> Result<RpslObject, ParseError> {
    let lines: Vec<(usize, &str)> = raw
        .lines()
        .enumerate()
        .map(|(nr, line)| (nr + 1, line.trim_end()))
        .collect();

    let first = lines.iter().position(|(_, l)| !l.is_empty());
    let last = lines.iter().rposition(|(_, l)| !l.is_empty());
    let lines = match (first, last) {
        (Some(first), Some(last)) => &lines[first..=last],
        _ => return Err(ParseError::Empty),
    };

    let mut attributes: Vec<Attribute> = Vec::new();
    let mut text = String::new();

    for (nr, line) in lines.iter().copied() {
        if line.is_empty() {
            return Err(ParseError::BlankLineInObject { line: nr });
        }
        if line.starts_with('%') {
            continue;
        }
        text.push_str(line);
        text.push('\n');

        if is_comment(line) {
            continue;
        }

        if is_continuation(line) {
            let attribute = attributes.pop().ok_or_else(|| ParseError::InvalidLine {
                line: nr,
                content: line.to_string(),
            })?;
            let addition = strip_comment(&line[1..]);
            let value = if addition.is_empty() {
                attribute.value().to_string()
            } else if attribute.value().is_empty() {
                addition.to_string()
            } else {
                format!("{}\n{}", attribute.value(), addition)
            };
            attributes.push(Attribute::new(attribute.name(), value));
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| ParseError::InvalidLine {
            line: nr,
            content: line.to_string(),
        })?;
        let name = name.trim().to_ascii_lowercase();
        if !ATTRIBUTE_NAME.is_match(&name) {
            return Err(ParseError::InvalidAttributeName { line: nr, name });
        }
        attributes.push(Attribute::new(name, strip_comment(value)));
    }

    let class_name = attributes.first().map(Attribute::name).ok_or(ParseError::Empty)?;
    let class = ObjectClass::from_str(class_name).map_err(|_| ParseError::UnknownClass(class_name.to_string()))?;

    let pk = primary_key(class, &attributes)?;
    Ok(RpslObject::new(ObjectKey::new(class, &pk), attributes, text))
}

/// Derives the primary key from the key attributes of the class.
fn primary_key(class: ObjectClass, attributes: &[Attribute]) -> Result<String, ParseError> {
    let schema = class.schema();
    let mut pk = String::new();

    for attribute in schema.primary_key.iter().copied() {
        let value = attributes
            .iter()
            .find(|a| a.name() == attribute)
            .map(Attribute::value)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingPrimaryKey { class, attribute })?;

        let invalid = || ParseError::InvalidPrimaryKey {
            class,
            value: value.to_string(),
        };

        let syntax = schema.attribute(attribute).map(|spec| spec.syntax).ok_or_else(invalid)?;
        let normalised = match syntax {
            Syntax::AsNumber => AsNumber::from_str(value).map_err(|_| invalid())?.to_string(),
            Syntax::Ipv4Prefix | Syntax::Ipv6Prefix => {
                let prefix = Prefix::from_str(value).map_err(|_| invalid())?;
                if prefix.is_ipv4() != (syntax == Syntax::Ipv4Prefix) {
                    return Err(invalid());
                }
                prefix.to_string()
            }
            Syntax::AsSetName if is_set_name(value, SetKind::AsSet) => value.to_string(),
            Syntax::RouteSetName if is_set_name(value, SetKind::RouteSet) => value.to_string(),
            Syntax::MntnerName if is_mntner_name(value) => value.to_string(),
            Syntax::NicHandle if is_nic_handle(value) => value.to_string(),
            Syntax::KeyCertName if is_key_cert_name(value) => value.to_string(),
            _ => return Err(invalid()),
        };
        pk.push_str(&normalised);
    }

    Ok(pk.to_ascii_uppercase())
}

/// Splits text holding several objects on blank lines.
///
/// Paragraphs holding nothing but comments are dropped.
pub fn split_objects(text: &str) -> Vec<String> {
    let mut res = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if current.iter().any(|l| !is_comment(l)) {
            let mut object = current.join("\n");
            object.push('\n');
            res.push(object);
        }
        current.clear();
    };

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            flush(&mut current);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);

    res
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE: &str = "\
route:          192.0.2.0/24
descr:          Example route
+               with a continuation
 and another one # with a comment
origin:         as65530
mnt-by:         MAINT-EXAMPLE
source:         TEST
";

    #[test]
    fn parse_route() {
        let object = parse(ROUTE).unwrap();
        assert_eq!(object.class(), ObjectClass::Route);
        assert_eq!(object.pk(), "192.0.2.0/24AS65530");
        assert_eq!(object.attributes().len(), 5);
        assert_eq!(
            object.first_value("descr"),
            Some("Example route\nwith a continuation\nand another one")
        );
        assert_eq!(object.mnt_by(), vec!["MAINT-EXAMPLE".to_string()]);
        assert_eq!(object.source().unwrap().as_str(), "TEST");
        assert_eq!(object.text(), ROUTE);
    }

    #[test]
    fn comments_and_case() {
        let object = parse(
            "% server comment\nMNTNER: maint-example\n# full line comment\nauth: MNTNER maint-example # comment\nsource: test\n",
        )
        .unwrap();
        assert_eq!(object.class(), ObjectClass::Mntner);
        assert_eq!(object.pk(), "MAINT-EXAMPLE");
        assert_eq!(object.first_value("auth"), Some("MNTNER maint-example"));
        assert!(!object.text().contains("server comment"));
        assert!(object.text().contains("# full line comment"));
    }

    #[test]
    fn route6_primary_key() {
        let object = parse("route6: 2001:DB8::/32\norigin: AS65530\nsource: TEST\n").unwrap();
        assert_eq!(object.pk(), "2001:DB8::/32AS65530");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse("\n\n"), Err(ParseError::Empty));
        assert!(matches!(parse("inetnum: 192.0.2.0 - 192.0.2.255\n"), Err(ParseError::UnknownClass(_))));
        assert!(matches!(
            parse("route: 192.0.2.0/24\nsource: TEST\n"),
            Err(ParseError::MissingPrimaryKey { attribute: "origin", .. })
        ));
        assert!(matches!(
            parse("route: 2001:db8::/32\norigin: AS1\n"),
            Err(ParseError::InvalidPrimaryKey { .. })
        ));
        assert!(matches!(
            parse(" continuation first\n"),
            Err(ParseError::InvalidLine { line: 1, .. })
        ));
        assert!(matches!(
            parse("as-set: AS-FOO\n\nsource: TEST\n"),
            Err(ParseError::BlankLineInObject { line: 2 })
        ));
        assert!(matches!(
            parse("as-set: AS-FOO\nno colon here\n"),
            Err(ParseError::InvalidLine { line: 2, .. })
        ));
        assert!(matches!(
            parse("as-set: AS-FOO\nbad name!: x\n"),
            Err(ParseError::InvalidAttributeName { line: 2, .. })
        ));
    }

    #[test]
    fn split_multiple_objects() {
        let text = "% header\n\nas-set: AS-ONE\nsource: TEST\n\n\n\nas-set: AS-TWO\nsource: TEST\n   \n# trailer\n";
        let objects = split_objects(text);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], "as-set: AS-ONE\nsource: TEST\n");
        assert_eq!(parse(&objects[1]).unwrap().pk(), "AS-TWO");
    }
}
