use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

//------------ Segment -------------------------------------------------------

/// Characters that are escaped when arbitrary text is turned into a
/// [`Segment`]: the separator, whitespace and characters that are awkward
/// in file names.
const SEGMENT_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|');

/// A nonempty string that does not start or end with whitespace and does
/// not contain any instances of [`Scope::SEPARATOR`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Segment(String);

impl Segment {
    /// Parse a Segment from a string.
    pub fn parse(value: &str) -> Result<Self, ParseSegmentError> {
        if value.is_empty() {
            Err(ParseSegmentError::Empty)
        } else if value.starts_with(char::is_whitespace) || value.ends_with(char::is_whitespace) {
            Err(ParseSegmentError::TrailingWhitespace)
        } else if value.contains(Scope::SEPARATOR) {
            Err(ParseSegmentError::ContainsSeparator)
        } else {
            Ok(Segment(value.to_string()))
        }
    }

    /// Creates a segment for any non-empty text by percent-encoding
    /// everything that could not be used as is.
    ///
    /// This is used for RPSL primary keys such as `192.0.2.0/24AS65530`.
    pub fn encode(value: &str) -> Result<Self, ParseSegmentError> {
        Self::parse(&utf8_percent_encode(value, SEGMENT_ENCODE).to_string())
    }

    /// Reverses [`Segment::encode`].
    pub fn decode(&self) -> String {
        percent_decode_str(&self.0).decode_utf8_lossy().to_string()
    }

    /// Return the encapsulated string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Segment {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::parse(s)
    }
}

/// Represents all ways parsing a string as a [`Segment`] can fail.
#[derive(Debug)]
pub enum ParseSegmentError {
    TrailingWhitespace,
    Empty,
    ContainsSeparator,
}

impl Display for ParseSegmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseSegmentError::TrailingWhitespace => "segments must not start or end with whitespace",
            ParseSegmentError::Empty => "segments must be nonempty",
            ParseSegmentError::ContainsSeparator => "segments must not contain scope separators",
        }
        .fmt(f)
    }
}

impl std::error::Error for ParseSegmentError {}

//------------ Scope ---------------------------------------------------------

/// Used to scope a [`Key`]. Consists of zero or more [`Segment`]s.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Scope {
    segments: Vec<Segment>,
}

impl Scope {
    /// Character used to split on when parsing a Scope from a string.
    pub const SEPARATOR: char = '/';

    /// Create an empty `Scope`.
    pub fn global() -> Self {
        Scope::new(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Scope { segments }
    }

    pub fn from_segment(segment: Segment) -> Self {
        Scope::new(vec![segment])
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_global(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns whether this scope equals, or is nested in, the prefix.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Create a new [`Scope`] and add a [`Segment`] to the end of it.
    pub fn with_sub_scope(&self, sub_scope: Segment) -> Self {
        let mut clone = self.clone();
        clone.segments.push(sub_scope);
        clone
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .segments
            .iter()
            .map(Segment::as_str)
            .collect::<Vec<_>>()
            .join("/");
        write!(f, "{joined}")
    }
}

impl FromStr for Scope {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Scope::global());
        }
        let segments = s
            .split(Self::SEPARATOR)
            .map(Segment::parse)
            .collect::<Result<_, _>>()?;
        Ok(Scope::new(segments))
    }
}

impl<'a> IntoIterator for &'a Scope {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

//------------ Key -----------------------------------------------------------

/// The key of a stored value: a [`Scope`] and a name.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key {
    scope: Scope,
    name: Segment,
}

impl Key {
    pub fn new_scoped(scope: Scope, name: Segment) -> Key {
        Key { scope, name }
    }

    pub fn new_global(name: Segment) -> Key {
        Key::new_scoped(Scope::global(), name)
    }

    pub fn name(&self) -> &Segment {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.scope.is_global() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}{}", self.scope, Scope::SEPARATOR, self.name)
        }
    }
}

impl FromStr for Key {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments: Vec<Segment> = s
            .split(Scope::SEPARATOR)
            .map(Segment::parse)
            .collect::<Result<_, _>>()?;
        let name = segments.pop().ok_or(ParseSegmentError::Empty)?;
        Ok(Key::new_scoped(Scope::new(segments), name))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_separator_fails() {
        assert!(Segment::parse(&format!("test{}", Scope::SEPARATOR)).is_err());
    }

    #[test]
    fn test_leading_space_fails() {
        assert!(Segment::parse(" test").is_err());
        assert!(Segment::parse("test\t").is_err());
    }

    #[test]
    fn test_containing_space_succeeds() {
        assert!(Segment::parse("te st").is_ok());
    }

    #[test]
    fn encode_route_primary_key() {
        let segment = Segment::encode("192.0.2.0/24AS65530").unwrap();
        assert_eq!(segment.as_str(), "192.0.2.0%2F24AS65530");
        assert_eq!(segment.decode(), "192.0.2.0/24AS65530");

        let v6 = Segment::encode("2001:DB8::/32AS65530").unwrap();
        assert!(!v6.as_str().contains(':'));
        assert_eq!(v6.decode(), "2001:DB8::/32AS65530");
    }

    #[test]
    fn key_from_and_to_string() {
        let key: Key = "TEST/journal/12.json".parse().unwrap();
        assert_eq!(key.name().as_str(), "12.json");
        assert_eq!(key.scope().to_string(), "TEST/journal");
        assert_eq!(key.to_string(), "TEST/journal/12.json");

        let scope: Scope = "TEST".parse().unwrap();
        assert!(key.scope().starts_with(&scope));
        assert!(!scope.starts_with(key.scope()));
    }
}
