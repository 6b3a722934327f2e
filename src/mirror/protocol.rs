//! The line based mirror protocol.
//!
//! After the server greeting a client sends one request line:
//!
//! ```text
//! SNAPSHOT <source>
//! RANGE <source> <from> <to|LATEST> [KEEPALIVE]
//! ```
//!
//! A response starts with a `%START` line and ends with an `%END` line,
//! or consists of a single `ERROR <code> <message>` line. Objects and
//! entries are followed by a blank line.

use std::{fmt, str::FromStr};

use crate::journal::{Operation, Serial};
use crate::rpsl::SourceName;

pub const GREETING: &str = "%MIRROR 1 SNAPSHOT RANGE KEEPALIVE";

//------------ ErrorCode -----------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    TooOld,
    UnknownSource,
    NotAuthorized,
    InvalidRange,
    Syntax,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TooOld => "TOO_OLD",
            ErrorCode::UnknownSource => "UNKNOWN_SOURCE",
            ErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            ErrorCode::InvalidRange => "INVALID_RANGE",
            ErrorCode::Syntax => "SYNTAX",
        }
    }
}

impl FromStr for ErrorCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOO_OLD" => Ok(ErrorCode::TooOld),
            "UNKNOWN_SOURCE" => Ok(ErrorCode::UnknownSource),
            "NOT_AUTHORIZED" => Ok(ErrorCode::NotAuthorized),
            "INVALID_RANGE" => Ok(ErrorCode::InvalidRange),
            "SYNTAX" => Ok(ErrorCode::Syntax),
            _ => Err(ProtocolError::syntax(format!("unknown error code '{s}'"))),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

//------------ ProtocolError -------------------------------------------------

/// An error as sent on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolError {
    code: ErrorCode,
    message: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ProtocolError {
            code,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Syntax, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ERROR {} {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

//------------ Request -------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Snapshot {
        source: SourceName,
    },
    Range {
        source: SourceName,
        from: Serial,
        to: Option<Serial>,
        keepalive: bool,
    },
}

impl Request {
    pub fn source(&self) -> &SourceName {
        match self {
            Request::Snapshot { source } | Request::Range { source, .. } => source,
        }
    }
}

impl FromStr for Request {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = s.split_whitespace().collect();
        let source = |word: &str| {
            SourceName::from_str(word).map_err(|_| ProtocolError::syntax(format!("invalid source '{word}'")))
        };
        let serial = |word: &str| Serial::from_str(word).map_err(|_| ProtocolError::syntax(format!("invalid serial '{word}'")));

        match words.as_slice() {
            ["SNAPSHOT", name] => Ok(Request::Snapshot { source: source(*name)? }),
            ["RANGE", name, from, to, rest @ ..] => {
                let keepalive = match rest {
                    [] => false,
                    ["KEEPALIVE"] => true,
                    _ => return Err(ProtocolError::syntax(format!("unexpected arguments in '{s}'"))),
                };
                let to = match *to {
                    "LATEST" => None,
                    to => Some(serial(to)?),
                };
                Ok(Request::Range {
                    source: source(*name)?,
                    from: serial(*from)?,
                    to,
                    keepalive,
                })
            }
            _ => Err(ProtocolError::syntax(format!("cannot parse request '{}'", s.trim()))),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Request::Snapshot { source } => write!(f, "SNAPSHOT {source}"),
            Request::Range {
                source,
                from,
                to,
                keepalive,
            } => {
                write!(f, "RANGE {source} {from} ")?;
                match to {
                    Some(to) => write!(f, "{to}")?,
                    None => write!(f, "LATEST")?,
                }
                if *keepalive {
                    write!(f, " KEEPALIVE")?;
                }
                Ok(())
            }
        }
    }
}

//------------ Line ----------------------------------------------------------

/// A control line of a response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Line {
    StartSnapshot {
        source: SourceName,
        serial: Serial,
    },
    StartRange {
        source: SourceName,
        from: Serial,
        to: Serial,
    },
    Entry {
        operation: Operation,
        serial: Serial,
    },
    End {
        source: SourceName,
        serial: Serial,
    },
    Error(ProtocolError),
}

impl Line {
    /// Parses a control line. Returns `None` for anything else, such as
    /// object text.
    pub fn parse(line: &str) -> Option<Result<Line, ProtocolError>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let res = match words.as_slice() {
            ["%START", "SNAPSHOT", source, serial] => {
                Self::source(source).and_then(|source| Ok(Line::StartSnapshot { source, serial: Self::serial(serial)? }))
            }
            ["%START", "RANGE", source, range] => Self::source(source).and_then(|source| {
                let (from, to) = range
                    .split_once('-')
                    .ok_or_else(|| ProtocolError::syntax(format!("invalid range '{range}'")))?;
                Ok(Line::StartRange {
                    source,
                    from: Self::serial(from)?,
                    to: Self::serial(to)?,
                })
            }),
            ["%END", source, serial] => {
                Self::source(source).and_then(|source| Ok(Line::End { source, serial: Self::serial(serial)? }))
            }
            [tag @ ("ADD" | "DEL"), serial] => Self::serial(serial).map(|serial| Line::Entry {
                operation: Operation::from_tag(tag).unwrap_or(Operation::AddOrUpdate),
                serial,
            }),
            ["ERROR", code, ..] => {
                let message = line
                    .trim()
                    .strip_prefix("ERROR")
                    .map(|rest| rest.trim_start().trim_start_matches(code).trim())
                    .unwrap_or_default();
                ErrorCode::from_str(code).map(|code| Line::Error(ProtocolError::new(code, message)))
            }
            _ => return None,
        };
        Some(res)
    }

    fn source(word: &str) -> Result<SourceName, ProtocolError> {
        SourceName::from_str(word).map_err(|_| ProtocolError::syntax(format!("invalid source '{word}'")))
    }

    fn serial(word: &str) -> Result<Serial, ProtocolError> {
        Serial::from_str(word).map_err(|_| ProtocolError::syntax(format!("invalid serial '{word}'")))
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Line::StartSnapshot { source, serial } => write!(f, "%START SNAPSHOT {source} {serial}"),
            Line::StartRange { source, from, to } => write!(f, "%START RANGE {source} {from}-{to}"),
            Line::Entry { operation, serial } => write!(f, "{operation} {serial}"),
            Line::End { source, serial } => write!(f, "%END {source} {serial}"),
            Line::Error(e) => e.fmt(f),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn parse_requests() {
        assert_eq!(
            Request::from_str("SNAPSHOT test").unwrap(),
            Request::Snapshot {
                source: test::source("TEST")
            }
        );

        let range = Request::from_str("RANGE TEST 10 LATEST KEEPALIVE\r\n").unwrap();
        assert_eq!(
            range,
            Request::Range {
                source: test::source("TEST"),
                from: Serial::new(10),
                to: None,
                keepalive: true
            }
        );
        assert_eq!(range.to_string(), "RANGE TEST 10 LATEST KEEPALIVE");

        assert_eq!(
            Request::from_str("RANGE TEST 10 20").unwrap().to_string(),
            "RANGE TEST 10 20"
        );

        for bad in ["", "SNAPSHOT", "RANGE TEST ten LATEST", "RANGE TEST 1 2 FOREVER", "GET TEST"] {
            let err = Request::from_str(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Syntax, "{bad}");
        }
    }

    #[test]
    fn parse_lines() {
        let source = test::source("TEST");

        assert_eq!(
            Line::parse("%START RANGE TEST 5-9").unwrap().unwrap(),
            Line::StartRange {
                source: source.clone(),
                from: Serial::new(5),
                to: Serial::new(9)
            }
        );
        assert_eq!(
            Line::parse("DEL 7").unwrap().unwrap(),
            Line::Entry {
                operation: Operation::Delete,
                serial: Serial::new(7)
            }
        );
        assert_eq!(
            Line::parse("%END TEST 9").unwrap().unwrap(),
            Line::End {
                source,
                serial: Serial::new(9)
            }
        );

        let error = Line::parse("ERROR TOO_OLD serial 3 is older than 5").unwrap().unwrap();
        match error {
            Line::Error(e) => {
                assert_eq!(e.code(), ErrorCode::TooOld);
                assert_eq!(e.message(), "serial 3 is older than 5");
            }
            other => panic!("unexpected {other}"),
        }

        assert!(Line::parse("route: 192.0.2.0/24").is_none());
        assert!(Line::parse("%START RANGE TEST 5").is_some_and(|res| res.is_err()));
        assert!(Line::parse("ADD five").unwrap().is_err());
    }
}
