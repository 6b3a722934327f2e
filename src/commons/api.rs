//! Data structures exchanged between the daemon and its API clients.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::journal::Serial;
use crate::rpsl::{ObjectClass, RpslObject, SourceName};

//------------ Token ---------------------------------------------------------

/// The bearer token used for the administrative API.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

impl std::str::FromStr for Token {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Token(s.to_string()))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ ErrorResponse -------------------------------------------------

/// The JSON body returned for any failed API call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// The error label.
    label: String,

    /// The error message.
    msg: String,

    /// Arguments with details about the error.
    #[serde(default)]
    args: HashMap<String, String>,
}

impl ErrorResponse {
    pub fn new(label: &str, msg: impl fmt::Display) -> Self {
        ErrorResponse {
            label: label.to_string(),
            msg: msg.to_string(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.args.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_cause(self, cause: impl fmt::Display) -> Self {
        self.with_arg("cause", cause)
    }

    pub fn with_source(self, source: &SourceName) -> Self {
        self.with_arg("source", source)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.msg)
    }
}

//------------ Submissions ---------------------------------------------------

/// A batch of object texts submitted for creation, update or deletion.
///
/// Objects are separated by empty lines. An object that carries a
/// `delete:` attribute is a deletion request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SubmissionRequest {
    pub objects: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passwords: Vec<String>,

    /// Base64 encoded signatures over the exact `objects` text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,

    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_password: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChangeType::Create => write!(f, "create"),
            ChangeType::Modify => write!(f, "modify"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// The outcome for a single submitted object.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Accepted { serial: Serial },
    Denied { reason: String },
    Rejected { errors: Vec<String> },
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    pub fn serial(&self) -> Option<Serial> {
        match self {
            Outcome::Accepted { serial } => Some(*serial),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Accepted { serial } => write!(f, "accepted (serial {serial})"),
            Outcome::Denied { reason } => write!(f, "denied ({reason})"),
            Outcome::Rejected { errors } => write!(f, "rejected ({})", errors.join("; ")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectResult {
    /// The `class/primary key` of the object, if it could be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceName>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeType>,

    #[serde(flatten)]
    pub outcome: Outcome,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SubmissionReport {
    results: Vec<ObjectResult>,
}

impl SubmissionReport {
    pub fn new(results: Vec<ObjectResult>) -> Self {
        SubmissionReport { results }
    }

    pub fn results(&self) -> &[ObjectResult] {
        &self.results
    }

    pub fn all_accepted(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_accepted())
    }
}

//------------ Query Results -------------------------------------------------

/// An object as returned by queries.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct QueryObject {
    pub source: SourceName,
    pub class: ObjectClass,
    pub pk: String,
    pub text: String,
}

impl QueryObject {
    pub fn new(source: SourceName, object: &RpslObject) -> Self {
        QueryObject {
            source,
            class: object.class(),
            pk: object.pk().to_string(),
            text: object.text().to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectList {
    pub objects: Vec<QueryObject>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SetMembers {
    pub name: String,
    pub members: Vec<String>,

    /// Set when the expansion hit the configured depth or size ceiling.
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PrefixList {
    pub prefixes: Vec<String>,
}

//------------ Status --------------------------------------------------------

/// The status of a single source.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceStatus {
    pub source: SourceName,
    pub authoritative: bool,
    pub serial: Option<Serial>,
    pub oldest_journal_serial: Option<Serial>,
    pub newest_journal_serial: Option<Serial>,
    pub object_count: usize,
    pub last_update: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_serial: Option<Serial>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_error: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StatusReport {
    pub config_version: u64,
    pub sources: Vec<SourceStatus>,

    /// Requested sources that are not configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_sources: Vec<String>,
}

//------------ Admin ---------------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LoadDump {
    /// The serial after loading. It must be higher than the current serial,
    /// without it the source moves to its next serial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<Serial>,
    pub objects: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SetSerial {
    pub serial: Serial,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExpireJournal {
    /// Overrides the configured retention of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AdminResult {
    pub source: SourceName,
    pub serial: Option<Serial>,

    /// Objects loaded, entries expired or entries imported.
    pub count: usize,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConfigReloaded {
    pub version: u64,
}
