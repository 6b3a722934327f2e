//! Defines all daemon side errors.

use std::{fmt, io};

use hyper::StatusCode;

use crate::auth::Denied;
use crate::commons::api::ErrorResponse;
use crate::commons::storage::KeyValueError;
use crate::journal::JournalError;
use crate::mirror::ImportError;
use crate::query::QueryError;
use crate::rpsl::{ParseError, SourceName, ValidationErrors};

//------------ IrrdIoError ---------------------------------------------------

/// An I/O error with some context on what we were doing.
#[derive(Debug)]
pub struct IrrdIoError {
    context: String,
    cause: io::Error,
}

impl IrrdIoError {
    pub fn new(context: String, cause: io::Error) -> Self {
        IrrdIoError { context, cause }
    }

    pub fn cause(&self) -> &io::Error {
        &self.cause
    }
}

impl fmt::Display for IrrdIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context: {}, underlying io::Error: {}", self.context, self.cause)
    }
}

impl std::error::Error for IrrdIoError {}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System Issues
    //-----------------------------------------------------------------
    IoError(IrrdIoError),
    KeyValueError(KeyValueError),
    ConfigError(String),

    //-----------------------------------------------------------------
    // General API Client Issues
    //-----------------------------------------------------------------
    JsonError(serde_json::Error),
    InvalidRequest(String),
    ApiUnknownResource,
    ApiInvalidCredentials(String),
    ApiInsufficientRights(String),
    PostTooBig,
    PostCannotRead,
    QueryTimeout,

    //-----------------------------------------------------------------
    // Registry Issues
    //-----------------------------------------------------------------
    UnknownSource(SourceName),
    SourceNotAuthoritative(SourceName),
    SourceNotMirrored(SourceName),
    ParseError(ParseError),
    ValidationError(ValidationErrors),
    AuthenticationDenied(Denied),
    Journal(JournalError),
    Import(ImportError),
    Query(QueryError),

    //-----------------------------------------------------------------
    // If we really don't know any more..
    //-----------------------------------------------------------------
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::KeyValueError(e) => write!(f, "Key/Value error: {e}"),
            Error::ConfigError(e) => write!(f, "Configuration error: {e}"),
            Error::JsonError(e) => write!(f, "Invalid JSON: {e}"),
            Error::InvalidRequest(e) => write!(f, "Invalid request: {e}"),
            Error::ApiUnknownResource => write!(f, "Unknown resource"),
            Error::ApiInvalidCredentials(e) => write!(f, "Invalid credentials: {e}"),
            Error::ApiInsufficientRights(e) => write!(f, "Insufficient rights: {e}"),
            Error::PostTooBig => write!(f, "POST body exceeds configured limit"),
            Error::PostCannotRead => write!(f, "POST body cannot be read"),
            Error::QueryTimeout => write!(f, "Query timed out"),
            Error::UnknownSource(source) => write!(f, "Unknown source '{source}'"),
            Error::SourceNotAuthoritative(source) => write!(f, "Source '{source}' is not authoritative"),
            Error::SourceNotMirrored(source) => write!(f, "Source '{source}' is not mirrored"),
            Error::ParseError(e) => e.fmt(f),
            Error::ValidationError(e) => e.fmt(f),
            Error::AuthenticationDenied(e) => write!(f, "Authentication denied: {e}"),
            Error::Journal(e) => e.fmt(f),
            Error::Import(e) => e.fmt(f),
            Error::Query(e) => e.fmt(f),
            Error::Custom(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<IrrdIoError> for Error {
    fn from(e: IrrdIoError) -> Self {
        Error::IoError(e)
    }
}

impl From<KeyValueError> for Error {
    fn from(e: KeyValueError) -> Self {
        Error::KeyValueError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

impl From<ValidationErrors> for Error {
    fn from(e: ValidationErrors) -> Self {
        Error::ValidationError(e)
    }
}

impl From<Denied> for Error {
    fn from(e: Denied) -> Self {
        Error::AuthenticationDenied(e)
    }
}

impl From<JournalError> for Error {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Storage(e) => Error::KeyValueError(e),
            e => Error::Journal(e),
        }
    }
}

impl From<ImportError> for Error {
    fn from(e: ImportError) -> Self {
        Error::Import(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::UnknownSource(source) => Error::UnknownSource(source),
            QueryError::Timeout => Error::QueryTimeout,
            e => Error::Query(e),
        }
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    pub fn invalid_request(msg: impl fmt::Display) -> Self {
        Error::InvalidRequest(msg.to_string())
    }
}

/// Translate an error to an HTTP Status Code
impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::IoError(_)
            | Error::KeyValueError(_)
            | Error::ConfigError(_)
            | Error::Import(_)
            | Error::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Journal(e) if e.is_storage() => StatusCode::INTERNAL_SERVER_ERROR,

            Error::ApiUnknownResource | Error::UnknownSource(_) => StatusCode::NOT_FOUND,
            Error::ApiInvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            Error::ApiInsufficientRights(_) | Error::AuthenticationDenied(_) => StatusCode::FORBIDDEN,
            Error::Query(QueryError::NotAuthorized(_)) => StatusCode::FORBIDDEN,
            Error::PostTooBig => StatusCode::PAYLOAD_TOO_LARGE,
            Error::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Journal(JournalError::WriterStopped(_)) => StatusCode::SERVICE_UNAVAILABLE,

            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Error::IoError(e) => ErrorResponse::new("sys-io", self).with_cause(e),
            Error::KeyValueError(e) => ErrorResponse::new("sys-kv", self).with_cause(e),
            Error::ConfigError(e) => ErrorResponse::new("sys-config", self).with_cause(e),
            Error::JsonError(e) => ErrorResponse::new("api-json", self).with_cause(e),
            Error::InvalidRequest(e) => ErrorResponse::new("api-invalid-request", self).with_cause(e),
            Error::ApiUnknownResource => ErrorResponse::new("api-unknown-resource", self),
            Error::ApiInvalidCredentials(e) => ErrorResponse::new("api-invalid-credentials", self).with_cause(e),
            Error::ApiInsufficientRights(e) => ErrorResponse::new("api-insufficient-rights", self).with_cause(e),
            Error::PostTooBig => ErrorResponse::new("api-post-body-exceeds-limit", self),
            Error::PostCannotRead => ErrorResponse::new("api-post-body-cannot-read", self),
            Error::QueryTimeout => ErrorResponse::new("query-timeout", self),
            Error::UnknownSource(source) => ErrorResponse::new("registry-unknown-source", self).with_source(source),
            Error::SourceNotAuthoritative(source) => {
                ErrorResponse::new("registry-source-not-authoritative", self).with_source(source)
            }
            Error::SourceNotMirrored(source) => {
                ErrorResponse::new("registry-source-not-mirrored", self).with_source(source)
            }
            Error::ParseError(e) => ErrorResponse::new("rpsl-parse", self).with_cause(e),
            Error::ValidationError(e) => ErrorResponse::new("rpsl-validation", self).with_cause(e),
            Error::AuthenticationDenied(e) => ErrorResponse::new("auth-denied", self).with_cause(e),
            Error::Journal(e) => ErrorResponse::new("journal", self).with_cause(e),
            Error::Import(e) => ErrorResponse::new("mirror-import", self).with_cause(e),
            Error::Query(e) => ErrorResponse::new("query", self).with_cause(e),
            Error::Custom(_) => ErrorResponse::new("general-error", self),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_is_not_found() {
        let source: SourceName = "TEST".parse().unwrap();
        let error = Error::UnknownSource(source);
        assert_eq!(error.status(), StatusCode::NOT_FOUND);

        let response = error.to_error_response();
        assert_eq!(response.label(), "registry-unknown-source");
        assert_eq!(response.args().get("source").map(String::as_str), Some("TEST"));
    }

    #[test]
    fn denied_is_forbidden() {
        let error = Error::from(Denied::NoMatchingCredentials);
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.to_string(), "Authentication denied: no matching credentials");
    }
}
