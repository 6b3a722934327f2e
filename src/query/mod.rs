//! Answering queries from consistent snapshots of the sources.
//!
//! A [`QueryResolver`] is built per request from the current state of
//! every configured source and the access entry of the requester. All
//! results are taken from those states, so a query never sees a change
//! that was committed after it started.

use std::fmt;

use crate::rpsl::SourceName;

pub mod access;
pub mod resolver;

pub use self::access::{AccessEntry, AccessList, AccessRule};
pub use self::resolver::{LookupMode, LookupResult, QueryLimits, QueryResolver, RouteLookupType, SourceView};

//------------ QueryError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryError {
    UnknownSource(SourceName),
    InvalidQuery(String),
    NotAuthorized(String),
    TooManyResults { limit: usize },
    Timeout,
}

impl QueryError {
    pub fn invalid(msg: impl fmt::Display) -> Self {
        QueryError::InvalidQuery(msg.to_string())
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::UnknownSource(source) => write!(f, "Unknown source '{source}'"),
            QueryError::InvalidQuery(msg) => write!(f, "Invalid query: {msg}"),
            QueryError::NotAuthorized(msg) => write!(f, "Not authorized: {msg}"),
            QueryError::TooManyResults { limit } => {
                write!(f, "Query returns more than {limit} objects, please refine it")
            }
            QueryError::Timeout => write!(f, "Query timed out"),
        }
    }
}

impl std::error::Error for QueryError {}
