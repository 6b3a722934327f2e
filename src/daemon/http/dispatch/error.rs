//! Dispatch error handling.

use crate::commons::error::Error;

use super::super::response::HttpResponse;

//------------ DispatchError -------------------------------------------------

/// An error occured during dispatch.
///
/// This error type exists so you can use the question mark operator for all
/// sorts of things during dispatch to minimize clutter.
#[derive(Debug)]
pub enum DispatchError {
    /// A response should be sent to the client.
    Response(HttpResponse),
}

impl From<HttpResponse> for DispatchError {
    fn from(src: HttpResponse) -> Self {
        Self::Response(src)
    }
}

impl From<Error> for DispatchError {
    fn from(src: Error) -> Self {
        Self::Response(HttpResponse::response_from_error(src))
    }
}

impl From<crate::query::QueryError> for DispatchError {
    fn from(src: crate::query::QueryError) -> Self {
        Error::from(src).into()
    }
}
