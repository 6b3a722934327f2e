//! HTTP responses.

use bytes::Bytes;
use http_body_util::{Either, Empty, Full};
use hyper::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::commons::error::Error;

//----------- ContentType ----------------------------------------------------

#[derive(Clone, Copy)]
enum ContentType {
    Json,
    Text,
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain; charset=utf-8",
        }
    }
}

//------------ HyperResponse -------------------------------------------------

pub type HyperResponseBody = Either<Empty<Bytes>, Full<Bytes>>;
pub type HyperResponse = hyper::Response<HyperResponseBody>;

//----------- Response -------------------------------------------------------

struct Response {
    status: StatusCode,
    content_type: ContentType,
    body: Bytes,
    cause: Option<Error>,
}

impl Response {
    fn new(status: StatusCode) -> Self {
        Response {
            status,
            content_type: ContentType::Text,
            body: Bytes::default(),
            cause: None,
        }
    }

    fn finalize(self) -> HttpResponse {
        let mut response = hyper::Response::new(if self.body.is_empty() {
            Either::Left(Empty::new())
        } else {
            Either::Right(Full::new(self.body))
        });
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static(self.content_type.as_str()),
        );
        if self.status == StatusCode::UNAUTHORIZED {
            headers.insert(
                hyper::header::WWW_AUTHENTICATE,
                hyper::header::HeaderValue::from_static("Bearer"),
            );
        }

        HttpResponse {
            response,
            cause: self.cause,
        }
    }
}

//------------ HttpResponse --------------------------------------------------

#[derive(Debug)]
pub struct HttpResponse {
    response: HyperResponse,
    cause: Option<Error>,
}

impl HttpResponse {
    pub fn into_hyper(self) -> HyperResponse {
        self.response
    }

    /// The error this response was created from, for logging.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn body(&self) -> &HyperResponseBody {
        self.response.body()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    fn ok_response(content_type: ContentType, body: impl Into<Bytes>) -> Self {
        Response {
            status: StatusCode::OK,
            content_type,
            body: body.into(),
            cause: None,
        }
        .finalize()
    }

    pub fn json<O: Serialize>(object: &O) -> Self {
        match serde_json::to_string(object) {
            Ok(json) => Self::ok_response(ContentType::Json, json),
            Err(e) => Self::response_from_error(Error::JsonError(e)),
        }
    }

    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::ok_response(ContentType::Text, body)
    }

    pub fn response_from_error(error: Error) -> Self {
        let status = error.status();
        let response = error.to_error_response();
        let body = match serde_json::to_string(&response) {
            Ok(json) => Bytes::from(json),
            Err(_) => Bytes::from(response.to_string()),
        };
        Response {
            status,
            content_type: ContentType::Json,
            body,
            cause: Some(error),
        }
        .finalize()
    }

    pub fn ok() -> Self {
        Response::new(StatusCode::OK).finalize()
    }

    pub fn not_found() -> Self {
        Response::new(StatusCode::NOT_FOUND).finalize()
    }

    pub fn unauthorized(reason: String) -> Self {
        Self::response_from_error(Error::ApiInvalidCredentials(reason))
    }

    pub fn forbidden(err: String) -> Self {
        Self::response_from_error(Error::ApiInsufficientRights(err))
    }

    pub fn method_not_allowed() -> Self {
        Response::new(StatusCode::METHOD_NOT_ALLOWED).finalize()
    }
}

//------------ Tests ---------------------------------------------------------
