//! HTTP requests.

use std::{borrow::Cow, collections::HashMap, fmt, net::IpAddr, str::FromStr};

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::{Method, body::Body, header::AUTHORIZATION, http::uri::PathAndQuery};
use percent_encoding::percent_decode;
use serde::de::DeserializeOwned;

use crate::commons::{api::Token, error::Error};
use crate::daemon::config::Config;
use crate::rpsl::SourceName;

use super::response::HttpResponse;
use super::server::HttpServer;

//------------ HyperRequest --------------------------------------------------

/// A type alias for the request we receive from Hyper.
pub type HyperRequest = hyper::Request<hyper::body::Incoming>;

//------------ Auth ----------------------------------------------------------

/// What the requester has proven about itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Auth {
    Anonymous,
    Admin,

    /// A token was presented, but it is not the admin token.
    Invalid,
}

impl Auth {
    /// Checks the bearer token of a request against the admin token.
    pub fn from_request(request: &HyperRequest, admin_token: Option<&Token>) -> Self {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        match (presented, admin_token) {
            (None, _) => Auth::Anonymous,
            (Some(presented), Some(token)) if presented == token.as_str() => Auth::Admin,
            (Some(_), _) => Auth::Invalid,
        }
    }

    pub fn is_admin(&self) -> bool {
        *self == Auth::Admin
    }
}

//------------ Request -------------------------------------------------------

/// An enriched request.
pub struct Request<'a> {
    /// The underlying raw request.
    request: HyperRequest,

    /// The server providing access to the registry.
    server: &'a HttpServer,

    /// The address of the requester.
    peer: IpAddr,

    /// Authentication information for the request.
    auth: Auth,

    /// The limits for reading the body of the request.
    limits: BodyLimits,
}

impl<'a> Request<'a> {
    /// Creates a request from the various necessary information.
    pub fn new(request: HyperRequest, server: &'a HttpServer, peer: IpAddr, auth: Auth, limits: BodyLimits) -> Self {
        Self {
            request,
            server,
            peer,
            auth,
            limits,
        }
    }

    /// Returns the method of this request.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Checks whether the request is a GET or returns an error response.
    pub fn check_get(&self) -> Result<(), HttpResponse> {
        match *self.request.method() {
            Method::GET => Ok(()),
            _ => Err(HttpResponse::method_not_allowed()),
        }
    }

    /// Checks whether the request is a POST or returns an error response.
    pub fn check_post(&self) -> Result<(), HttpResponse> {
        match *self.request.method() {
            Method::POST => Ok(()),
            _ => Err(HttpResponse::method_not_allowed()),
        }
    }

    /// Returns the current request path.
    pub fn path(&self) -> Result<RequestPath, InvalidPath> {
        RequestPath::from_request(self)
    }

    /// Returns the decoded query string parameters.
    pub fn query(&self) -> QueryParams {
        QueryParams::from_query(self.request.uri().query().unwrap_or(""))
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    pub fn is_admin(&self) -> bool {
        self.auth.is_admin()
    }

    pub fn server(&self) -> &'a HttpServer {
        self.server
    }

    /// Checks for the admin token.
    ///
    /// Returns an appropriate error response if it is missing or wrong.
    pub fn check_admin(&self) -> Result<(), HttpResponse> {
        match self.auth {
            Auth::Admin => Ok(()),
            Auth::Anonymous => Err(HttpResponse::unauthorized("missing bearer token".to_string())),
            Auth::Invalid => Err(HttpResponse::forbidden("invalid bearer token".to_string())),
        }
    }

    /// Checks the admin token and progresses to the next processing stage.
    pub fn proceed_admin(self) -> Result<AuthedRequest<'a>, HttpResponse> {
        self.check_admin()?;
        Ok(self.proceed_unchecked())
    }

    /// Permits the request to the next processing stage without requiring
    /// any permissions.
    pub fn proceed_unchecked(self) -> AuthedRequest<'a> {
        AuthedRequest {
            request: self.request,
            server: self.server,
            limits: self.limits,
        }
    }
}

//------------ AuthedRequest -------------------------------------------------

/// A request that has been checked for the correct access permissions.
///
/// This type allows access to the request’s body and, by way of reading the
/// body or forcing it to be empty, to the server.
pub struct AuthedRequest<'a> {
    request: HyperRequest,
    server: &'a HttpServer,
    limits: BodyLimits,
}

impl<'a> AuthedRequest<'a> {
    /// Ensures the body is empty.
    pub fn empty(self) -> Result<&'a HttpServer, Error> {
        if self.request.body().size_hint().upper() != Some(0) {
            return Err(Error::invalid_request("unexpected request body"));
        }
        Ok(self.server)
    }

    /// Returns the raw bytes of the request body.
    pub async fn read_bytes(self) -> Result<(&'a HttpServer, Bytes), Error> {
        let limit = self.limits.post_limit_api;

        // If the Content-Length already tells us the body is too big we
        // say so. Otherwise any failure while reading is reported as
        // unreadable.
        if self.request.body().size_hint().lower() > limit {
            return Err(Error::PostTooBig);
        }

        let bytes = Limited::new(self.request.into_body(), limit.try_into().unwrap_or(usize::MAX))
            .collect()
            .await
            .map_err(|_| Error::PostCannotRead)?
            .to_bytes();
        Ok((self.server, bytes))
    }

    /// Get a json object from a post body
    pub async fn read_json<T: DeserializeOwned>(self) -> Result<(&'a HttpServer, T), Error> {
        let (server, bytes) = self.read_bytes().await?;
        let json = serde_json::from_slice(&bytes).map_err(Error::JsonError)?;
        Ok((server, json))
    }
}

//------------ RequestPath ---------------------------------------------------

/// The path of a request’s URI.
///
/// It primarily allows iterating over the path segments.
#[derive(Debug, Clone)]
pub struct RequestPath {
    path: Result<PathAndQuery, String>,
}

impl RequestPath {
    fn from_request(request: &Request) -> Result<Self, InvalidPath> {
        let decoded = percent_decode(request.request.uri().path().as_bytes())
            .decode_utf8()
            .map_err(|_| InvalidPath)?;
        let path = if let Cow::Owned(some) = decoded {
            Err(some)
        } else {
            Ok(request.request.uri().path_and_query().ok_or(InvalidPath)?.clone())
        };
        Ok(Self { path })
    }

    pub fn as_str(&self) -> &str {
        match self.path.as_ref() {
            Ok(path) => path.path(),
            Err(path) => path.as_str(),
        }
    }

    pub fn iter(&self) -> PathIter<'_> {
        PathIter::new(self.as_str())
    }
}

//------------ PathIter ------------------------------------------------------

#[derive(Debug)]
pub struct PathIter<'a> {
    remaining: Option<&'a str>,
}

impl<'a> PathIter<'a> {
    fn new(path: &'a str) -> Self {
        Self {
            remaining: Some(path.strip_prefix('/').unwrap_or(path)),
        }
    }

    /// Returns a copy with a possible trailing slash removed.
    pub fn strip_trailing_slash(&self) -> Self {
        // Some("") means there _was_ a trailing slash and we are now just
        // past it.
        let remaining = match self.remaining {
            Some("") | None => None,
            Some(remaining) => Some(remaining.strip_suffix('/').unwrap_or(remaining)),
        };
        Self { remaining }
    }

    /// Checks that the path has been exhausted.
    ///
    /// Returns a 404 error response if it isn’t.
    pub fn check_exhausted(&self) -> Result<(), HttpResponse> {
        if self.remaining.is_some() {
            Err(HttpResponse::not_found())
        } else {
            Ok(())
        }
    }

    /// Parses the next segment as the given type or returns a Not Found.
    pub fn parse_next<T: FromStr>(&mut self) -> Result<T, HttpResponse> {
        T::from_str(self.next().ok_or_else(HttpResponse::not_found)?).map_err(|_| HttpResponse::not_found())
    }

    /// Returns the rest of the path as a single string, consuming it.
    pub fn rest(&mut self) -> Option<&'a str> {
        self.remaining.take().filter(|s| !s.is_empty())
    }
}

impl<'a> Iterator for PathIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining?;
        match remaining.find('/') {
            Some(slash) => {
                self.remaining = Some(&remaining[slash + 1..]);
                Some(&remaining[..slash])
            }
            None => {
                self.remaining = None;
                Some(remaining)
            }
        }
    }
}

//------------ QueryParams ---------------------------------------------------

/// The decoded parameters of a query string.
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    pub fn from_query(query: &str) -> Self {
        let decode = |s: &str| {
            let s = s.replace('+', " ");
            percent_decode(s.as_bytes()).decode_utf8_lossy().into_owned()
        };
        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (decode(key), decode(value)),
                None => (decode(pair), String::new()),
            })
            .collect();
        QueryParams { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Returns a required parameter or an invalid request error.
    pub fn required(&self, key: &str) -> Result<&str, Error> {
        self.get(key)
            .ok_or_else(|| Error::invalid_request(format!("missing query parameter '{key}'")))
    }

    /// Parses an optional parameter.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                T::from_str(value).map_err(|e| Error::invalid_request(format!("invalid value for '{key}': {e}")))
            })
            .transpose()
    }

    /// Returns whether a flag is set to `true`, `yes` or `1`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "yes" | "1"))
    }

    /// Parses a comma separated list.
    pub fn list<T>(&self, key: &str) -> Result<Option<Vec<T>>, Error>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|item| {
                        T::from_str(item)
                            .map_err(|e| Error::invalid_request(format!("invalid value for '{key}': {e}")))
                    })
                    .collect()
            })
            .transpose()
    }

    /// The `sources` parameter, if given.
    pub fn sources(&self) -> Result<Option<Vec<SourceName>>, Error> {
        self.list("sources")
    }
}

//------------ BodyLimits ----------------------------------------------------

/// The size limits of a request body.
#[derive(Clone, Copy, Debug)]
pub struct BodyLimits {
    /// The POST limit for API data.
    post_limit_api: u64,
}

impl BodyLimits {
    /// Creates the limits from the config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            post_limit_api: config.post_limit_api,
        }
    }
}

//------------ InvalidPath ---------------------------------------------------

/// An error happened while preparing the request path.
#[derive(Clone, Copy, Debug)]
pub struct InvalidPath;

impl fmt::Display for InvalidPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid request path")
    }
}

//============ Tests =========================================================
