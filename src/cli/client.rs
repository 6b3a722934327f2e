//! The HTTP client used by `irrdc`.

use std::{fmt, process, time::Duration};

use reqwest::{
    Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

use crate::commons::api::{
    AdminResult, ConfigReloaded, ErrorResponse, ExpireJournal, LoadDump, ObjectList, PrefixList, SetMembers,
    SetSerial, StatusReport, SubmissionReport, SubmissionRequest, Token,
};
use crate::constants::{HTTP_CLIENT_TIMEOUT_SECS, HTTP_USER_AGENT};

const JSON_CONTENT: &str = "application/json";

//------------ IrrdClient ----------------------------------------------------

/// A client for the HTTP API of a registry daemon.
pub struct IrrdClient {
    server: Url,
    token: Option<Token>,
    api_only: bool,
    client: reqwest::Client,
}

impl IrrdClient {
    /// Creates a client for the server at the given base URI.
    ///
    /// If `api_only` is set, requests are printed instead of sent and the
    /// process exits.
    pub fn new(server: Url, token: Option<Token>, api_only: bool) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(HTTP_USER_AGENT)
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::request_build(server.as_str(), e))?;
        Ok(IrrdClient {
            server,
            token,
            api_only,
            client,
        })
    }

    pub fn server(&self) -> &Url {
        &self.server
    }
}

/// # Queries
impl IrrdClient {
    pub async fn status(&self, sources: &[String]) -> Result<StatusReport, Error> {
        let uri = self.uri(&["status"], &[("sources", sources.join(","))])?;
        self.get_json(uri).await
    }

    /// Looks up objects by key.
    ///
    /// The mode is one of `exact`, `search` or `expand`.
    pub async fn lookup(&self, key: &str, mode: &str, query: &[(&str, String)]) -> Result<LookupResponse, Error> {
        let mut params = vec![("mode", mode.to_string())];
        params.extend(query.iter().cloned());
        let uri = self.uri(&["lookup", key], &params)?;
        if mode == "expand" {
            self.get_json(uri).await.map(LookupResponse::Members)
        } else {
            self.get_json(uri).await.map(LookupResponse::Objects)
        }
    }

    pub async fn set_members(&self, name: &str, recursive: bool, sources: &[String]) -> Result<SetMembers, Error> {
        let uri = self.uri(
            &["sets", name],
            &[("recursive", flag(recursive)), ("sources", sources.join(","))],
        )?;
        self.get_json(uri).await
    }

    pub async fn routes_for_origin(
        &self,
        origin: &str,
        version: Option<&str>,
        sources: &[String],
    ) -> Result<PrefixList, Error> {
        let uri = self.uri(
            &["routes", "origin", origin],
            &[("version", opt(version)), ("sources", sources.join(","))],
        )?;
        self.get_json(uri).await
    }

    pub async fn routes_for_as_set(
        &self,
        name: &str,
        version: Option<&str>,
        sources: &[String],
    ) -> Result<PrefixList, Error> {
        let uri = self.uri(
            &["routes", "as-set", name],
            &[("version", opt(version)), ("sources", sources.join(","))],
        )?;
        self.get_json(uri).await
    }

    pub async fn route_search(&self, prefix: &str, lookup: &str, sources: &[String]) -> Result<ObjectList, Error> {
        let uri = self.uri(
            &["routes", "search"],
            &[
                ("prefix", prefix.to_string()),
                ("type", lookup.to_string()),
                ("sources", sources.join(",")),
            ],
        )?;
        self.get_json(uri).await
    }

    pub async fn inverse(&self, attribute: &str, value: &str, sources: &[String]) -> Result<ObjectList, Error> {
        let uri = self.uri(
            &["inverse"],
            &[
                ("attribute", attribute.to_string()),
                ("value", value.to_string()),
                ("sources", sources.join(",")),
            ],
        )?;
        self.get_json(uri).await
    }

    pub async fn references(&self, class: &str, pk: &str, sources: &[String]) -> Result<ObjectList, Error> {
        let uri = self.uri(&["references", class, pk], &[("sources", sources.join(","))])?;
        self.get_json(uri).await
    }

    pub async fn text_search(&self, value: &str, sources: &[String]) -> Result<ObjectList, Error> {
        let uri = self.uri(&["text"], &[("q", value.to_string()), ("sources", sources.join(","))])?;
        self.get_json(uri).await
    }

    pub async fn template(&self, class: &str) -> Result<String, Error> {
        let uri = self.uri(&["template", class], &[])?;
        self.get_text(uri).await
    }

    pub async fn dump(&self, source: &str) -> Result<String, Error> {
        let uri = self.uri(&["dump", source], &[])?;
        self.get_text(uri).await
    }
}

/// # Changes
impl IrrdClient {
    pub async fn submit(&self, submission: &SubmissionRequest) -> Result<SubmissionReport, Error> {
        let uri = self.uri(&["submit"], &[])?;
        self.post_json(uri, submission).await
    }
}

/// # Administration
impl IrrdClient {
    pub async fn force_reload(&self, source: &str) -> Result<AdminResult, Error> {
        let uri = self.uri(&["admin", "sources", source, "reload"], &[])?;
        self.post_empty(uri).await
    }

    pub async fn load_dump(&self, source: &str, dump: &LoadDump) -> Result<AdminResult, Error> {
        let uri = self.uri(&["admin", "sources", source, "load"], &[])?;
        self.post_json(uri, dump).await
    }

    pub async fn expire_journal(&self, source: &str, expire: &ExpireJournal) -> Result<AdminResult, Error> {
        let uri = self.uri(&["admin", "sources", source, "expire"], &[])?;
        self.post_json(uri, expire).await
    }

    pub async fn set_serial(&self, source: &str, serial: &SetSerial) -> Result<AdminResult, Error> {
        let uri = self.uri(&["admin", "sources", source, "serial"], &[])?;
        self.post_json(uri, serial).await
    }

    pub async fn reload_config(&self) -> Result<ConfigReloaded, Error> {
        let uri = self.uri(&["admin", "config", "reload"], &[])?;
        self.post_empty(uri).await
    }
}

/// # HTTP
impl IrrdClient {
    /// Builds the URI for the given path below `api/v1`.
    ///
    /// Query parameters with empty values are left out.
    fn uri(&self, path: &[&str], query: &[(&str, String)]) -> Result<Url, Error> {
        let mut uri = self.server.clone();
        {
            let mut segments = uri
                .path_segments_mut()
                .map_err(|_| Error::request_build(self.server.as_str(), "server URI cannot be a base"))?;
            segments.pop_if_empty().push("api").push("v1");
            for segment in path {
                segments.push(segment);
            }
        }
        if query.iter().any(|(_, value)| !value.is_empty()) {
            let mut pairs = uri.query_pairs_mut();
            for (key, value) in query.iter().filter(|(_, value)| !value.is_empty()) {
                pairs.append_pair(key, value);
            }
        }
        Ok(uri)
    }

    fn headers(&self, uri: &Url, content_type: Option<&str>) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_str(content_type).map_err(|e| Error::request_build(uri.as_str(), e))?,
            );
        }
        if let Some(token) = &self.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| Error::request_build(uri.as_str(), e))?,
            );
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(&self, uri: Url) -> Result<T, Error> {
        let body = self.get_text(uri.clone()).await?;
        parse_json(&uri, &body)
    }

    async fn get_text(&self, uri: Url) -> Result<String, Error> {
        if self.api_only {
            report_and_exit("GET", &uri, None);
        }
        let res = self
            .client
            .get(uri.clone())
            .headers(self.headers(&uri, None)?)
            .send()
            .await
            .map_err(|e| Error::execute(uri.as_str(), e))?;
        text_response(&uri, res).await
    }

    async fn post_json<T: DeserializeOwned>(&self, uri: Url, data: &impl Serialize) -> Result<T, Error> {
        let body = serde_json::to_string_pretty(data).map_err(|e| Error::request_build_json(uri.as_str(), e))?;
        if self.api_only {
            report_and_exit("POST", &uri, Some(&body));
        }
        let res = self
            .client
            .post(uri.clone())
            .headers(self.headers(&uri, Some(JSON_CONTENT))?)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::execute(uri.as_str(), e))?;
        let body = text_response(&uri, res).await?;
        parse_json(&uri, &body)
    }

    async fn post_empty<T: DeserializeOwned>(&self, uri: Url) -> Result<T, Error> {
        if self.api_only {
            report_and_exit("POST", &uri, Some("<empty>"));
        }
        let res = self
            .client
            .post(uri.clone())
            .headers(self.headers(&uri, None)?)
            .send()
            .await
            .map_err(|e| Error::execute(uri.as_str(), e))?;
        let body = text_response(&uri, res).await?;
        parse_json(&uri, &body)
    }
}

fn flag(value: bool) -> String {
    if value { "true".into() } else { String::new() }
}

fn opt(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn report_and_exit(method: &str, uri: &Url, body: Option<&str>) -> ! {
    println!("{method}:\n  {uri}");
    if let Some(body) = body {
        println!("Body:\n{body}");
    }
    process::exit(0);
}

fn parse_json<T: DeserializeOwned>(uri: &Url, body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| Error::response(uri.as_str(), format!("could not parse JSON response: {e}")))
}

async fn text_response(uri: &Url, res: Response) -> Result<String, Error> {
    match res.status() {
        StatusCode::OK => res.text().await.map_err(|e| Error::response(uri.as_str(), e)),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(Error::from_res(uri.as_str(), res).await.forbidden()),
        _ => Err(Error::from_res(uri.as_str(), res).await),
    }
}

//------------ LookupResponse ------------------------------------------------

/// The response to a lookup, which depends on the lookup mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupResponse {
    Objects(ObjectList),
    Members(SetMembers),
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    RequestBuild(String, String),
    RequestExecute(String, String),
    Response(String, String),
    Forbidden(String, Option<ErrorResponse>),
    ErrorResponseWithBody(String, StatusCode, String),
    ErrorResponseWithJson(String, StatusCode, ErrorResponse),
    ReadFile(String, String),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => write!(f, "Issue creating request for URI: {uri}, error: {msg}"),
            Error::RequestExecute(uri, msg) => write!(f, "Issue accessing URI: {uri}, error: {msg}"),
            Error::Response(uri, msg) => write!(f, "Issue processing response from URI: {uri}, error: {msg}"),
            Error::Forbidden(uri, None) => write!(f, "Access denied for URI: {uri}"),
            Error::Forbidden(uri, Some(res)) => write!(f, "Access denied for URI: {uri}, {res}"),
            Error::ErrorResponseWithBody(uri, code, e) => {
                write!(f, "Error response from URI: {uri}, Status: {code}, Error: {e}")
            }
            Error::ErrorResponseWithJson(uri, code, res) => {
                write!(f, "Error response from URI: {uri}, Status: {code}, ErrorResponse: {res}")
            }
            Error::ReadFile(path, msg) => write!(f, "Cannot read file '{path}': {msg}"),
            Error::Other(msg) => msg.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_json(uri: &str, e: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), format!("could not serialize type to JSON: {e}"))
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn read_file(path: &str, msg: impl fmt::Display) -> Self {
        Error::ReadFile(path.to_string(), msg.to_string())
    }

    /// Returns the error label sent by the server, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            Error::ErrorResponseWithJson(_, _, res) | Error::Forbidden(_, Some(res)) => Some(res.label()),
            _ => None,
        }
    }

    fn forbidden(self) -> Self {
        match self {
            Error::ErrorResponseWithJson(uri, _, res) => Error::Forbidden(uri, Some(res)),
            Error::ErrorResponseWithBody(uri, ..) | Error::Response(uri, _) => Error::Forbidden(uri, None),
            other => other,
        }
    }

    async fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text().await {
            Ok(body) if !body.is_empty() => match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(res) => Error::ErrorResponseWithJson(uri.to_string(), status, res),
                Err(_) => Error::ErrorResponseWithBody(uri.to_string(), status, body),
            },
            _ => Error::Response(uri.to_string(), format!("unexpected status code {status}")),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &str) -> IrrdClient {
        IrrdClient::new(Url::parse(server).unwrap(), None, false).unwrap()
    }

    #[test]
    fn build_uris() {
        let client = client("http://localhost:8080/");

        let uri = client.uri(&["lookup", "route/192.0.2.0/24AS65000"], &[("mode", "exact".into())]).unwrap();
        assert_eq!(
            uri.as_str(),
            "http://localhost:8080/api/v1/lookup/route%2F192.0.2.0%2F24AS65000?mode=exact"
        );

        let uri = client
            .uri(&["sets", "AS-FOO"], &[("recursive", flag(false)), ("sources", String::new())])
            .unwrap();
        assert_eq!(uri.as_str(), "http://localhost:8080/api/v1/sets/AS-FOO");
    }

    #[test]
    fn build_uris_below_prefix() {
        let client = client("https://example.net/irr");
        let uri = client.uri(&["status"], &[("sources", "A,B".into())]).unwrap();
        assert_eq!(uri.as_str(), "https://example.net/irr/api/v1/status?sources=A%2CB");
    }
}
