#![allow(dead_code)] // Different tests use different parts.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;
use url::Url;

use irrd::cli::IrrdClient;
use irrd::commons::api::{SubmissionReport, SubmissionRequest, Token};
use irrd::daemon::config::{Config, SourceConfig};
use irrd::daemon::http::server::HttpServer;
use irrd::daemon::irrdserver::IrrdServer;
use irrd::daemon::start::serve_http;
use irrd::journal::Serial;
use irrd::mirror::exporter;
use irrd::rpsl::SourceName;
use irrd::test;

//------------ TestServer ----------------------------------------------------

/// A registry running on ephemeral ports of the loopback interface.
pub struct TestServer {
    pub irrd: Arc<IrrdServer>,
    pub http_addr: SocketAddr,
    pub mirror_addr: SocketAddr,

    /// A client without the admin token.
    pub client: IrrdClient,

    /// A client with the admin token.
    pub admin: IrrdClient,
}

impl TestServer {
    pub async fn start(sources: Vec<SourceConfig>) -> Self {
        Self::start_with(sources, |_| {}).await
    }

    pub async fn start_with(sources: Vec<SourceConfig>, op: impl FnOnce(&mut Config)) -> Self {
        init_logging();

        let mut config = Config::test(&test::mem_storage(), sources);
        op(&mut config);
        let config = Arc::new(config);

        let irrd = Arc::new(IrrdServer::build(config.clone(), None).unwrap());

        let mirror_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mirror_addr = mirror_listener.local_addr().unwrap();
        tokio::spawn(exporter::serve(mirror_listener, irrd.clone(), config.mirror_timeout()));

        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = http_listener.local_addr().unwrap();
        let server = HttpServer::new(irrd.clone(), config.clone());
        tokio::spawn(serve_http(http_listener, server, None));

        let base = Url::parse(&format!("http://{http_addr}/")).unwrap();
        let client = IrrdClient::new(base.clone(), None, false).unwrap();
        let admin = IrrdClient::new(base, Some(Token::from("secret")), false).unwrap();

        TestServer {
            irrd,
            http_addr,
            mirror_addr,
            client,
            admin,
        }
    }

    /// Returns the current serial of a source.
    pub fn serial(&self, source: &str) -> Option<Serial> {
        self.irrd.journal(&test::source(source)).unwrap().current_serial()
    }

    pub fn object_count(&self, source: &str) -> usize {
        self.irrd.journal(&test::source(source)).unwrap().snapshot().object_count()
    }

    /// Submits objects authenticated with the test password.
    pub async fn submit(&self, objects: String) -> SubmissionReport {
        self.client
            .submit(&SubmissionRequest {
                objects,
                passwords: vec![test::MD5_PW_PASSWORD.to_string()],
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

//------------ Helpers -------------------------------------------------------

pub fn init_logging() {
    let _ = stderrlog::new().module("irrd").verbosity(3usize).init();
}

pub fn source(name: &str) -> SourceName {
    test::source(name)
}

/// The maintainer, its admin-c and one route, protected by the test
/// password.
pub fn maintained_objects(source: &str) -> String {
    let auth = test::MD5_PW_HASH;
    [
        test::mntner_text("MNT-TEST", &[auth]),
        test::person_text("PERSON-TEST", "MNT-TEST"),
        test::route_text("192.0.2.0/24", 65000, "MNT-TEST"),
    ]
    .iter()
    .map(|text| test::with_source(text, source))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Waits until the condition holds, checking every 100ms.
///
/// Returns whether it held before the timeout.
pub async fn wait_for<F, Fut>(seconds: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}
