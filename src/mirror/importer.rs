//! Keeps a mirrored source in sync with its upstream.
//!
//! The importer asks for all entries after its current serial. When the
//! upstream no longer has these, or when the entries received do not
//! follow on from the local serial, the local state is replaced by a
//! snapshot and the import continues from the snapshot serial.

use std::{
    fmt, io, mem,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use backoff::{ExponentialBackoff, backoff::Backoff};
use chrono::{DateTime, Utc};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::{mpsc, oneshot},
    time,
};

use crate::journal::{JournalError, JournalHandle, MirrorEntry, Serial};
use crate::rpsl::{ParseError, RpslObject, SourceName, parse};

use super::protocol::{ErrorCode, Line, ProtocolError, Request};

/// The number of entries handed to the journal at a time.
const IMPORT_BATCH_SIZE: usize = 1000;

//------------ ImportError ---------------------------------------------------

#[derive(Debug)]
pub enum ImportError {
    Connect { upstream: String, cause: io::Error },
    Io(io::Error),
    Protocol(String),
    Upstream(ProtocolError),
    Parse { serial: Option<Serial>, error: ParseError },
    Journal(JournalError),
    Stopped(SourceName),
}

impl ImportError {
    /// Whether the error is resolved by reloading a snapshot.
    pub fn needs_resync(&self) -> bool {
        match self {
            ImportError::Upstream(e) => matches!(e.code(), ErrorCode::TooOld | ErrorCode::InvalidRange),
            ImportError::Journal(e) => matches!(e, JournalError::SerialGap { .. }),
            _ => false,
        }
    }

    fn unexpected(line: impl fmt::Display) -> Self {
        ImportError::Protocol(format!("unexpected line '{line}'"))
    }

    fn eof() -> Self {
        ImportError::Protocol("unexpected end of stream".to_string())
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImportError::Connect { upstream, cause } => write!(f, "cannot connect to {upstream}: {cause}"),
            ImportError::Io(e) => write!(f, "I/O error: {e}"),
            ImportError::Protocol(e) => write!(f, "protocol error: {e}"),
            ImportError::Upstream(e) => write!(f, "upstream replied {e}"),
            ImportError::Parse { serial, error } => match serial {
                Some(serial) => write!(f, "cannot parse object for serial {serial}: {error}"),
                None => write!(f, "cannot parse object in snapshot: {error}"),
            },
            ImportError::Journal(e) => e.fmt(f),
            ImportError::Stopped(source) => write!(f, "importer for source {source} stopped"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<io::Error> for ImportError {
    fn from(e: io::Error) -> Self {
        ImportError::Io(e)
    }
}

impl From<JournalError> for ImportError {
    fn from(e: JournalError) -> Self {
        ImportError::Journal(e)
    }
}

//------------ ImportSchedule ------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct ImportSchedule {
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

//------------ ImportStatus --------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct ImportStatus {
    pub upstream_serial: Option<Serial>,
    pub last_import: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

//------------ Importer ------------------------------------------------------

pub struct Importer {
    source: SourceName,
    upstream: String,
    journal: JournalHandle,
    timeout: Duration,
    status: Arc<RwLock<ImportStatus>>,
}

type ReloadReply = oneshot::Sender<Result<usize, ImportError>>;

impl Importer {
    pub fn new(journal: JournalHandle, upstream: String, timeout: Duration) -> Self {
        Importer {
            source: journal.source().clone(),
            upstream,
            journal,
            timeout,
            status: Arc::new(RwLock::new(ImportStatus::default())),
        }
    }

    /// Starts the import loop.
    pub fn spawn(self, schedule: ImportSchedule) -> ImporterHandle {
        let (reload_tx, reload_rx) = mpsc::channel(4);
        let handle = ImporterHandle {
            source: self.source.clone(),
            upstream: self.upstream.clone(),
            status: self.status.clone(),
            reload: reload_tx,
        };
        tokio::spawn(self.run(schedule, reload_rx));
        handle
    }

    async fn run(self, schedule: ImportSchedule, mut reload: mpsc::Receiver<ReloadReply>) {
        let mut backoff = ExponentialBackoff {
            initial_interval: schedule.backoff_initial,
            max_interval: schedule.backoff_max,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        let mut forced: Option<ReloadReply> = None;

        loop {
            let res = self.run_once(forced.is_some()).await;
            let delay = match &res {
                Ok(count) => {
                    if *count > 0 {
                        info!("Imported {count} changes for source {} from {}", self.source, self.upstream);
                    }
                    backoff.reset();
                    schedule.interval
                }
                Err(err) => {
                    let delay = backoff.next_backoff().unwrap_or(schedule.backoff_max);
                    warn!(
                        "Import of source {} from {} failed, retrying in {} seconds: {err}",
                        self.source,
                        self.upstream,
                        delay.as_secs()
                    );
                    delay
                }
            };
            if let Some(reply) = forced.take() {
                let _ = reply.send(res);
            }

            select! {
                _ = time::sleep(delay) => {}
                request = reload.recv() => match request {
                    Some(reply) => forced = Some(reply),
                    None => {
                        debug!("Importer for source {} stopped", self.source);
                        return;
                    }
                }
            }
        }
    }

    /// Runs a single import and records its outcome.
    ///
    /// Returns the number of objects loaded and entries applied.
    pub async fn run_once(&self, force_reload: bool) -> Result<usize, ImportError> {
        let res = self.import(force_reload).await;

        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.last_import = Some(Utc::now());
        status.last_error = res.as_ref().err().map(|e| e.to_string());
        res
    }

    pub fn status(&self) -> ImportStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn import(&self, force_reload: bool) -> Result<usize, ImportError> {
        if force_reload || self.journal.current_serial().is_none() {
            return self.reload().await;
        }
        if self.journal.snapshot().is_incomplete() {
            warn!("Source {} is incomplete after an interrupted reload, reloading from {}", self.source, self.upstream);
            return self.reload().await;
        }

        match self.range().await {
            Err(err) if err.needs_resync() => {
                warn!("Source {} must be reloaded from {}: {err}", self.source, self.upstream);
                self.reload().await
            }
            res => res,
        }
    }

    async fn reload(&self) -> Result<usize, ImportError> {
        let loaded = self.snapshot().await?;
        let applied = self.range().await?;
        Ok(loaded + applied)
    }

    async fn snapshot(&self) -> Result<usize, ImportError> {
        let request = Request::Snapshot {
            source: self.source.clone(),
        };
        let mut conn = Connection::open(&self.upstream, &request, self.timeout).await?;

        let serial = match conn.control().await? {
            Line::StartSnapshot { source, serial } if source == self.source => serial,
            other => return Err(ImportError::unexpected(other)),
        };

        let mut objects = vec![];
        loop {
            let first = conn.line().await?.ok_or_else(ImportError::eof)?;
            if first.trim().is_empty() {
                continue;
            }
            match Line::parse(&first) {
                Some(Ok(Line::End { serial: end, .. })) if end == serial => break,
                Some(Ok(Line::Error(err))) => return Err(ImportError::Upstream(err)),
                Some(Ok(other)) => return Err(ImportError::unexpected(other)),
                Some(Err(err)) => return Err(ImportError::Protocol(err.to_string())),
                None if first.starts_with('%') => continue,
                None => {
                    let text = conn.body(first).await?;
                    objects.push(self.parse(&text, None)?);
                }
            }
        }

        info!(
            "Loading snapshot of source {} at serial {serial} with {} objects",
            self.source,
            objects.len()
        );
        let count = self.journal.reset(objects, serial).await?;
        self.set_upstream_serial(serial);
        Ok(count)
    }

    async fn range(&self) -> Result<usize, ImportError> {
        let from = self.journal.current_serial().map(Serial::next).unwrap_or(Serial::new(1));
        let request = Request::Range {
            source: self.source.clone(),
            from,
            to: None,
            keepalive: false,
        };
        let mut conn = Connection::open(&self.upstream, &request, self.timeout).await?;

        let to = match conn.control().await? {
            Line::StartRange { source, to, .. } if source == self.source => to,
            other => return Err(ImportError::unexpected(other)),
        };

        let mut batch = vec![];
        let mut applied = 0;
        loop {
            match conn.control().await? {
                Line::Entry { operation, serial } => {
                    let first = conn.line().await?.ok_or_else(ImportError::eof)?;
                    if first.trim().is_empty() {
                        return Err(ImportError::Protocol(format!("empty object for serial {serial}")));
                    }
                    let text = conn.body(first).await?;
                    let object = self.parse(&text, Some(serial))?;
                    batch.push(MirrorEntry {
                        serial,
                        operation,
                        object,
                    });
                    if batch.len() >= IMPORT_BATCH_SIZE {
                        applied += self.journal.apply_mirror(mem::take(&mut batch)).await?;
                    }
                }
                Line::End { .. } => break,
                other => return Err(ImportError::unexpected(other)),
            }
        }
        if !batch.is_empty() {
            applied += self.journal.apply_mirror(batch).await?;
        }

        self.set_upstream_serial(to);
        Ok(applied)
    }

    fn parse(&self, text: &str, serial: Option<Serial>) -> Result<RpslObject, ImportError> {
        let object = parse(text).map_err(|error| ImportError::Parse { serial, error })?;
        if object.source().as_ref() != Some(&self.source) {
            warn!(
                "Object {} mirrored for source {} has source attribute {}",
                object.key(),
                self.source,
                object.first_value("source").unwrap_or("none")
            );
        }
        Ok(object)
    }

    fn set_upstream_serial(&self, serial: Serial) {
        self.status.write().unwrap_or_else(PoisonError::into_inner).upstream_serial = Some(serial);
    }
}

//------------ ImporterHandle ------------------------------------------------

/// Access to a running importer.
#[derive(Clone)]
pub struct ImporterHandle {
    source: SourceName,
    upstream: String,
    status: Arc<RwLock<ImportStatus>>,
    reload: mpsc::Sender<ReloadReply>,
}

impl ImporterHandle {
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn status(&self) -> ImportStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the source with a fresh snapshot of the upstream.
    pub async fn force_reload(&self) -> Result<usize, ImportError> {
        let (tx, rx) = oneshot::channel();
        self.reload
            .send(tx)
            .await
            .map_err(|_| ImportError::Stopped(self.source.clone()))?;
        rx.await.map_err(|_| ImportError::Stopped(self.source.clone()))?
    }
}

//------------ Connection ----------------------------------------------------

struct Connection {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl Connection {
    /// Connects, checks the greeting and sends the request.
    async fn open(upstream: &str, request: &Request, timeout: Duration) -> Result<Self, ImportError> {
        let connect_err = |cause| ImportError::Connect {
            upstream: upstream.to_string(),
            cause,
        };
        let stream = time::timeout(timeout, TcpStream::connect(upstream))
            .await
            .map_err(|_| connect_err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
            .map_err(connect_err)?;

        let mut conn = Connection {
            stream: BufReader::new(stream),
            timeout,
        };

        let greeting = conn.line().await?.ok_or_else(ImportError::eof)?;
        if !greeting.starts_with("%MIRROR") {
            return Err(ImportError::Protocol(format!("unexpected greeting '{greeting}'")));
        }

        let request = format!("{request}\n");
        time::timeout(timeout, conn.stream.get_mut().write_all(request.as_bytes()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;

        Ok(conn)
    }

    /// Reads a line without its line ending, `None` at the end of stream.
    async fn line(&mut self) -> Result<Option<String>, ImportError> {
        let mut line = String::new();
        let read = time::timeout(self.timeout, self.stream.read_line(&mut line))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
        if read == 0 {
            return Ok(None);
        }
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(Some(line))
    }

    /// Reads the next control line, skipping blank lines and comments.
    async fn control(&mut self) -> Result<Line, ImportError> {
        loop {
            let line = self.line().await?.ok_or_else(ImportError::eof)?;
            if line.trim().is_empty() {
                continue;
            }
            match Line::parse(&line) {
                Some(Ok(Line::Error(err))) => return Err(ImportError::Upstream(err)),
                Some(Ok(control)) => return Ok(control),
                Some(Err(err)) => return Err(ImportError::Protocol(err.to_string())),
                None if line.starts_with('%') => continue,
                None => return Err(ImportError::unexpected(line)),
            }
        }
    }

    /// Reads the remainder of an object up to the next blank line.
    async fn body(&mut self, first: String) -> Result<String, ImportError> {
        let mut text = first;
        text.push('\n');
        loop {
            match self.line().await? {
                None => return Err(ImportError::eof()),
                Some(line) if line.trim().is_empty() => return Ok(text),
                Some(line) => {
                    text.push_str(&line);
                    text.push('\n');
                }
            }
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    use super::*;
    use crate::journal::JournalStore;
    use crate::test;

    /// Starts an upstream that answers every request with a canned
    /// response, picked by the first word of the request.
    async fn canned_upstream(snapshot: String, range: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let mut stream = BufReader::new(stream);
                stream
                    .get_mut()
                    .write_all(format!("{}\n", super::super::GREETING).as_bytes())
                    .await
                    .unwrap();
                let mut request = String::new();
                stream.read_line(&mut request).await.unwrap();
                let response = if request.starts_with("SNAPSHOT") {
                    &snapshot
                } else {
                    &range
                };
                stream.get_mut().write_all(response.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    fn importer(upstream: String) -> Importer {
        let store = Arc::new(JournalStore::create(&test::mem_storage()).unwrap());
        let journal = JournalHandle::spawn(store, test::source(test::TEST_SOURCE)).unwrap();
        Importer::new(journal, upstream, Duration::from_secs(5))
    }

    fn route(prefix: &str) -> String {
        test::route_text(prefix, 65530, "MAINT-TEST")
    }

    #[tokio::test]
    async fn initial_import_loads_snapshot_then_range() {
        let snapshot = format!(
            "%START SNAPSHOT TEST 10\n\n{}\n{}\n%END TEST 10\n",
            route("192.0.2.0/24"),
            route("198.51.100.0/24")
        );
        let range = format!(
            "%START RANGE TEST 11-12\n\nADD 11\n{}\nDEL 12\n{}\n%END TEST 12\n",
            route("203.0.113.0/24"),
            route("192.0.2.0/24")
        );
        let importer = importer(canned_upstream(snapshot, range).await);

        assert_eq!(importer.run_once(false).await.unwrap(), 4);

        let state = importer.journal.snapshot();
        assert_eq!(state.serial(), Some(Serial::new(12)));
        assert_eq!(state.object_count(), 2);

        let status = importer.status();
        assert_eq!(status.upstream_serial, Some(Serial::new(12)));
        assert!(status.last_error.is_none());

        // Entries already applied are skipped.
        assert_eq!(importer.run_once(false).await.unwrap(), 0);
        assert_eq!(importer.journal.current_serial(), Some(Serial::new(12)));
    }

    #[tokio::test]
    async fn interrupted_reload_is_redone() {
        use crate::commons::storage::{Key, KeyValueStore, Scope, Segment};
        use crate::constants::{SOURCES_NS, STATUS_KEY};

        // The daemon stopped while loading a snapshot at serial 10.
        let uri = test::mem_storage();
        let kv = KeyValueStore::create(&uri, SOURCES_NS).unwrap();
        let status = Key::new_scoped(
            Scope::from_segment(Segment::parse(test::TEST_SOURCE).unwrap()),
            Segment::parse(STATUS_KEY).unwrap(),
        );
        kv.store(&status, &serde_json::json!({ "serial": 10, "reloading": true }))
            .unwrap();

        let store = Arc::new(JournalStore::create(&uri).unwrap());
        let journal = JournalHandle::spawn(store, test::source(test::TEST_SOURCE)).unwrap();
        assert_eq!(journal.current_serial(), Some(Serial::new(10)));
        assert!(journal.snapshot().is_incomplete());

        let snapshot = format!("%START SNAPSHOT TEST 10\n\n{}\n%END TEST 10\n", route("192.0.2.0/24"));
        let range = "%START RANGE TEST 11-10\n%END TEST 10\n".to_string();
        let importer = Importer::new(journal, canned_upstream(snapshot, range).await, Duration::from_secs(5));

        assert_eq!(importer.run_once(false).await.unwrap(), 1);
        let state = importer.journal.snapshot();
        assert!(!state.is_incomplete());
        assert_eq!(state.serial(), Some(Serial::new(10)));
        assert_eq!(state.object_count(), 1);
    }

    #[tokio::test]
    async fn gap_triggers_reload() {
        let snapshot = format!("%START SNAPSHOT TEST 20\n\n{}\n%END TEST 20\n", route("192.0.2.0/24"));
        let range = "%START RANGE TEST 21-20\n%END TEST 20\n".to_string();
        let importer = importer(canned_upstream(snapshot, range).await);

        importer.journal.reset(vec![], Serial::new(3)).await.unwrap();
        let entry = MirrorEntry {
            serial: Serial::new(5),
            operation: crate::journal::Operation::AddOrUpdate,
            object: parse(&route("203.0.113.0/24")).unwrap(),
        };
        let err = ImportError::from(importer.journal.apply_mirror(vec![entry]).await.unwrap_err());
        assert!(err.needs_resync());

        assert_eq!(importer.run_once(true).await.unwrap(), 1);
        assert_eq!(importer.journal.current_serial(), Some(Serial::new(20)));
        assert_eq!(importer.journal.snapshot().object_count(), 1);
    }

    #[tokio::test]
    async fn upstream_errors_are_recorded() {
        let upstream = canned_upstream(
            "ERROR UNKNOWN_SOURCE unknown source TEST\n".to_string(),
            "ERROR UNKNOWN_SOURCE unknown source TEST\n".to_string(),
        )
        .await;
        let importer = importer(upstream);

        let err = importer.run_once(false).await.unwrap_err();
        assert!(matches!(&err, ImportError::Upstream(e) if e.code() == ErrorCode::UnknownSource));
        assert!(!err.needs_resync());

        let status = importer.status();
        assert!(status.last_error.unwrap().contains("UNKNOWN_SOURCE"));
        assert_eq!(importer.journal.current_serial(), None);
    }

    #[tokio::test]
    async fn unparseable_object_aborts_import() {
        let snapshot = "%START SNAPSHOT TEST 1\n\nnot an object\n\n%END TEST 1\n".to_string();
        let importer = importer(canned_upstream(snapshot, String::new()).await);

        let err = importer.run_once(false).await.unwrap_err();
        assert!(matches!(err, ImportError::Parse { serial: None, .. }));
        assert_eq!(importer.journal.current_serial(), None);
    }

    #[tokio::test]
    async fn unreachable_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = importer(addr).run_once(false).await.unwrap_err();
        assert!(matches!(err, ImportError::Connect { .. }));
    }
}
