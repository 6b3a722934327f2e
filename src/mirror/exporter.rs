//! Serves sources to downstream mirrors.

use std::{fmt, io, net::IpAddr, str::FromStr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    net::TcpListener,
    select, time,
};

use crate::constants::MIRROR_MAX_REQUEST_LEN;
use crate::journal::{JournalEntry, JournalError, JournalHandle, Serial};
use crate::rpsl::{RpslObject, SourceName};

use super::protocol::{ErrorCode, GREETING, Line, ProtocolError, Request};

//------------ ExportRegistry ------------------------------------------------

/// Gives the exporter access to the sources it may serve.
pub trait ExportRegistry: Send + Sync + 'static {
    /// Returns the journal of the source if the peer may mirror it.
    fn export_journal(&self, source: &SourceName, peer: IpAddr) -> Result<JournalHandle, ProtocolError>;
}

//------------ Listener ------------------------------------------------------

/// Accepts mirror connections until the listener fails.
pub async fn serve<R: ExportRegistry>(listener: TcpListener, registry: Arc<R>, timeout: Duration) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("Fatal error in mirror server: {err}");
                return;
            }
        };
        let registry = registry.clone();
        tokio::task::spawn(async move {
            if let Err(err) = session(stream, peer.ip(), registry.as_ref(), timeout).await {
                debug!("Mirror session with {peer} ended: {err}");
            }
        });
    }
}

/// Handles a single mirror session.
pub async fn session<S, R>(stream: S, peer: IpAddr, registry: &R, timeout: Duration) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite,
    R: ExportRegistry + ?Sized,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut out = Output {
        writer: BufWriter::new(writer),
        timeout,
    };

    out.line(GREETING).await?;
    out.flush().await?;

    let mut line = String::new();
    let read = time::timeout(
        timeout,
        (&mut reader).take(MIRROR_MAX_REQUEST_LEN as u64).read_line(&mut line),
    )
    .await
    .map_err(|_| timed_out("no request received"))??;
    if read == 0 {
        return Ok(());
    }

    let request = match Request::from_str(&line) {
        Ok(request) => request,
        Err(err) => return out.error(err).await,
    };
    info!("Mirror request from {peer}: {request}");

    let journal = match registry.export_journal(request.source(), peer) {
        Ok(journal) => journal,
        Err(err) => return out.error(err).await,
    };

    match request {
        Request::Snapshot { .. } => snapshot(&mut out, &journal).await,
        Request::Range {
            from, to, keepalive, ..
        } => {
            let last = match range(&mut out, &journal, from, to).await? {
                Some(last) => last,
                None => return Ok(()),
            };
            if keepalive && to.is_none() {
                tail(&mut out, &mut reader, &journal, last).await
            } else {
                Ok(())
            }
        }
    }
}

async fn snapshot<W: AsyncWrite + Unpin>(out: &mut Output<W>, journal: &JournalHandle) -> io::Result<()> {
    let state = journal.snapshot();
    let source = state.source().clone();
    let serial = state.serial().unwrap_or(Serial::new(0));

    out.line(Line::StartSnapshot {
        source: source.clone(),
        serial,
    })
    .await?;
    for object in state.objects() {
        out.object(object).await?;
    }
    out.line(Line::End { source, serial }).await?;
    out.flush().await
}

/// Sends a range and returns the last serial sent, or `None` if an error
/// was sent instead.
async fn range<W: AsyncWrite + Unpin>(
    out: &mut Output<W>,
    journal: &JournalHandle,
    from: Serial,
    to: Option<Serial>,
) -> io::Result<Option<Serial>> {
    let state = journal.snapshot();
    let source = state.source().clone();

    let entries = match state.range(from, to) {
        Ok(entries) => entries,
        Err(err) => {
            out.error(export_error(err)).await?;
            return Ok(None);
        }
    };

    let to = to.or(state.serial()).unwrap_or(Serial::new(0));
    out.line(Line::StartRange {
        source: source.clone(),
        from,
        to,
    })
    .await?;
    for entry in &entries {
        out.entry(entry).await?;
    }
    out.line(Line::End { source, serial: to }).await?;
    out.flush().await?;

    Ok(Some(to))
}

/// Streams new journal entries until the peer goes away.
async fn tail<R, W>(out: &mut Output<W>, reader: &mut R, journal: &JournalHandle, mut last: Serial) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut serials = journal.subscribe();
    let mut buf = [0u8; 512];

    loop {
        serials.borrow_and_update();

        if journal.current_serial() > Some(last) {
            let entries = match journal.range(last.next(), None) {
                Ok(entries) => entries,
                Err(err) => return out.error(export_error(err)).await,
            };
            for entry in &entries {
                out.entry(entry).await?;
                last = entry.serial();
            }
            out.line(Line::End {
                source: journal.source().clone(),
                serial: last,
            })
            .await?;
            out.flush().await?;
        }

        select! {
            changed = serials.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return Ok(()),
                    Ok(_) => {}
                }
            }
        }
    }
}

fn export_error(err: JournalError) -> ProtocolError {
    match err {
        JournalError::SerialTooOld { .. } => ProtocolError::new(ErrorCode::TooOld, err.to_string()),
        _ => ProtocolError::new(ErrorCode::InvalidRange, err.to_string()),
    }
}

fn timed_out(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, msg.to_string())
}

//------------ Output --------------------------------------------------------

struct Output<W> {
    writer: BufWriter<W>,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> Output<W> {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        time::timeout(self.timeout, self.writer.write_all(data))
            .await
            .map_err(|_| timed_out("write timed out"))?
    }

    async fn line(&mut self, line: impl fmt::Display) -> io::Result<()> {
        self.write(format!("{line}\n").as_bytes()).await
    }

    async fn object(&mut self, object: &RpslObject) -> io::Result<()> {
        self.write(object.text().trim_end().as_bytes()).await?;
        self.write(b"\n\n").await
    }

    async fn entry(&mut self, entry: &JournalEntry) -> io::Result<()> {
        self.line(Line::Entry {
            operation: entry.operation(),
            serial: entry.serial(),
        })
        .await?;
        self.object(entry.object()).await
    }

    async fn error(&mut self, err: ProtocolError) -> io::Result<()> {
        debug!("Mirror request failed: {err}");
        self.line(err).await?;
        self.flush().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        time::timeout(self.timeout, self.writer.flush())
            .await
            .map_err(|_| timed_out("flush timed out"))?
    }
}

//------------ Tests ---------------------------------------------------------
