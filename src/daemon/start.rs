//! Starting the daemon.

use std::{net::SocketAddr, path::PathBuf, process, sync::Arc};

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::{net::TcpListener, select, sync::oneshot};

use crate::commons::{error::Error, util::file};
use crate::daemon::{config::Config, irrdserver::IrrdServer, scheduler::Scheduler};
use crate::mirror::exporter;

use super::http::server::HttpServer;

/// Starts the daemon and runs until one of its listeners fails.
///
/// The optional sender is signalled once the HTTP listener is bound.
pub async fn start_irrd_daemon(
    config: Arc<Config>,
    config_file: Option<PathBuf>,
    signal_running: Option<oneshot::Sender<()>>,
) -> Result<(), Error> {
    write_pid_file_or_die(&config);

    let irrd = Arc::new(IrrdServer::build(config.clone(), config_file)?);

    let scheduler_future = Scheduler::build(irrd.clone()).run();

    let mirror_addr = config.mirror_socket_addr();
    let mirror_listener = TcpListener::bind(mirror_addr)
        .await
        .map_err(|e| Error::custom(format!("Could not bind mirror server to {mirror_addr}: {e}")))?;
    info!("Mirror server listening on {mirror_addr}");
    let mirror_future = exporter::serve(mirror_listener, irrd.clone(), config.mirror_timeout());

    let server = HttpServer::new(irrd, config.clone());
    let http_future = tokio::spawn(single_http_listener(server, config.socket_addr(), signal_running));

    select!(
        _ = http_future => error!("http server stopped unexpectedly"),
        _ = mirror_future => error!("mirror server stopped unexpectedly"),
        _ = scheduler_future => error!("scheduler stopped unexpectedly"),
    );

    Err(Error::custom("stopping irrd process"))
}

/// Runs an HTTP listener on a single socket.
async fn single_http_listener(server: Arc<HttpServer>, addr: SocketAddr, signal_running: Option<oneshot::Sender<()>>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Could not bind to {addr}: {err}");
            return;
        }
    };
    info!("HTTP server listening on {addr}");

    serve_http(listener, server, signal_running).await
}

/// Accepts HTTP connections on a bound listener.
pub async fn serve_http(listener: TcpListener, server: Arc<HttpServer>, signal_running: Option<oneshot::Sender<()>>) {
    if let Some(tx) = signal_running {
        let _ = tx.send(());
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("Fatal error in HTTP server: {err}");
                return;
            }
        };
        let server = server.clone();
        tokio::task::spawn(async move {
            let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |req| {
                        let server = server.clone();
                        async move { server.process_request(req, peer.ip()).await }
                    }),
                )
                .await;
        });
    }
}

fn write_pid_file_or_die(config: &Config) {
    let Some(pid_file) = config.pid_file() else {
        return;
    };
    if let Err(e) = file::save(process::id().to_string().as_bytes(), pid_file) {
        eprintln!("Could not write PID file: {e}");
        process::exit(1);
    }
}
