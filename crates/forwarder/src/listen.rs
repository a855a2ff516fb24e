use std::convert::Infallible;
use std::io;
use std::path::Path;

use hyper::server::conn::AddrIncoming;
use hyper::service::make_service_fn;
use hyper::Server as HyperServer;
use tokio::net::{TcpListener, UnixListener};
use tokio_stream::wrappers::UnixListenerStream;
use tracing::info;

use crate::service::Forwarder;

/// Serves `forwarder` on a TCP listener bound to `addr`.
///
/// Built directly on `hyper::Server` rather than `tonic::transport::Server`: tonic's
/// router dispatches by matching a service's name against the request path prefix and
/// has no way to express "anything not otherwise claimed", so the generated per-RPC
/// dispatch is bypassed entirely in favor of serving the forwarder as the sole `tower`
/// service for every request.
pub async fn serve_tcp(addr: std::net::SocketAddr, forwarder: Forwarder) -> Result<(), hyper::Error> {
    let incoming = AddrIncoming::bind(&addr)?;
    info!(code = "forwarder_listening", %addr, transport = "tcp");
    HyperServer::builder(incoming)
        .http2_only(true)
        .serve(make_service_fn(move |_conn| {
            let forwarder = forwarder.clone();
            async move { Ok::<_, Infallible>(forwarder) }
        }))
        .await
}

/// Serves `forwarder` on a Unix domain socket at `path`, removing any stale socket
/// file left behind by a previous run first.
pub async fn serve_unix(path: &Path, forwarder: Forwarder) -> Result<(), io::Error> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    let listener = UnixListener::bind(path)?;
    info!(code = "forwarder_listening", path = %path.display(), transport = "unix");
    let incoming = UnixListenerStream::new(listener);

    HyperServer::builder(hyper::server::accept::from_stream(incoming))
        .http2_only(true)
        .serve(make_service_fn(move |_conn| {
            let forwarder = forwarder.clone();
            async move { Ok::<_, Infallible>(forwarder) }
        }))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
}

/// Resolves a TCP listen address that the OS assigns a port for (used by tests), or
/// a fixed configured port in production.
pub async fn bind_any_tcp() -> Result<TcpListener, io::Error> {
    TcpListener::bind("127.0.0.1:0").await
}
