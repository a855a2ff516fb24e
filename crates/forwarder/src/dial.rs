use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tonic::transport::{Channel, Endpoint};

/// Resolves the Unix socket path backing an `Upstream::Deferred`, on first use.
///
/// Lets a caller hand the forwarder a socket path that isn't known until some
/// side-effecting discovery step has run, without the forwarder needing to know what
/// that step is.
#[tonic::async_trait]
pub trait ResolveSocketPath: Send + Sync {
    async fn resolve_socket_path(&self) -> Result<PathBuf, anyhow::Error>;
}

/// Where the forwarder dials for a given inbound call.
#[derive(Clone)]
pub enum Upstream {
    /// Plain TCP, used by the local shim to reach the remote agent.
    Tcp { host: String, port: u16 },
    /// A Unix domain socket, used by the remote agent to reach the co-resident
    /// build-tool server.
    Unix(PathBuf),
    /// A Unix domain socket whose path is resolved on first dial and cached by the
    /// resolver itself.
    Deferred(Arc<dyn ResolveSocketPath>),
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Tcp { host, port } => f.debug_struct("Tcp").field("host", host).field("port", port).finish(),
            Upstream::Unix(path) => f.debug_tuple("Unix").field(path).finish(),
            Upstream::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DialError {
    #[error("failed to dial upstream {upstream:?}: {source}")]
    Connect {
        upstream: Upstream,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("failed to resolve deferred upstream socket path: {0}")]
    Resolve(#[source] anyhow::Error),
}

impl Upstream {
    pub async fn connect(&self) -> Result<Channel, DialError> {
        match self {
            Upstream::Tcp { host, port } => Endpoint::from_shared(format!("http://{host}:{port}"))
                .expect("tcp upstream uri is always valid")
                .connect()
                .await
                .map_err(|source| DialError::Connect {
                    upstream: self.clone(),
                    source,
                }),
            Upstream::Unix(path) => connect_unix(path.clone()).await.map_err(|source| DialError::Connect {
                upstream: self.clone(),
                source,
            }),
            Upstream::Deferred(resolver) => {
                let path = resolver.resolve_socket_path().await.map_err(DialError::Resolve)?;
                connect_unix(path.clone()).await.map_err(|source| DialError::Connect {
                    upstream: Upstream::Unix(path),
                    source,
                })
            }
        }
    }
}

async fn connect_unix(path: PathBuf) -> Result<Channel, tonic::transport::Error> {
    // The URI here is never dialed; `connect_with_connector` only uses it to satisfy
    // `Endpoint`'s API, the connector below ignores it entirely.
    Endpoint::from_static("http://localhost")
        .connect_with_connector(tower::service_fn(move |_: http::Uri| {
            let path = path.clone();
            async move { tokio::net::UnixStream::connect(path).await }
        }))
        .await
}
