use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http::uri::PathAndQuery;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::body::BoxBody;
use tonic::client::Grpc as ClientGrpc;
use tonic::server::{Grpc as ServerGrpc, StreamingService};
use tonic::{Request, Response, Status, Streaming};
use tower::Service;
use tracing::{debug, instrument};

use crate::codec::BytesCodec;
use crate::dial::Upstream;
use crate::task::AbortOnDrop;

const REQUEST_CHANNEL_CAPACITY: usize = 16;
const SESSION_HEADER: &str = "x-rbs-session-id";

type ResponseStream = Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send>>;

/// Dials `upstream` for every call whose method is not otherwise claimed by the
/// process, relaying frames, metadata, headers and trailers without interpreting them.
///
/// Installed as the fallback `tower::Service` behind a raw `hyper` server, since
/// `tonic::transport::Server`'s router has no catch-all route.
#[derive(Clone)]
pub struct Forwarder {
    upstream: Upstream,
    session_id: Option<String>,
}

impl Forwarder {
    pub fn new(upstream: Upstream) -> Self {
        Forwarder {
            upstream,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

impl Service<http::Request<hyper::Body>> for Forwarder {
    type Response = http::Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyper::Body>) -> Self::Future {
        let method = req.uri().path().to_owned();
        let service = RelayService {
            upstream: self.upstream.clone(),
            session_id: self.session_id.clone(),
            method,
        };
        let mut grpc = ServerGrpc::new(BytesCodec);
        Box::pin(async move { Ok(grpc.streaming(service, req).await) })
    }
}

#[derive(Clone)]
struct RelayService {
    upstream: Upstream,
    session_id: Option<String>,
    method: String,
}

impl StreamingService<Bytes> for RelayService {
    type Response = Bytes;
    type ResponseStream = ResponseStream;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send>>;

    fn call(&mut self, request: Request<Streaming<Bytes>>) -> Self::Future {
        let upstream = self.upstream.clone();
        let session_id = self.session_id.clone();
        let method = self.method.clone();
        Box::pin(async move { relay(upstream, session_id, method, request).await })
    }
}

#[instrument(level = "debug", skip(request), fields(method = %method))]
async fn relay(
    upstream: Upstream,
    session_id: Option<String>,
    method: String,
    request: Request<Streaming<Bytes>>,
) -> Result<Response<ResponseStream>, Status> {
    let path: PathAndQuery = method
        .parse()
        .map_err(|err| Status::internal(format!("could not resolve method from call context: {err}")))?;

    let channel = upstream
        .connect()
        .await
        .map_err(|err| Status::unavailable(format!("upstream dial failed: {err}")))?;

    let mut client = ClientGrpc::new(channel);
    client
        .ready()
        .await
        .map_err(|err| Status::unavailable(format!("upstream not ready: {err}")))?;

    let (inbound_metadata, _extensions, mut inbound_stream) = request.into_parts();

    let (request_tx, request_rx) = mpsc::channel::<Bytes>(REQUEST_CHANNEL_CAPACITY);
    let (request_error_tx, mut request_error_rx) = oneshot::channel::<Status>();
    let request_task = tokio::spawn(async move {
        loop {
            match inbound_stream.message().await {
                Ok(Some(frame)) => {
                    if request_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(status) => {
                    debug!(code = "request_copier_error", %status);
                    let _ = request_error_tx.send(status);
                    break;
                }
            }
        }
    });
    let _request_task_guard = AbortOnDrop::new(request_task);

    let mut outbound_request = Request::new(ReceiverStream::new(request_rx));
    *outbound_request.metadata_mut() = inbound_metadata;
    if let Some(session_id) = session_id {
        if let Ok(value) = session_id.parse() {
            outbound_request.metadata_mut().insert(SESSION_HEADER, value);
        }
    }

    let upstream_response = client.streaming(outbound_request, path, BytesCodec).await?;

    let upstream_metadata = upstream_response.metadata().clone();
    let mut upstream_stream = upstream_response.into_inner();

    let response_stream = async_stream::stream! {
        let _guard = _request_task_guard;
        loop {
            tokio::select! {
                biased;

                // A transport error on the inbound (request) side must fail the whole
                // call, not be mistaken for a clean half-close: surface it here instead
                // of waiting on an upstream that will now never see more frames.
                Ok(status) = &mut request_error_rx => {
                    yield Err(status);
                    break;
                }
                result = upstream_stream.message() => {
                    match result {
                        Ok(Some(frame)) => yield Ok(frame),
                        Ok(None) => {
                            let trailers = upstream_stream.trailers().await.ok().flatten().unwrap_or_default();
                            let mut status = Status::ok("");
                            *status.metadata_mut() = trailers;
                            yield Err(status);
                            break;
                        }
                        Err(status) => {
                            debug!(code = "response_copier_error", %status);
                            yield Err(status);
                            break;
                        }
                    }
                }
            }
        }
    };

    let mut response = Response::new(Box::pin(response_stream) as ResponseStream);
    *response.metadata_mut() = upstream_metadata;
    Ok(response)
}
