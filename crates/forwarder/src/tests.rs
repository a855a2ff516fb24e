use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::service::make_service_fn;
use hyper::Server as HyperServer;
use rand::Rng;
use tonic::client::Grpc as ClientGrpc;
use tonic::metadata::MetadataMap;
use tonic::server::{Grpc as ServerGrpc, StreamingService};
use tonic::{Request, Response, Status, Streaming};
use tower::Service;

use crate::codec::BytesCodec;
use crate::dial::Upstream;
use crate::service::Forwarder;

type EchoResponseStream = Pin<Box<dyn futures::Stream<Item = Result<Bytes, Status>> + Send>>;

/// An upstream gRPC service that echoes every frame it receives, in order, recording
/// what it saw so tests can assert on it.
#[derive(Clone, Default)]
struct EchoUpstream {
    observed_metadata: Arc<Mutex<Option<MetadataMap>>>,
    received_frames: Arc<Mutex<Vec<Bytes>>>,
}

impl Service<http::Request<hyper::Body>> for EchoUpstream {
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyper::Body>) -> Self::Future {
        let svc = EchoRelayService {
            observed_metadata: self.observed_metadata.clone(),
            received_frames: self.received_frames.clone(),
        };
        let mut grpc = ServerGrpc::new(BytesCodec);
        Box::pin(async move { Ok(grpc.streaming(svc, req).await) })
    }
}

#[derive(Clone)]
struct EchoRelayService {
    observed_metadata: Arc<Mutex<Option<MetadataMap>>>,
    received_frames: Arc<Mutex<Vec<Bytes>>>,
}

impl StreamingService<Bytes> for EchoRelayService {
    type Response = Bytes;
    type ResponseStream = EchoResponseStream;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Self::ResponseStream>, Status>> + Send>>;

    fn call(&mut self, request: Request<Streaming<Bytes>>) -> Self::Future {
        let observed_metadata = self.observed_metadata.clone();
        let received_frames = self.received_frames.clone();
        Box::pin(async move {
            *observed_metadata.lock().unwrap() = Some(request.metadata().clone());
            let mut inbound = request.into_inner();
            let stream = async_stream::stream! {
                loop {
                    match inbound.message().await {
                        Ok(Some(frame)) => {
                            received_frames.lock().unwrap().push(frame.clone());
                            yield Ok(frame);
                        }
                        Ok(None) => { yield Err(Status::ok("")); break; }
                        Err(status) => { yield Err(status); break; }
                    }
                }
            };
            Ok(Response::new(Box::pin(stream) as EchoResponseStream))
        })
    }
}

async fn spawn_echo_upstream() -> (std::net::SocketAddr, EchoUpstream) {
    let listener = crate::listen::bind_any_tcp().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = hyper::server::conn::AddrIncoming::from_listener(listener).unwrap();
    let upstream = EchoUpstream::default();
    let server_upstream = upstream.clone();
    tokio::spawn(async move {
        HyperServer::builder(incoming)
            .http2_only(true)
            .serve(make_service_fn(move |_conn| {
                let svc = server_upstream.clone();
                async move { Ok::<_, Infallible>(svc) }
            }))
            .await
            .unwrap();
    });
    (addr, upstream)
}

async fn spawn_forwarder(upstream_addr: std::net::SocketAddr) -> std::net::SocketAddr {
    let listener = crate::listen::bind_any_tcp().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = hyper::server::conn::AddrIncoming::from_listener(listener).unwrap();
    let forwarder = Forwarder::new(Upstream::Tcp {
        host: upstream_addr.ip().to_string(),
        port: upstream_addr.port(),
    });
    tokio::spawn(async move {
        HyperServer::builder(incoming)
            .http2_only(true)
            .serve(make_service_fn(move |_conn| {
                let forwarder = forwarder.clone();
                async move { Ok::<_, Infallible>(forwarder) }
            }))
            .await
            .unwrap();
    });
    addr
}

async fn connect_client(addr: std::net::SocketAddr) -> ClientGrpc<tonic::transport::Channel> {
    let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    ClientGrpc::new(channel)
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_byte_exact() {
    let (upstream_addr, upstream) = spawn_echo_upstream().await;
    let forwarder_addr = spawn_forwarder(upstream_addr).await;
    let mut client = connect_client(forwarder_addr).await;
    client.ready().await.unwrap();

    let payload: Bytes = (1u8..=32).collect::<Vec<u8>>().into();
    let mut request = Request::new(tokio_stream::once(payload.clone()));
    request
        .metadata_mut()
        .insert("x-test-header", "test-val".parse().unwrap());

    let response = client
        .streaming(request, "/TestService/Echo".parse().unwrap(), BytesCodec)
        .await
        .unwrap();
    let mut stream = response.into_inner();

    let received = stream.message().await.unwrap().unwrap();
    assert_eq!(received, payload);
    assert!(stream.message().await.unwrap().is_none());

    let observed = upstream.observed_metadata.lock().unwrap().clone().unwrap();
    assert_eq!(observed.get("x-test-header").unwrap(), "test-val");
}

#[tokio::test(flavor = "multi_thread")]
async fn bidi_streaming_preserves_order() {
    let (upstream_addr, _upstream) = spawn_echo_upstream().await;
    let forwarder_addr = spawn_forwarder(upstream_addr).await;
    let mut client = connect_client(forwarder_addr).await;
    client.ready().await.unwrap();

    let mut rng = rand::thread_rng();
    let frames: Vec<Bytes> = (0..1000)
        .map(|_| {
            let len = rng.gen_range(1..=4096);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            Bytes::from(bytes)
        })
        .collect();

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    let send_frames = frames.clone();
    let send_task = tokio::spawn(async move {
        for frame in send_frames {
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let request = Request::new(tokio_stream::wrappers::ReceiverStream::new(rx));
    let response = client
        .streaming(request, "/TestService/Echo".parse().unwrap(), BytesCodec)
        .await
        .unwrap();
    let mut stream = response.into_inner();

    for (i, expected) in frames.iter().enumerate() {
        let received = stream
            .message()
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("stream ended early at frame {i}"));
        assert_eq!(&received, expected, "frame {i} mismatched");
    }
    assert!(stream.message().await.unwrap().is_none());

    send_task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn client_initiated_eof_reaches_upstream() {
    let (upstream_addr, upstream) = spawn_echo_upstream().await;
    let forwarder_addr = spawn_forwarder(upstream_addr).await;
    let mut client = connect_client(forwarder_addr).await;
    client.ready().await.unwrap();

    let frames = vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")];
    let request = Request::new(tokio_stream::iter(frames.clone()));
    let response = client
        .streaming(request, "/TestService/Echo".parse().unwrap(), BytesCodec)
        .await
        .unwrap();
    let mut stream = response.into_inner();

    assert_eq!(stream.message().await.unwrap().unwrap(), frames[0]);
    assert_eq!(stream.message().await.unwrap().unwrap(), frames[1]);
    assert!(stream.message().await.unwrap().is_none());

    assert_eq!(*upstream.received_frames.lock().unwrap(), frames);
}
