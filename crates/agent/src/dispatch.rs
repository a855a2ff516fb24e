use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use rbs_forwarder::Forwarder;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tower::Service;

/// Routes an inbound call to the registered Command Execution Service when its path
/// matches, and to the forwarder otherwise.
///
/// `tonic::transport::Server`'s router can only ever match a fixed set of registered
/// services; there is no catch-all route. This performs the same prefix match tonic
/// does internally, then falls through to the forwarder for everything else, so the
/// two services can share one listener.
#[derive(Clone)]
pub struct Dispatch<R> {
    runner: R,
    forwarder: Forwarder,
}

impl<R> Dispatch<R> {
    pub fn new(runner: R, forwarder: Forwarder) -> Self {
        Dispatch { runner, forwarder }
    }
}

impl<R> Service<http::Request<hyper::Body>> for Dispatch<R>
where
    R: Service<http::Request<hyper::Body>, Response = http::Response<BoxBody>, Error = Infallible>
        + NamedService
        + Clone
        + Send
        + 'static,
    R::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyper::Body>) -> Self::Future {
        let prefix = format!("/{}/", R::NAME);
        if req.uri().path().starts_with(&prefix) {
            Box::pin(self.runner.clone().call(req))
        } else {
            Box::pin(self.forwarder.clone().call(req))
        }
    }
}
