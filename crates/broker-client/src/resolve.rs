use std::time::{Duration, Instant};

use rbs_core::trace_call_result;
use rbs_protocol::session::{grpc, SessionRequest, SessionResponse, SessionStatus};
use thiserror::Error;
use tonic::transport::Channel;
use tracing::{debug, info, instrument};

const PENDING_RETRY_DELAY: Duration = Duration::from_secs(1);
const TRANSPORT_ERROR_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("broker reported session failed")]
    BrokerFailedStatus,
    #[error("broker unreachable: {0}")]
    BrokerUnreachable(#[from] tonic::transport::Error),
    #[error("timed out waiting for broker to ready the session")]
    DeadlineExceeded,
}

/// A client for the broker's `GetServer` RPC, which maps a workspace session to a
/// ready remote worker address.
pub struct BrokerClient {
    inner: grpc::client::BrokerClient<Channel>,
}

impl BrokerClient {
    #[instrument(level = "info", err)]
    pub async fn connect(broker_addr: &str) -> Result<Self, ResolveError> {
        let channel = trace_call_result!(expr: tonic::transport::Channel::from_shared(format!("http://{broker_addr}"))
            .expect("broker address produces a valid URI")
            .connect()
            .await, function_name: "BrokerClient::connect")?;
        Ok(BrokerClient {
            inner: grpc::client::BrokerClient::new(channel),
        })
    }

    /// Polls the broker's `GetServer` RPC until it reports `READY`, a terminal
    /// `FAILED` status, or `deadline` elapses.
    #[instrument(level = "info", skip(self, request), err)]
    pub async fn resolve(&mut self, request: SessionRequest, deadline: Duration) -> Result<String, ResolveError> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= deadline {
                return Err(ResolveError::DeadlineExceeded);
            }

            let outcome = self.inner.get_server(grpc::SessionRequest::from(request.clone())).await;

            match outcome {
                Ok(response) => {
                    let response: SessionResponse = match response.into_inner().try_into() {
                        Ok(response) => response,
                        Err(err) => {
                            debug!(code = "session_response_unparseable", %err);
                            tokio::time::sleep(TRANSPORT_ERROR_RETRY_DELAY).await;
                            continue;
                        }
                    };

                    match response.status {
                        SessionStatus::Ready => {
                            info!(code = "session_ready", address = %response.server_address);
                            return Ok(response.server_address);
                        }
                        SessionStatus::Pending => {
                            debug!(code = "session_pending");
                            tokio::time::sleep(PENDING_RETRY_DELAY).await;
                        }
                        SessionStatus::Failed => {
                            return Err(ResolveError::BrokerFailedStatus);
                        }
                    }
                }
                Err(status) => {
                    debug!(code = "broker_call_transport_error", %status);
                    tokio::time::sleep(TRANSPORT_ERROR_RETRY_DELAY).await;
                }
            }
        }
    }
}
