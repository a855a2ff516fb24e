pub mod grpc {
    pub use crate::grpc::session::*;

    pub use self::{broker_client as client, broker_server as server};
}

use crate::ParseError;

/// A fully-assembled request to resolve a workspace session to a remote worker address.
///
/// Produced once at shim startup and never mutated afterward.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub user_id: String,
    pub repo_hash: String,
    pub session_id: String,
    pub source_path: String,
    pub startup_options: Vec<String>,
    pub region: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Clone, Debug)]
pub struct SessionResponse {
    pub status: SessionStatus,
    pub server_address: String,
}

impl From<SessionRequest> for grpc::SessionRequest {
    fn from(msg: SessionRequest) -> grpc::SessionRequest {
        grpc::SessionRequest {
            user_id: msg.user_id,
            repo_hash: msg.repo_hash,
            session_id: msg.session_id,
            source_path: msg.source_path,
            startup_options: msg.startup_options,
            region: msg.region,
        }
    }
}

impl TryFrom<grpc::SessionStatus> for SessionStatus {
    type Error = ParseError;

    fn try_from(value: grpc::SessionStatus) -> Result<Self, ParseError> {
        match value {
            grpc::SessionStatus::Pending => Ok(SessionStatus::Pending),
            grpc::SessionStatus::Ready => Ok(SessionStatus::Ready),
            grpc::SessionStatus::Failed => Ok(SessionStatus::Failed),
            grpc::SessionStatus::Unspecified => Err(ParseError::UnknownEnumValue(value as i32, "SessionStatus")),
        }
    }
}

impl TryFrom<grpc::SessionResponse> for SessionResponse {
    type Error = ParseError;

    fn try_from(value: grpc::SessionResponse) -> Result<Self, ParseError> {
        let status = grpc::SessionStatus::from_i32(value.status)
            .ok_or(ParseError::UnknownEnumValue(value.status, "SessionStatus"))?;
        Ok(SessionResponse {
            status: SessionStatus::try_from(status)?,
            server_address: value.server_address,
        })
    }
}
