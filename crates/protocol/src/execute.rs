pub mod grpc {
    pub use crate::grpc::execute::*;

    pub use self::{runner_client as client, runner_server as server};
}

pub use grpc::{execute_request::Input, execute_response::Output, ExecuteRequest, ExecuteResponse, InitRequest};
