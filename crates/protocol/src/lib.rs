pub mod execute;
pub mod server_dir;
pub mod session;

mod grpc {
    pub mod session {
        tonic::include_proto!("rbs.session");
    }
    pub mod execute {
        tonic::include_proto!("rbs.execute");
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("unknown value {0} for enum {1:?}")]
    UnknownEnumValue(i32, &'static str),
}
