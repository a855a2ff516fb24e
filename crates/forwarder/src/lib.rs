mod codec;
mod dial;
mod listen;
mod service;
mod task;

pub use codec::BytesCodec;
pub use dial::{DialError, ResolveSocketPath, Upstream};
pub use listen::{bind_any_tcp, serve_tcp, serve_unix};
pub use service::Forwarder;
pub use task::AbortOnDrop;

#[cfg(test)]
mod tests;
