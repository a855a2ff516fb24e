mod dispatch;
mod execute;
mod output_base;


use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hyper::service::make_service_fn;
use hyper::Server as HyperServer;
use rbs_forwarder::{Forwarder, Upstream};
use rbs_protocol::execute::grpc::server::RunnerServer;
use tracing::info;

use crate::dispatch::Dispatch;
use crate::execute::RunnerService;
use crate::output_base::OutputBaseResolver;

/// The remote agent: runs on the worker, executes commands on behalf of the build-tool
/// client, and forwards every other RPC to the co-resident build-tool server.
#[derive(Parser, Debug)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 9011)]
    port: u16,

    /// Path to the native build-tool client binary used to discover the local server's
    /// output base (via `info output_base`).
    #[arg(long, env = "RBS_BUILD_TOOL_BIN", default_value = "bazel")]
    build_tool_bin: String,

    /// `|||`-separated startup options passed to the build-tool client before `info
    /// output_base`.
    #[arg(long, env = "BAZEL_STARTUP_OPTIONS", default_value = "")]
    startup_options: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rbs_cli_support::logging::init();

    let args = Args::parse();
    let startup_options: Vec<String> = args
        .startup_options
        .split("|||")
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    let resolver: Arc<dyn rbs_forwarder::ResolveSocketPath> =
        Arc::new(OutputBaseResolver::new(args.build_tool_bin, startup_options));
    let forwarder = Forwarder::new(Upstream::Deferred(resolver));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(code = "agent_starting", %addr);

    let runner = RunnerServer::new(RunnerService::default());
    let dispatch = Dispatch::new(runner, forwarder);

    HyperServer::bind(&addr)
        .http2_only(true)
        .serve(make_service_fn(move |_conn| {
            let dispatch = dispatch.clone();
            async move { Ok::<_, Infallible>(dispatch) }
        }))
        .await
        .context("agent HTTP/2 server failed")?;

    Ok(())
}
