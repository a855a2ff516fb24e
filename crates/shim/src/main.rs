use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rbs_broker_client::BrokerClient;
use rbs_forwarder::{serve_unix, Forwarder, Upstream};
use rbs_protocol::server_dir::ServerDirectory;
use rbs_protocol::session::SessionRequest;
use tracing::info;

#[cfg(test)]
mod tests;

const BROKER_DEADLINE: Duration = Duration::from_secs(120);

/// The local shim: claims the build-tool client's well-known socket and forwards every
/// RPC to a remote worker resolved through the broker.
#[derive(Parser, Debug)]
struct Args {
    /// The build tool's output base directory; the shim listens under
    /// `<output-base>/server/`.
    #[arg(long, env = "RBS_OUTPUT_BASE")]
    output_base: PathBuf,

    /// The workspace directory being built; hashed to partition sessions by repo.
    #[arg(long, env = "RBS_WORKSPACE")]
    workspace: PathBuf,

    /// Identity used when resolving a session with the broker.
    #[arg(long, env = "USER", default_value = "unknown")]
    user_id: String,

    /// Address of the broker's `GetServer` RPC endpoint.
    #[arg(long, env = "RBS_BROKER_ADDR", default_value = "127.0.0.1:9010")]
    broker_addr: String,

    /// `|||`-separated startup options forwarded to the broker for worker provisioning.
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

    let repo_hash = format!("{:x}", md5::compute(args.workspace.to_string_lossy().as_bytes()));
    let session_id = format!("session-{}", now_unix_seconds());
    let region = rbs_broker_client::detect_region().await;

    info!(code = "shim_starting", %repo_hash, %session_id, %region);

    let server_dir = ServerDirectory::create(&args.output_base).context("creating server directory")?;
    server_dir.write_request_cookie().context("writing request cookie")?;
    server_dir.write_pid_file().context("writing pid file")?;
    server_dir.remove_stale_socket().context("removing stale socket")?;

    let request = SessionRequest {
        user_id: args.user_id,
        repo_hash,
        session_id: session_id.clone(),
        source_path: args.workspace.to_string_lossy().into_owned(),
        startup_options,
        region,
    };

    let mut broker = BrokerClient::connect(&args.broker_addr)
        .await
        .context("connecting to broker")?;
    let server_address = broker
        .resolve(request, BROKER_DEADLINE)
        .await
        .context("resolving remote worker session")?;

    let (host, port) = split_host_port(&server_address).context("parsing resolved server address")?;
    let forwarder = Forwarder::new(Upstream::Tcp { host, port }).with_session_id(session_id);

    let socket_path = server_dir.socket_path();
    info!(code = "shim_listening", socket = %socket_path.display(), upstream = %server_address);

    let listen_result = tokio::select! {
        result = serve_unix(&socket_path, forwarder) => Some(result),
        _ = wait_for_shutdown_signal() => {
            info!(code = "shim_shutdown_signal");
            None
        }
    };

    server_dir.remove_socket().context("removing socket on shutdown")?;

    if let Some(result) = listen_result {
        result.context("shim listener failed")?;
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

fn now_unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs()
}

fn split_host_port(address: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("address {address:?} is not host:port"))?;
    let port: u16 = port.parse().context("parsing port")?;
    Ok((host.to_owned(), port))
}
