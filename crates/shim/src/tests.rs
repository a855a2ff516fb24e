use std::path::Path;
use std::time::Duration;

use rbs_forwarder::{serve_unix, Forwarder, Upstream};
use rbs_protocol::server_dir::ServerDirectory;
use tempfile::tempdir;
use tokio::net::UnixStream;

/// Exercises the server-directory lifecycle a running shim promises: the three
/// on-disk files exist and are well-formed before the listener accepts its first
/// connection, and `server.socket` is gone once the listener is torn down.
#[tokio::test(flavor = "multi_thread")]
async fn server_directory_files_appear_before_accept_and_socket_is_removed_on_shutdown() {
    let output_base = tempdir().unwrap();

    let server_dir = ServerDirectory::create(output_base.path()).unwrap();
    let cookie = server_dir.write_request_cookie().unwrap();
    server_dir.write_pid_file().unwrap();
    server_dir.remove_stale_socket().unwrap();

    assert_eq!(cookie.len(), 32, "cookie should be 16 bytes hex-encoded");
    assert!(hex::decode(&cookie).is_ok());

    let pid_text = std::fs::read_to_string(server_dir.pid_file_path()).unwrap();
    assert_eq!(pid_text.parse::<u32>().unwrap(), std::process::id());

    let cookie_on_disk = std::fs::read_to_string(server_dir.request_cookie_path()).unwrap();
    assert_eq!(cookie_on_disk, cookie);

    let socket_path = server_dir.socket_path();
    assert!(!socket_path.exists());

    let forwarder = Forwarder::new(Upstream::Tcp {
        host: "127.0.0.1".to_owned(),
        port: 1,
    });
    let serve_path = socket_path.clone();
    let serve_handle = tokio::spawn(async move { serve_unix(&serve_path, forwarder).await });

    wait_for_socket(&socket_path).await;
    assert!(socket_path.exists(), "socket should exist once the listener is bound");

    // A successful connect proves the listener accepted before this assertion runs.
    UnixStream::connect(&socket_path).await.unwrap();

    serve_handle.abort();
    let _ = serve_handle.await;
    server_dir.remove_socket().unwrap();

    assert!(!socket_path.exists(), "socket must be removed after shutdown");
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket {path:?} never appeared");
}
