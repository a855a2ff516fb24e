use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rand::RngCore;
use rbs_core::trace_call_result;

/// The on-disk contract the local shim publishes under `<output_base>/server/`.
///
/// Three files make up `ServerDirectoryState`: the Unix domain socket the shim listens
/// on, a text PID file, and a hex-encoded request cookie the build-tool client reads and
/// echoes back on every call. The shim is the sole writer; all three are written once at
/// startup and never mutated afterward.
#[derive(Clone, Debug)]
pub struct ServerDirectory {
    dir: PathBuf,
}

impl ServerDirectory {
    /// Creates `<output_base>/server/` if it does not already exist.
    pub fn create(output_base: &Path) -> Result<Self, io::Error> {
        let dir = output_base.join("server");
        trace_call_result!(fs::create_dir_all(&dir))?;
        Ok(ServerDirectory { dir })
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join("server.socket")
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.dir.join("server.pid.txt")
    }

    pub fn request_cookie_path(&self) -> PathBuf {
        self.dir.join("request_cookie")
    }

    /// Removes a stale `server.socket` left behind by a previous, uncleanly-terminated shim.
    ///
    /// It is not an error for the socket to already be absent.
    pub fn remove_stale_socket(&self) -> Result<(), io::Error> {
        match fs::remove_file(self.socket_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Writes `server.pid.txt` with the current process's PID, as ASCII decimal with no
    /// trailing newline.
    pub fn write_pid_file(&self) -> Result<(), io::Error> {
        trace_call_result!(fs::write(self.pid_file_path(), std::process::id().to_string()))
    }

    /// Generates a fresh 16-byte cookie, writes it hex-encoded to `request_cookie`, and
    /// returns the hex string. The shim never validates this value; it is an opaque
    /// pass-through for the build-tool client.
    pub fn write_request_cookie(&self) -> Result<String, io::Error> {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let cookie = hex::encode(raw);
        trace_call_result!(fs::write(self.request_cookie_path(), &cookie))?;
        Ok(cookie)
    }

    /// Unlinks `server.socket`. Must be called on every shim exit path, graceful or signalled.
    pub fn remove_socket(&self) -> Result<(), io::Error> {
        match fs::remove_file(self.socket_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
