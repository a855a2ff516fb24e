use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum OutputBaseError {
    #[error("failed to run {binary:?} info output_base: {source}")]
    Spawn { binary: String, source: std::io::Error },
    #[error("{binary:?} info output_base exited with status {status}")]
    NonZeroExit { binary: String, status: std::process::ExitStatus },
}

/// Lazily resolves the Unix socket the co-resident build-tool server listens on.
///
/// The path is discovered by shelling out to `info output_base` on the build-tool
/// client, which also has the side effect of starting that server if it is not yet
/// running. The resolution happens once per agent process and is cached afterward.
pub struct OutputBaseResolver {
    binary: String,
    startup_options: Vec<String>,
    cached: OnceCell<Arc<PathBuf>>,
}

impl OutputBaseResolver {
    pub fn new(binary: String, startup_options: Vec<String>) -> Self {
        OutputBaseResolver {
            binary,
            startup_options,
            cached: OnceCell::new(),
        }
    }

    #[instrument(level = "info", skip(self), err)]
    pub async fn socket_path(&self) -> Result<Arc<PathBuf>, OutputBaseError> {
        self.cached
            .get_or_try_init(|| async {
                let mut command = Command::new(&self.binary);
                command
                    .args(&self.startup_options)
                    .arg("info")
                    .arg("output_base")
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit());

                let output = command.output().await.map_err(|source| OutputBaseError::Spawn {
                    binary: self.binary.clone(),
                    source,
                })?;

                if !output.status.success() {
                    return Err(OutputBaseError::NonZeroExit {
                        binary: self.binary.clone(),
                        status: output.status,
                    });
                }

                let output_base = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                debug!(code = "output_base_resolved", %output_base);

                Ok(Arc::new(PathBuf::from(output_base).join("server").join("server.socket")))
            })
            .await
            .map(Arc::clone)
    }
}

#[tonic::async_trait]
impl rbs_forwarder::ResolveSocketPath for OutputBaseResolver {
    async fn resolve_socket_path(&self) -> Result<PathBuf, anyhow::Error> {
        Ok((*self.socket_path().await?).clone())
    }
}
