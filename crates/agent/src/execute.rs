use std::pin::Pin;
use std::process::Stdio;

use futures::Stream;
use rbs_forwarder::AbortOnDrop;
use rbs_protocol::execute::{grpc, ExecuteRequest, ExecuteResponse, Input, Output};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument};

const CHUNK_SIZE: usize = 4096;
const RESPONSE_CHANNEL_CAPACITY: usize = 16;

/// Implements the Command Execution Service: a single bidirectional RPC that spawns a
/// subprocess and streams its stdin/stdout/stderr.
#[derive(Clone, Default)]
pub struct RunnerService;

type ResponseStream = Pin<Box<dyn Stream<Item = Result<ExecuteResponse, Status>> + Send>>;

#[tonic::async_trait]
impl grpc::server::Runner for RunnerService {
    type ExecuteCommandStream = ResponseStream;

    #[instrument(level = "info", skip(self, request))]
    async fn execute_command(
        &self,
        request: Request<Streaming<ExecuteRequest>>,
    ) -> Result<Response<Self::ExecuteCommandStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("execution stream closed before Init"))?;
        let init = match first.input {
            Some(Input::Init(init)) => init,
            _ => return Err(Status::invalid_argument("first ExecuteRequest must be Init")),
        };

        if init.args.is_empty() {
            return Err(Status::invalid_argument("Init.args must not be empty"));
        }

        info!(code = "execute_spawn", args = ?init.args, cwd = %init.working_directory);

        let mut command = Command::new(&init.args[0]);
        command
            .args(&init.args[1..])
            .current_dir(&init.working_directory)
            .envs(init.env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|err| Status::internal(format!("failed to spawn command: {err}")))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel::<Result<ExecuteResponse, Status>>(RESPONSE_CHANNEL_CAPACITY);

        let stdout_tx = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        if stdout_tx
                            .send(Ok(ExecuteResponse {
                                output: Some(Output::StdoutChunk(chunk)),
                            }))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let stderr_tx = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        if stderr_tx
                            .send(Ok(ExecuteResponse {
                                output: Some(Output::StderrChunk(chunk)),
                            }))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let stdin_task = AbortOnDrop::new(tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(ExecuteRequest {
                        input: Some(Input::StdinChunk(chunk)),
                    })) => {
                        if stdin.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(_)) => {
                        debug!(code = "unexpected_message_after_init");
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }));

        tokio::spawn(async move {
            // Deadlock avoidance: both pipe readers must observe EOF before we wait()
            // on the child, or a full pipe buffer could block the child indefinitely.
            let _ = tokio::join!(stdout_task, stderr_task);
            let _stdin_task = stdin_task;

            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(1),
                Err(_) => 1,
            };
            info!(code = "execute_exit", exit_code);

            let _ = tx
                .send(Ok(ExecuteResponse {
                    output: Some(Output::ExitCode(exit_code)),
                }))
                .await;
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as ResponseStream))
    }
}
