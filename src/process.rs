use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Receives subprocess output as it is produced.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

/// Outcome of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Captured diagnostics, preferring stderr and falling back to stdout.
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

pub fn sink_from_fn<F>(f: F) -> OutputSink
where
    F: Fn(String) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs `command` to completion, handing every stdout/stderr chunk to `sink`
/// while also collecting both streams.
pub async fn run_streaming(
    mut command: Command,
    sink: Option<OutputSink>,
) -> Result<CommandOutput, ProcessError> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let args: Vec<String> = command
        .as_std()
        .get_args()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect();
    tracing::info!("Spawned {} [{}] with PID {:?}", program, args.join(" "), child.id());

    let stdout_task = child
        .stdout
        .take()
        .map(|stream| pump(stream, sink.clone(), program.clone()));
    let stderr_task = child
        .stderr
        .take()
        .map(|stream| pump(stream, sink.clone(), program.clone()));

    let status = child.wait().await.map_err(|source| ProcessError::Io {
        program: program.clone(),
        source,
    })?;

    let stdout = collect(stdout_task, &program).await?;
    let stderr = collect(stderr_task, &program).await?;

    tracing::debug!("{} exited with status {}", program, status);

    Ok(CommandOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

/// Runs `command` without streaming.
pub async fn run_captured(command: Command) -> Result<CommandOutput, ProcessError> {
    run_streaming(command, None).await
}

fn pump<R>(
    mut stream: R,
    sink: Option<OutputSink>,
    program: String,
) -> JoinHandle<Result<String, ProcessError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut pending = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = stream
                .read(&mut buf)
                .await
                .map_err(|source| ProcessError::Io {
                    program: program.clone(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            captured.extend_from_slice(&buf[..read]);
            pending.extend_from_slice(&buf[..read]);

            // Hold back an incomplete trailing UTF-8 sequence until the next read.
            let valid = match std::str::from_utf8(&pending) {
                Ok(_) => pending.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => pending.len(),
            };
            if valid > 0 {
                let chunk: Vec<u8> = pending.drain(..valid).collect();
                if let Some(sink) = &sink {
                    sink(String::from_utf8_lossy(&chunk).into_owned());
                }
            }
        }
        if !pending.is_empty() {
            if let Some(sink) = &sink {
                sink(String::from_utf8_lossy(&pending).into_owned());
            }
        }
        Ok(String::from_utf8_lossy(&captured).into_owned())
    })
}

async fn collect(
    task: Option<JoinHandle<Result<String, ProcessError>>>,
    program: &str,
) -> Result<String, ProcessError> {
    match task {
        Some(handle) => handle.await.map_err(|e| ProcessError::Io {
            program: program.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?,
        None => Ok(String::new()),
    }
}
