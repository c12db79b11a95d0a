//! Streaming subprocess execution.

use super::command::CompilerInvocation;
use crate::packager::error::{Error, Result};
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a streamed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// Exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    /// Killed after cancellation
    Cancelled,
}

enum Event {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Runs `invocation`, handing every line of the merged stdout/stderr stream
/// to `on_line` as it arrives.
///
/// Both pipes are drained by a dedicated reader task while the process runs.
/// After exit the caller waits for the reader to finish before returning, so
/// `on_line` has seen every line once this resolves.
///
/// # Arguments
///
/// * `invocation` - Program, arguments and working directory
/// * `path` - Replacement PATH for the child, if any
/// * `cancel` - Kills the child when triggered
/// * `on_line` - Line sink, called in arrival order
pub async fn run_streaming(
    invocation: &CompilerInvocation,
    path: Option<OsString>,
    cancel: &CancellationToken,
    mut on_line: impl FnMut(String),
) -> Result<RunResult> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = path {
        command.env("PATH", path);
    }

    let mut child = command.spawn().map_err(|error| Error::CommandFailed {
        command: invocation.command_line(),
        error,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let reader = tokio::spawn(async move {
        tokio::join!(pump(stdout, tx.clone()), pump(stderr, tx));
    });

    let event = loop {
        tokio::select! {
            Some(line) = rx.recv() => on_line(line),
            status = child.wait() => break Event::Exited(status),
            _ = cancel.cancelled() => break Event::Cancelled,
        }
    };

    match event {
        Event::Cancelled => {
            log::info!("cancelling {}", invocation.program.display());
            if let Err(e) = child.kill().await {
                log::warn!("failed to kill {}: {}", invocation.program.display(), e);
            }
            reader.abort();
            Ok(RunResult::Cancelled)
        }
        Event::Exited(status) => {
            let status = status.map_err(|error| Error::CommandFailed {
                command: invocation.command_line(),
                error,
            })?;
            reader.await?;
            while let Some(line) = rx.recv().await {
                on_line(line);
            }
            log::debug!("{} exited with {}", invocation.program.display(), status);
            Ok(RunResult::Exited(status.code()))
        }
    }
}

/// Forwards lines from one pipe. Invalid UTF-8 is replaced, not fatal.
async fn pump<R: AsyncRead + Unpin>(stream: Option<R>, tx: mpsc::UnboundedSender<String>) {
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                log::warn!("error reading compiler output: {}", e);
                break;
            }
        }
    }
}
