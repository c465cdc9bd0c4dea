//! External command execution
//!
//! Every subprocess (shell steps, package managers, container engine) runs
//! through [`run`]: the command line is logged, stdout and stderr are streamed
//! to the log line by line and kept for error reports.

use crate::error::{PackError, PackResult};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Raw output captured from a successful command
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    /// Stdout decoded as UTF-8, invalid sequences replaced
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Render a command as a shell-quoted line for logs and errors
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    let mut words: Vec<String> = vec![lossy(std.get_program())];
    words.extend(std.get_args().map(lossy));
    shell_words::join(words)
}

fn lossy(s: &OsStr) -> String {
    s.to_string_lossy().into_owned()
}

/// Run a command to completion, failing on a non-zero exit status
pub async fn run(mut command: Command) -> PackResult<Captured> {
    let shown = describe(&command);
    info!("> {}", shown);

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| PackError::CommandSpawn {
        command: shown.clone(),
        source: e,
    })?;

    let captured = stream_child_output(&mut child)
        .await
        .map_err(|e| PackError::io(format!("reading output of {}", shown), e))?;
    let status = child
        .wait()
        .await
        .map_err(|e| PackError::io(format!("waiting for {}", shown), e))?;

    debug!("exit_code: {:?}", status.code());
    if !status.success() {
        return Err(PackError::command_failed(
            shown,
            status.code().unwrap_or(-1),
            &captured.stdout,
            &captured.stderr,
        ));
    }
    Ok(captured)
}

/// Drain stdout and stderr of a child until both reach EOF, logging each
/// line as it arrives. Bytes are kept as produced.
async fn stream_child_output(child: &mut Child) -> std::io::Result<Captured> {
    let mut captured = Captured::default();

    let mut stdout = child.stdout.take().map(BufReader::new);
    let mut stderr = child.stderr.take().map(BufReader::new);
    let mut out_line = Vec::new();
    let mut err_line = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = next_line(&mut stdout, &mut out_line), if stdout.is_some() => {
                if read? == 0 {
                    stdout = None;
                } else {
                    log_line(&out_line);
                    captured.stdout.append(&mut out_line);
                }
            }
            read = next_line(&mut stderr, &mut err_line), if stderr.is_some() => {
                if read? == 0 {
                    stderr = None;
                } else {
                    log_line(&err_line);
                    captured.stderr.append(&mut err_line);
                }
            }
        }
    }

    Ok(captured)
}

/// Read up to and including the next newline; 0 means EOF
async fn next_line<R>(reader: &mut Option<BufReader<R>>, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => Ok(0),
    }
}

fn log_line(line: &[u8]) {
    debug!("{}", String::from_utf8_lossy(line).trim_end_matches(['\r', '\n']));
}
