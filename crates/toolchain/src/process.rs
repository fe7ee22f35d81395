use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::types::{OutputSource, ToolError};

/// Exit status and captured streams of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Captured text selected by `source`, decoded lossily.
    pub fn text(&self, source: OutputSource) -> String {
        match source {
            OutputSource::Stdout => String::from_utf8_lossy(&self.stdout).into_owned(),
            OutputSource::Stderr => String::from_utf8_lossy(&self.stderr).into_owned(),
            OutputSource::Both => {
                let mut bytes = self.stdout.clone();
                bytes.extend_from_slice(&self.stderr);
                String::from_utf8_lossy(&bytes).into_owned()
            }
        }
    }

    /// Last few lines of stderr, for log messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let all: Vec<&str> = text.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Run `argv` in `cwd` and wait at most `timeout` for it to exit.
///
/// Returns `Ok(None)` when the time limit expires. The child is spawned with
/// `kill_on_drop`, so abandoning the wait on timeout also kills it.
/// `stdin` is resolved relative to `cwd`; without it the child reads from
/// an empty stream.
pub async fn run_with_timeout(
    argv: &[String],
    cwd: &Path,
    stdin: Option<&Path>,
    timeout: Duration,
) -> Result<Option<ProcessOutput>, ToolError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ToolError::Config("command with empty argv".into()))?;

    let stdin = match stdin {
        Some(path) => Stdio::from(std::fs::File::open(cwd.join(path))?),
        None => Stdio::null(),
    };

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::trace!(program = %program, args = ?args, cwd = %cwd.display(), "Spawned command");

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(Some(ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })),
        Ok(Err(e)) => Err(ToolError::Io(e)),
        Err(_) => {
            tracing::debug!(
                program = %program,
                timeout_secs = timeout.as_secs(),
                "Command timed out, killing"
            );
            Ok(None)
        }
    }
}
