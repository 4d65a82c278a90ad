//! Short-lived subprocesses with a wall-clock budget.

use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::TranscodeError;

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run `command` to completion, killing it once `budget` has elapsed.
///
/// Both pipes are drained concurrently with the wait, so a chatty child
/// can never block on a full pipe. The whole exchange runs under a single
/// `tokio::time::timeout`; when it fires the child is killed and reaped.
/// Must not be called from async code; the handlers call it from
/// blocking workers.
///
/// # Errors
///
/// [`TranscodeError::Spawn`] if the program cannot be started and
/// [`TranscodeError::Timeout`] if it does not finish within `budget`.
pub fn run_with_timeout(
    command: Command,
    budget: Duration,
) -> Result<ProcessOutput, TranscodeError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(command, budget))
}

async fn run(command: Command, budget: Duration) -> Result<ProcessOutput, TranscodeError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut command = tokio::process::Command::from(command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TranscodeError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = tokio::time::timeout(budget, async {
        let (stdout, stderr) = tokio::join!(
            drain(stdout, "stdout", &program),
            drain(stderr, "stderr", &program)
        );
        let status = child.wait().await?;
        Ok::<_, std::io::Error>(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    })
    .await;

    match finished {
        Ok(output) => Ok(output?),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %program, error = %e, "Could not kill subprocess");
            }
            tracing::warn!(
                program = %program,
                budget_ms = budget.as_millis() as u64,
                "Subprocess killed after timeout"
            );
            Err(TranscodeError::Timeout { program, budget })
        }
    }
}

async fn drain<R>(pipe: Option<R>, stream: &'static str, program: &str) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(program, stream, error = %e, "Could not read subprocess output");
        }
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_collects_output() {
        let out = run_with_timeout(shell("echo hello; echo oops >&2"), Duration::from_secs(5))
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr_text(), "oops");
    }

    #[test]
    fn test_nonzero_exit_is_reported_in_status() {
        let out = run_with_timeout(shell("exit 3"), Duration::from_secs(5)).unwrap();
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn test_slow_child_is_killed() {
        let started = Instant::now();
        let err = run_with_timeout(shell("sleep 30"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TranscodeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_child_that_keeps_pipes_open_is_killed() {
        // The background sleeper inherits stdout, so the pipe stays open
        // after the shell itself would have exited.
        let started = Instant::now();
        let err = run_with_timeout(shell("sleep 30 & echo started"), Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_runs_inside_blocking_worker() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let out = runtime
            .block_on(runtime.spawn_blocking(|| {
                run_with_timeout(shell("echo worker"), Duration::from_secs(5))
            }))
            .unwrap()
            .unwrap();
        assert_eq!(out.stdout, b"worker\n");
    }

    #[test]
    fn test_missing_program() {
        let err = run_with_timeout(
            Command::new("/nonexistent/tivolink-probe"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { .. }));
    }
}
