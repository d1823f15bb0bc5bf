//! External process runner
//!
//! Both output streams are drained by their own tasks from the moment the
//! child is spawned, so a chatty tool can never stall on a full pipe while
//! the runner waits for it to exit.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// Outcome of one external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// The process exited and both streams closed before the deadline
    pub completed: bool,
    /// Exit code; -1 when the process did not complete or was signalled
    pub exit_code: i32,
    /// Stdout and stderr combined; each stream keeps its own order
    pub output: String,
}

impl ProcessResult {
    /// Completed with exit code zero
    pub fn succeeded(&self) -> bool {
        self.completed && self.exit_code == 0
    }

    fn not_completed(output: String) -> Self {
        Self {
            completed: false,
            exit_code: -1,
            output,
        }
    }
}

/// Runs one external process with a hard deadline
///
/// Single use: [`execute`](Self::execute) consumes the runner.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    /// Create a runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the process in `dir`
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run `command` with `args`, killing it if it outlives `timeout`
    ///
    /// Never fails: launch failures and timeouts come back as a result with
    /// `completed == false`.
    pub async fn execute<I, S>(self, command: impl AsRef<OsStr>, args: I, timeout: Duration) -> ProcessResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let command = command.as_ref();
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = ?command, error = %e, "failed to launch process");
                return ProcessResult::not_completed(format!(
                    "Failed to launch {}: {}",
                    command.to_string_lossy(),
                    e
                ));
            }
        };
        debug!(command = ?command, pid = child.id(), "process started");

        let output = Arc::new(Mutex::new(String::new()));
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, output.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, output.clone())));
        }

        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
            status
        })
        .await;

        match finished {
            Ok(Ok(status)) => ProcessResult {
                completed: true,
                exit_code: status.code().unwrap_or(-1),
                output: collected(&output),
            },
            Ok(Err(e)) => {
                let mut text = collected(&output);
                text.push_str(&format!("Failed to wait for process: {}\n", e));
                ProcessResult::not_completed(text)
            }
            Err(_) => {
                debug!(command = ?command, timeout_ms = timeout.as_millis() as u64, "process timed out, killing");
                let _ = child.kill().await;
                for reader in &readers {
                    reader.abort();
                }
                ProcessResult::not_completed(collected(&output))
            }
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(stream: R, sink: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(stream);
    let mut chunk = Vec::new();
    loop {
        chunk.clear();
        match reader.read_until(b'\n', &mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if let Ok(mut out) = sink.lock() {
                    out.push_str(&String::from_utf8_lossy(&chunk));
                }
            }
        }
    }
}

fn collected(output: &Arc<Mutex<String>>) -> String {
    output.lock().map(|o| o.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn shell(script: &str) -> (&'static str, Vec<String>) {
        ("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(windows)]
    fn shell(script: &str) -> (&'static str, Vec<String>) {
        ("cmd", vec!["/C".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_exit_code_and_output() {
        let (cmd, args) = shell("echo packed && echo warning 1>&2 && exit 3");
        let result = ProcessRunner::new()
            .execute(cmd, &args, Duration::from_secs(30))
            .await;

        assert!(result.completed);
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("packed"));
        assert!(result.output.contains("warning"));
        assert!(!result.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (cmd, args) = shell("echo started; sleep 30");
        let start = std::time::Instant::now();
        let result = ProcessRunner::new()
            .execute(cmd, &args, Duration::from_millis(500))
            .await;

        assert!(!result.completed);
        assert_eq!(result.exit_code, -1);
        assert!(result.output.contains("started"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_nonexistent_command() {
        let result = ProcessRunner::new()
            .execute(
                "rebundle-definitely-not-a-real-tool",
                ["bundle"],
                Duration::from_secs(5),
            )
            .await;

        assert!(!result.completed);
        assert!(result.output.contains("Failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_does_not_deadlock() {
        let (cmd, args) = shell("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done; exit 0");
        let result = ProcessRunner::new()
            .execute(cmd, &args, Duration::from_secs(60))
            .await;

        assert!(result.succeeded());
        assert!(result.output.contains("line-19999"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_working_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();
        let (cmd, args) = shell("cat marker.txt");
        let result = ProcessRunner::new()
            .current_dir(temp.path())
            .execute(cmd, &args, Duration::from_secs(30))
            .await;

        assert!(result.succeeded());
        assert!(result.output.contains("here"));
    }
}
