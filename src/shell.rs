use log::{info, warn};
use std::process::Stdio;
use tokio::process::Command;

/// Exit code reported when the shell could not be started at all
const SPAWN_FAILURE_CODE: i64 = 127;

/// Exit code reported when the process was killed by a signal
const SIGNAL_CODE: i64 = -1;

/// The result of executing a command
#[derive(Debug, Eq, PartialEq)]
pub struct ShellOutput {
    pub code: i64,
    /// Interleaved stdout and stderr
    pub output: String,
}

/// Execute a command with the given shell and wait for it to finish
/// Failing to start the shell is reported as a failed execution rather than an error, so that every execution
/// produces an outcome.
pub async fn execute(shell: &str, command: &str) -> ShellOutput {
    info!("Running \"{command}\" with shell \"{shell}\"");

    // Redirect stderr into stdout inside the shell so that both streams share one pipe and keep their relative order
    let script = format!("exec 2>&1\n{command}");
    let mut child = Command::new(shell);
    child
        .args(["-c", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    // A new process group keeps a terminal Ctrl-C meant for the worker from reaching the command
    child.process_group(0);
    let result = child.output().await;

    let output = match result {
        Ok(output) => output,
        Err(err) => {
            warn!("Failed to run command \"{command}\": {err}");
            return ShellOutput {
                code: SPAWN_FAILURE_CODE,
                output: format!("Failed to run command with shell {shell}: {err}"),
            };
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.ends_with('\n') {
        text.pop();
    }

    let code = output.status.code().map_or(SIGNAL_CODE, i64::from);
    if code != 0 {
        warn!("\"{command}\" failed with exit code {code}");
    }
    ShellOutput { code, output: text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success() {
        let output = execute("/bin/sh", "echo hello").await;
        assert_eq!(
            output,
            ShellOutput {
                code: 0,
                output: "hello".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn test_exit_code() {
        let output = execute("/bin/sh", "echo oops; exit 7").await;
        assert_eq!(output.code, 7);
        assert_eq!(output.output, "oops");
    }

    #[tokio::test]
    async fn test_combines_stderr() {
        let output = execute("/bin/sh", "echo out; echo err >&2; echo done").await;
        assert_eq!(output.output, "out\nerr\ndone");
    }

    #[tokio::test]
    async fn test_multiline_command() {
        let output = execute("/bin/sh", "for i in 1 2\ndo echo $i\ndone").await;
        assert_eq!(output.code, 0);
        assert_eq!(output.output, "1\n2");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_own_process_group() {
        // The fifth field of /proc/<pid>/stat is the process group id
        let output = execute("/bin/sh", "echo $$; cut -d ' ' -f 5 /proc/$$/stat").await;
        assert_eq!(output.code, 0);
        let (pid, pgid) = output.output.split_once('\n').unwrap();
        assert_eq!(pid, pgid);
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let output = execute("/nonexistent/shell", "echo hello").await;
        assert_eq!(output.code, SPAWN_FAILURE_CODE);
        assert!(output.output.starts_with("Failed to run command"));
    }
}
