use std::process::{Output, Stdio};

use anyhow::Context;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};

/// Runs `cmd` to completion, collecting stdout and stderr, unless `deadline`
/// passes first. A child still running at the deadline is killed.
pub async fn run_command_until(
    cmd: &mut Command,
    deadline: Instant,
    label: &str,
) -> anyhow::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd
        .spawn()
        .with_context(|| format!("{label} failed to start"))?;
    match timeout_at(deadline, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("{label} failed")),
        Err(_) => anyhow::bail!("{label} did not finish before the deadline"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf out; printf err >&2; exit 3");
        let output = run_command_until(&mut cmd, Instant::now() + Duration::from_secs(10), "sh")
            .await
            .expect("output");
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr, b"err");
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn gives_up_at_the_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command_until(&mut cmd, Instant::now() + Duration::from_millis(50), "sleep")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn reports_missing_binaries() {
        let mut cmd = Command::new("definitely-not-a-real-binary-name");
        let err = run_command_until(&mut cmd, Instant::now() + Duration::from_secs(1), "probe")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("probe failed to start"));
    }
}
