use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use system_utils::process::run_command_until;
use system_utils::ssh::apply_askpass_env;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::target::{Target, DEFAULT_SSH_PORT};

const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Runs one command on one target and returns what it printed.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, target: &Target, command: &str) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_args: Vec<String>,
    pub ssh_password: Option<String>,
    pub command_timeout: Duration,
}

/// Fetches through the system `ssh` client, so keys come from the user's
/// agent and `~/.ssh/config` applies as usual.
pub struct SshFetcher {
    options: SshOptions,
}

impl SshFetcher {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn build_command(&self, target: &Target, remote_cmd: &str) -> Result<Command, TransportError> {
        let mut cmd = Command::new("ssh");
        if let Some(password) = self.options.ssh_password.as_ref() {
            apply_askpass_env(&mut cmd, password)
                .map_err(|err| TransportError::new(format!("{err:#}")))?;
        }
        cmd.arg("-T");
        for option in ssh_options(self.options.ssh_password.is_some()) {
            cmd.arg("-o").arg(option);
        }
        if target.port != DEFAULT_SSH_PORT {
            cmd.arg("-p").arg(target.port.to_string());
        }
        cmd.args(&self.options.ssh_args);
        cmd.args(&target.ssh_args);
        cmd.arg(target.destination());
        cmd.arg(remote_cmd);
        Ok(cmd)
    }
}

#[async_trait]
impl RemoteFetcher for SshFetcher {
    async fn fetch(&self, target: &Target, command: &str) -> Result<String, TransportError> {
        let host = target.label();
        info!(host = %host, command = %command, "executing remote command");
        let mut cmd = self.build_command(target, command)?;
        let deadline = Instant::now() + self.options.command_timeout;
        let output = run_command_until(&mut cmd, deadline, "ssh command")
            .await
            .map_err(|err| TransportError::new(format!("{err:#}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.code() != Some(255) && is_missing_crontab(&stderr) {
                debug!(host = %host, "remote user has no crontab");
                return Ok(String::new());
            }
            return Err(TransportError::new(describe_failure(
                output.status.code(),
                &stderr,
                self.options.ssh_password.is_some(),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn is_missing_crontab(stderr: &str) -> bool {
    stderr.contains("no crontab for")
}

/// `-o` options for every connection. BatchMode stays off when a password
/// has to reach the askpass helper.
fn ssh_options(has_password: bool) -> Vec<String> {
    let mut options = vec![
        "StrictHostKeyChecking=accept-new".to_string(),
        format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECS}"),
    ];
    if !has_password {
        options.push("BatchMode=yes".to_string());
    }
    options
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureCause {
    SudoNeedsPassword,
    AuthRejected,
}

impl FailureCause {
    fn detect(stderr: &str) -> Option<Self> {
        let stderr = stderr.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|needle| stderr.contains(needle));
        if mentions(&["a password is required", "a terminal is required"]) {
            Some(FailureCause::SudoNeedsPassword)
        } else if mentions(&[
            "permission denied",
            "authentication failed",
            "no supported authentication methods",
            "too many authentication failures",
        ]) {
            Some(FailureCause::AuthRejected)
        } else {
            None
        }
    }

    fn advice(self, has_password: bool) -> &'static str {
        match (self, has_password) {
            (FailureCause::SudoNeedsPassword, _) => {
                "reading another user's crontab needs passwordless `sudo -n crontab -l -u`"
            }
            (FailureCause::AuthRejected, true) => "the configured ssh_password was rejected",
            (FailureCause::AuthRejected, false) => {
                "no usable key; add one to ssh-agent or set ssh_password"
            }
        }
    }
}

fn describe_failure(code: Option<i32>, stderr: &str, has_password: bool) -> String {
    let status = match code {
        Some(code) => format!("exit status {code}"),
        None => "killed by signal".to_string(),
    };
    let stderr = stderr.trim();
    let mut message = if stderr.is_empty() {
        format!("crontab listing failed ({status})")
    } else {
        format!("crontab listing failed ({status}): {stderr}")
    };
    if let Some(cause) = FailureCause::detect(stderr) {
        message.push_str("; ");
        message.push_str(cause.advice(has_password));
    }
    message
}
