use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReportFormat {
    Html,
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "cron-overview",
    version,
    about = "Get an overview about all your cronjobs"
)]
pub(crate) struct Args {
    /// Servers to read, as `host` or `host:port`.
    pub(crate) servers: Vec<String>,
    /// SSH user for login (default: current user).
    #[arg(short = 'u', long)]
    pub(crate) user: Option<String>,
    /// User whose crontab is read (default: the SSH user).
    #[arg(short = 'c', long)]
    pub(crate) cron_user: Option<String>,
    /// Report file, or `-` for stdout.
    #[arg(short = 'o', long, default_value = "output.html")]
    pub(crate) output: PathBuf,
    #[arg(long, value_enum, default_value_t = ReportFormat::Html)]
    pub(crate) format: ReportFormat,
    /// Overall collection deadline, e.g. `5s` or `1m 30s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    /// Maximum number of servers contacted at once.
    #[arg(long)]
    pub(crate) parallelism: Option<usize>,
    /// Leave servers without cron entries out of the report.
    #[arg(long, default_value_t = false)]
    pub(crate) omit_empty: bool,
    /// Stop the whole run when a crontab listing cannot be parsed.
    #[arg(long, default_value_t = false)]
    pub(crate) abort_on_parse_error: bool,
    /// Extra argument for ssh; repeat for several.
    #[arg(long = "ssh-arg", allow_hyphen_values = true)]
    pub(crate) ssh_args: Vec<String>,
    #[arg(long)]
    pub(crate) config: Option<String>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Directory for a daily rolling JSON log.
    #[arg(long)]
    pub(crate) log_dir: Option<String>,
}

impl Args {
    /// Console logs leave stdout when the report is written there.
    pub(crate) fn logs_to_stderr(&self) -> bool {
        self.log_to_stderr || self.output.as_os_str() == "-"
    }
}
