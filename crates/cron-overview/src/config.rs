use anyhow::Context;
use crontab_collector::{
    CollectConfig, ParseFailurePolicy, SshOptions, Target, DEFAULT_DEADLINE, DEFAULT_PARALLELISM,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::cli::{Args, ReportFormat};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) defaults: FileDefaults,
    #[serde(default)]
    pub(crate) targets: Vec<TargetConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileDefaults {
    pub(crate) user: Option<String>,
    pub(crate) cron_user: Option<String>,
    pub(crate) timeout: Option<String>,
    pub(crate) parallelism: Option<usize>,
    pub(crate) omit_empty: Option<bool>,
    pub(crate) abort_on_parse_error: Option<bool>,
    pub(crate) ssh_args: Option<Vec<String>>,
    pub(crate) ssh_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TargetConfig {
    pub(crate) host: String,
    pub(crate) user: Option<String>,
    pub(crate) cron_user: Option<String>,
    pub(crate) ssh_args: Option<Vec<String>>,
}

/// Everything one run needs, with command line values taking precedence over
/// the config file.
#[derive(Debug)]
pub(crate) struct RunSettings {
    pub(crate) targets: Vec<Target>,
    pub(crate) collect: CollectConfig,
    pub(crate) ssh: SshOptions,
    pub(crate) output: PathBuf,
    pub(crate) format: ReportFormat,
}

pub(crate) fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

pub(crate) fn current_user() -> Option<String> {
    ["USER", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|user| !user.trim().is_empty())
}

pub(crate) fn resolve_settings(
    args: &Args,
    file: FileConfig,
    fallback_user: Option<String>,
) -> anyhow::Result<RunSettings> {
    let defaults = file.defaults;
    let login_user = args
        .user
        .clone()
        .or(defaults.user)
        .or(fallback_user)
        .ok_or_else(|| anyhow::anyhow!("cannot determine the ssh user, pass --user"))?;
    let cron_user = args.cron_user.clone().or(defaults.cron_user);

    let mut targets = Vec::new();
    for (index, target) in file.targets.into_iter().enumerate() {
        let user = target.user.as_deref().unwrap_or(&login_user);
        let parsed = Target::parse(
            &target.host,
            user,
            target.cron_user.as_deref().or(cron_user.as_deref()),
        )
        .with_context(|| format!("invalid targets[{index}]"))?;
        targets.push(parsed.with_ssh_args(target.ssh_args.unwrap_or_default()));
    }
    for server in &args.servers {
        targets.push(Target::parse(server, &login_user, cron_user.as_deref())?);
    }
    let targets = dedup_targets(targets);
    if targets.is_empty() {
        anyhow::bail!("no servers given; pass them as arguments or list [[targets]] in --config");
    }

    let deadline = match (args.timeout, defaults.timeout) {
        (Some(timeout), _) => timeout,
        (None, Some(raw)) => humantime::parse_duration(&raw)
            .with_context(|| format!("invalid defaults.timeout '{raw}'"))?,
        (None, None) => DEFAULT_DEADLINE,
    };
    if deadline.is_zero() {
        anyhow::bail!("timeout must be greater than zero");
    }
    let parallelism = args
        .parallelism
        .or(defaults.parallelism)
        .unwrap_or(DEFAULT_PARALLELISM);
    if parallelism == 0 {
        anyhow::bail!("parallelism must be at least 1");
    }
    let on_parse_failure = if args.abort_on_parse_error || defaults.abort_on_parse_error == Some(true) {
        ParseFailurePolicy::Abort
    } else {
        ParseFailurePolicy::Record
    };

    let mut ssh_args = defaults.ssh_args.unwrap_or_default();
    ssh_args.extend(args.ssh_args.iter().cloned());

    Ok(RunSettings {
        targets,
        collect: CollectConfig {
            deadline,
            parallelism,
            omit_empty: args.omit_empty || defaults.omit_empty == Some(true),
            on_parse_failure,
        },
        ssh: SshOptions {
            ssh_args,
            ssh_password: defaults.ssh_password,
            command_timeout: deadline,
        },
        output: args.output.clone(),
        format: args.format,
    })
}

fn dedup_targets(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        let key = (target.label(), target.crontab_user.clone());
        if seen.insert(key) {
            unique.push(target);
        } else {
            tracing::warn!(host = %target.label(), "duplicate target ignored");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["cron-overview"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).expect("args")
    }

    #[test]
    fn cli_servers_use_current_user_by_default() {
        let settings = resolve_settings(
            &args(&["a.example.com", "b.example.com"]),
            FileConfig::default(),
            Some("dex".to_string()),
        )
        .expect("settings");
        assert_eq!(settings.targets.len(), 2);
        assert!(settings.targets.iter().all(|t| t.login_user == "dex"));
        assert!(settings.targets.iter().all(|t| !t.needs_elevation()));
        assert_eq!(settings.collect.deadline, DEFAULT_DEADLINE);
        assert_eq!(settings.collect.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(settings.collect.on_parse_failure, ParseFailurePolicy::Record);
        assert_eq!(settings.ssh.command_timeout, DEFAULT_DEADLINE);
    }

    #[test]
    fn file_targets_and_defaults_merge_with_cli() {
        let file: FileConfig = toml::from_str(
            r#"
[defaults]
user = "ops"
cron_user = "www-data"
timeout = "30s"
parallelism = 4
omit_empty = true
ssh_args = ["-o", "Compression=yes"]

[[targets]]
host = "db.example.com:2222"
user = "dba"
cron_user = "postgres"
ssh_args = ["-J", "bastion"]

[[targets]]
host = "web.example.com"
"#,
        )
        .expect("config");
        let settings = resolve_settings(
            &args(&["--parallelism", "8", "--ssh-arg", "-4", "cache.example.com"]),
            file,
            Some("dex".to_string()),
        )
        .expect("settings");

        let labels: Vec<String> = settings.targets.iter().map(Target::label).collect();
        assert_eq!(
            labels,
            vec!["db.example.com:2222", "web.example.com", "cache.example.com"]
        );
        let db = &settings.targets[0];
        assert_eq!(db.login_user, "dba");
        assert_eq!(db.crontab_user, "postgres");
        assert_eq!(db.ssh_args, vec!["-J", "bastion"]);
        let web = &settings.targets[1];
        assert_eq!(web.login_user, "ops");
        assert_eq!(web.crontab_user, "www-data");

        assert_eq!(settings.collect.deadline, Duration::from_secs(30));
        assert_eq!(settings.collect.parallelism, 8);
        assert!(settings.collect.omit_empty);
        assert_eq!(settings.ssh.ssh_args, vec!["-o", "Compression=yes", "-4"]);
    }

    #[test]
    fn duplicate_servers_are_collected_once() {
        let settings = resolve_settings(
            &args(&["a.example.com", "a.example.com:22", "a.example.com:2222"]),
            FileConfig::default(),
            Some("dex".to_string()),
        )
        .expect("settings");
        assert_eq!(settings.targets.len(), 2);
    }

    #[test]
    fn rejects_missing_targets_user_and_bad_values() {
        assert!(resolve_settings(&args(&[]), FileConfig::default(), Some("dex".to_string())).is_err());
        assert!(resolve_settings(&args(&["host"]), FileConfig::default(), None).is_err());
        assert!(resolve_settings(
            &args(&["--parallelism", "0", "host"]),
            FileConfig::default(),
            Some("dex".to_string())
        )
        .is_err());
        let file: FileConfig = toml::from_str("[defaults]\ntimeout = \"soon\"\n").expect("config");
        assert!(resolve_settings(&args(&["host"]), file, Some("dex".to_string())).is_err());
    }

    #[test]
    fn abort_flag_switches_parse_policy() {
        let settings = resolve_settings(
            &args(&["--abort-on-parse-error", "host"]),
            FileConfig::default(),
            Some("dex".to_string()),
        )
        .expect("settings");
        assert_eq!(settings.collect.on_parse_failure, ParseFailurePolicy::Abort);
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let parsed: Result<FileConfig, _> = toml::from_str("[defaults]\nusr = \"dex\"\n");
        assert!(parsed.is_err());
    }
}
