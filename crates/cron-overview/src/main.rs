mod cli;
mod config;
mod logging;
mod render;

use crate::cli::Args;
use crate::config::{current_user, load_file_config, resolve_settings, FileConfig};
use crate::logging::init_tracing;
use crate::render::{render, write_report, ReportMeta};
use clap::Parser;
use crontab_collector::{collect, RunOutcome, RunReport, Severity, SshFetcher};
use std::process::ExitCode;
use std::sync::Arc;
use system_utils::path::expand_tilde;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

const EXIT_SETUP_FAILURE: u8 = 1;
const EXIT_NOTHING_TO_REPORT: u8 = 3;
const EXIT_INCOMPLETE: u8 = 4;
const EXIT_TRANSPORT_FAILURE: u8 = 5;
const EXIT_PARSE_FAILURE: u8 = 6;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_dir = args.log_dir.as_deref().map(expand_tilde);
    let _file_guard = match init_tracing(log_dir.as_deref(), args.logs_to_stderr()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id);
    match run(args, run_id).instrument(span).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "cron-overview failed");
            ExitCode::from(EXIT_SETUP_FAILURE)
        }
    }
}

async fn run(args: Args, run_id: Uuid) -> anyhow::Result<u8> {
    let file = match args.config.as_deref() {
        Some(path) => load_file_config(&expand_tilde(path))?,
        None => FileConfig::default(),
    };
    let settings = resolve_settings(&args, file, current_user())?;
    for target in &settings.targets {
        info!(host = %target.label(), user = %target.crontab_user, "collecting from server");
    }

    let fetcher = Arc::new(SshFetcher::new(settings.ssh.clone()));
    let report = match collect(settings.targets, &settings.collect, fetcher).await {
        Ok(report) => report,
        Err(err) => {
            error!(host = %err.host, error = %err.source, "aborting run, no report written");
            return Ok(EXIT_PARSE_FAILURE);
        }
    };
    info!(
        servers = report.reports.len(),
        entries = report.entry_count(),
        outcome = ?report.outcome,
        "collection finished"
    );

    if report.outcome == RunOutcome::NothingToReport {
        info!("every server was empty, nothing to report");
        return Ok(EXIT_NOTHING_TO_REPORT);
    }

    let contents = render(&report, settings.format, &ReportMeta::new(run_id))?;
    write_report(&settings.output, &contents)?;
    info!(path = %settings.output.display(), "wrote report");
    if report.outcome == RunOutcome::TimedOut {
        warn!(
            received = report.received,
            expected = report.expected,
            "timeout, report is partial"
        );
    }
    for failed in report.failed_targets() {
        warn!(host = %failed.host, status = ?failed.status, "server missing from report");
    }
    Ok(exit_code(&report))
}

fn exit_code(report: &RunReport) -> u8 {
    match (report.outcome, report.worst) {
        (RunOutcome::TimedOut | RunOutcome::Incomplete, _) => EXIT_INCOMPLETE,
        (_, Severity::ParseError) => EXIT_PARSE_FAILURE,
        (_, Severity::TransportError) => EXIT_TRANSPORT_FAILURE,
        (RunOutcome::NothingToReport, Severity::Ok) => EXIT_NOTHING_TO_REPORT,
        (RunOutcome::Complete, Severity::Ok) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn report(outcome: RunOutcome, worst: Severity) -> RunReport {
        RunReport {
            generated_at: NaiveDateTime::parse_from_str("2024-05-10 12:00", "%Y-%m-%d %H:%M")
                .unwrap(),
            expected: 1,
            received: 1,
            outcome,
            worst,
            reports: Vec::new(),
        }
    }

    #[test]
    fn every_outcome_class_has_its_own_exit_code() {
        assert_eq!(exit_code(&report(RunOutcome::Complete, Severity::Ok)), 0);
        assert_eq!(
            exit_code(&report(RunOutcome::NothingToReport, Severity::Ok)),
            EXIT_NOTHING_TO_REPORT
        );
        assert_eq!(
            exit_code(&report(RunOutcome::TimedOut, Severity::Ok)),
            EXIT_INCOMPLETE
        );
        assert_eq!(
            exit_code(&report(RunOutcome::Complete, Severity::TransportError)),
            EXIT_TRANSPORT_FAILURE
        );
        assert_eq!(
            exit_code(&report(RunOutcome::Complete, Severity::ParseError)),
            EXIT_PARSE_FAILURE
        );
    }

    #[test]
    fn timeout_wins_over_target_failures() {
        assert_eq!(
            exit_code(&report(RunOutcome::TimedOut, Severity::ParseError)),
            EXIT_INCOMPLETE
        );
    }
}
