use chrono::NaiveDateTime;
use crontab_grammar::{parse_crontab, GrammarError, NextRun};
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{CollectConfig, ParseFailurePolicy};
use crate::dispatcher::RawResult;
use crate::report::{RunOutcome, RunReport, Severity, TargetReport, TargetStatus};

/// A listing the grammar rejected while the run was set to abort on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalParseError {
    pub host: String,
    pub source: GrammarError,
}

impl fmt::Display for FatalParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crontab format of {} could not be detected: {}", self.host, self.source)
    }
}

impl std::error::Error for FatalParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Collecting,
    Complete,
}

enum Termination {
    AllReceived,
    DeadlineElapsed,
    ChannelClosed,
}

/// Sole owner of the collection state. Results are applied one at a time in
/// arrival order; ordering by host happens only when the run is finalized.
pub struct Aggregator {
    expected: usize,
    received: usize,
    omit_empty: bool,
    on_parse_failure: ParseFailurePolicy,
    reference: NaiveDateTime,
    worst: Severity,
    reports: Vec<TargetReport>,
}

impl Aggregator {
    pub fn new(expected: usize, config: &CollectConfig, reference: NaiveDateTime) -> Self {
        Self {
            expected,
            received: 0,
            omit_empty: config.omit_empty,
            on_parse_failure: config.on_parse_failure,
            reference,
            worst: Severity::Ok,
            reports: Vec::with_capacity(expected),
        }
    }

    pub fn progress(&self) -> Progress {
        if self.received >= self.expected {
            Progress::Complete
        } else {
            Progress::Collecting
        }
    }

    pub fn accept(&mut self, raw: RawResult) -> Result<Progress, FatalParseError> {
        let RawResult { target, output } = raw;
        let host = target.label();
        if self.progress() == Progress::Complete {
            debug!(host = %host, "result beyond the expected count ignored");
            return Ok(Progress::Complete);
        }
        self.received += 1;

        let report = match output {
            Err(err) => {
                warn!(host = %host, error = %err, "failed to fetch crontab");
                TargetReport::failed(
                    &target,
                    TargetStatus::TransportError {
                        message: err.to_string(),
                    },
                )
            }
            Ok(raw_text) => match parse_crontab(&raw_text, self.reference) {
                Ok(entries) => {
                    for entry in &entries {
                        if entry.next_run == NextRun::NoOccurrence {
                            warn!(host = %host, schedule = %entry.schedule, "schedule never fires");
                        }
                    }
                    info!(host = %host, entries = entries.len(), "collected crontab");
                    TargetReport::collected(&target, entries)
                }
                Err(err) if self.on_parse_failure == ParseFailurePolicy::Abort => {
                    error!(host = %host, error = %err, "crontab format could not be detected");
                    return Err(FatalParseError { host, source: err });
                }
                Err(err) => {
                    warn!(host = %host, error = %err, "crontab format could not be detected");
                    TargetReport::failed(
                        &target,
                        TargetStatus::ParseError {
                            line: err.line(),
                            message: err.to_string(),
                        },
                    )
                }
            },
        };

        self.worst = self.worst.max(report.status.severity());
        if self.omit_empty && report.status.is_ok() && report.entries.is_empty() {
            info!(host = %host, "omitting target without entries");
        } else {
            self.reports.push(report);
        }
        Ok(self.progress())
    }

    /// Consumes results until every target has answered or `deadline`
    /// passes, whichever comes first.
    pub async fn run(
        mut self,
        mut results: mpsc::Receiver<RawResult>,
        deadline: Instant,
    ) -> Result<RunReport, FatalParseError> {
        if self.progress() == Progress::Complete {
            return Ok(self.finish(Termination::AllReceived));
        }
        let timer = sleep_until(deadline);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => {
                    warn!(
                        received = self.received,
                        expected = self.expected,
                        "deadline elapsed before every target answered"
                    );
                    return Ok(self.finish(Termination::DeadlineElapsed));
                }
                result = results.recv() => match result {
                    Some(raw) => {
                        if self.accept(raw)? == Progress::Complete {
                            return Ok(self.finish(Termination::AllReceived));
                        }
                    }
                    None => {
                        warn!(
                            received = self.received,
                            expected = self.expected,
                            "collection workers stopped early"
                        );
                        return Ok(self.finish(Termination::ChannelClosed));
                    }
                },
            }
        }
    }

    fn finish(mut self, termination: Termination) -> RunReport {
        self.reports
            .sort_by(|a, b| (&a.host, &a.user).cmp(&(&b.host, &b.user)));
        let outcome = match termination {
            Termination::DeadlineElapsed => RunOutcome::TimedOut,
            Termination::ChannelClosed => RunOutcome::Incomplete,
            Termination::AllReceived if self.reports.is_empty() => RunOutcome::NothingToReport,
            Termination::AllReceived => RunOutcome::Complete,
        };
        RunReport {
            generated_at: self.reference,
            expected: self.expected,
            received: self.received,
            outcome,
            worst: self.worst,
            reports: self.reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{RemoteFetcher, TransportError};
    use crate::target::Target;
    use crate::{collect, Dispatcher};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone)]
    enum Reply {
        Listing(&'static str),
        Refused,
    }

    struct ScriptedFetcher {
        replies: HashMap<String, (Duration, Reply)>,
    }

    impl ScriptedFetcher {
        fn new(replies: &[(&str, u64, Reply)]) -> Arc<Self> {
            let replies = replies
                .iter()
                .map(|(host, secs, reply)| {
                    (host.to_string(), (Duration::from_secs(*secs), reply.clone()))
                })
                .collect();
            Arc::new(Self { replies })
        }
    }

    #[async_trait]
    impl RemoteFetcher for ScriptedFetcher {
        async fn fetch(&self, target: &Target, _command: &str) -> Result<String, TransportError> {
            let (delay, reply) = self
                .replies
                .get(&target.host)
                .cloned()
                .unwrap_or((Duration::ZERO, Reply::Refused));
            tokio::time::sleep(delay).await;
            match reply {
                Reply::Listing(text) => Ok(text.to_string()),
                Reply::Refused => Err(TransportError::new("failed to connect: connection refused")),
            }
        }
    }

    fn reference() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-05-10 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn target(host: &str) -> Target {
        Target::parse(host, "dex", None).unwrap()
    }

    fn targets(hosts: &[&str]) -> Vec<Target> {
        hosts.iter().map(|host| target(host)).collect()
    }

    fn raw(host: &str, text: &str) -> RawResult {
        RawResult {
            target: target(host),
            output: Ok(text.to_string()),
        }
    }

    fn hosts(report: &RunReport) -> Vec<&str> {
        report.reports.iter().map(|r| r.host.as_str()).collect()
    }

    async fn run_with(
        fetcher: Arc<ScriptedFetcher>,
        hosts: &[&str],
        config: &CollectConfig,
    ) -> Result<RunReport, FatalParseError> {
        let aggregator = Aggregator::new(hosts.len(), config, reference());
        let results = Dispatcher::new(fetcher, config.parallelism)
            .dispatch(targets(hosts), CancellationToken::new());
        aggregator
            .run(results, Instant::now() + config.deadline)
            .await
    }

    #[test]
    fn same_host_reports_are_ordered_by_user() {
        let mut aggregator = Aggregator::new(2, &CollectConfig::default(), reference());
        for user in ["www-data", "backup"] {
            let raw = RawResult {
                target: Target::parse("a", "dex", Some(user)).unwrap(),
                output: Ok(String::new()),
            };
            aggregator.accept(raw).unwrap();
        }
        let report = aggregator.finish(Termination::AllReceived);
        let users: Vec<&str> = report.reports.iter().map(|r| r.user.as_str()).collect();
        assert_eq!(users, vec!["backup", "www-data"]);
    }

    #[test]
    fn accept_counts_results_until_complete() {
        let mut aggregator = Aggregator::new(2, &CollectConfig::default(), reference());
        assert_eq!(aggregator.progress(), Progress::Collecting);
        assert_eq!(
            aggregator.accept(raw("b", "0 3 * * 1 uname -a\n")),
            Ok(Progress::Collecting)
        );
        assert_eq!(aggregator.accept(raw("a", "")), Ok(Progress::Complete));
        assert_eq!(aggregator.accept(raw("c", "")), Ok(Progress::Complete));

        let report = aggregator.finish(Termination::AllReceived);
        assert_eq!(report.received, 2);
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(hosts(&report), vec!["a", "b"]);
        assert_eq!(report.entry_count(), 1);
    }

    #[test]
    fn omitting_every_target_means_nothing_to_report() {
        let config = CollectConfig {
            omit_empty: true,
            ..CollectConfig::default()
        };
        let mut aggregator = Aggregator::new(2, &config, reference());
        aggregator.accept(raw("a", "# empty\n")).unwrap();
        aggregator.accept(raw("b", "")).unwrap();
        let report = aggregator.finish(Termination::AllReceived);
        assert_eq!(report.outcome, RunOutcome::NothingToReport);
        assert_eq!(report.received, 2);
        assert!(report.reports.is_empty());
    }

    #[test]
    fn transport_failures_stay_visible_even_when_omitting_empty() {
        let config = CollectConfig {
            omit_empty: true,
            ..CollectConfig::default()
        };
        let mut aggregator = Aggregator::new(1, &config, reference());
        aggregator
            .accept(RawResult {
                target: target("down"),
                output: Err(TransportError::new("failed to connect")),
            })
            .unwrap();
        let report = aggregator.finish(Termination::AllReceived);
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.worst, Severity::TransportError);
        assert_eq!(report.failed_targets().count(), 1);
    }

    #[test]
    fn parse_failures_are_recorded_by_default() {
        let mut aggregator = Aggregator::new(2, &CollectConfig::default(), reference());
        aggregator.accept(raw("bad", "0 3 * * 1\n")).unwrap();
        aggregator.accept(raw("good", "@daily uname -a\n")).unwrap();
        let report = aggregator.finish(Termination::AllReceived);
        assert_eq!(report.worst, Severity::ParseError);
        assert_eq!(
            report.reports[0].status,
            TargetStatus::ParseError {
                line: 1,
                message: "line 1: schedule '0 3 * * 1' has no command".to_string()
            }
        );
        assert_eq!(report.reports[1].entries.len(), 1);
    }

    #[test]
    fn parse_failures_abort_when_configured() {
        let config = CollectConfig {
            on_parse_failure: ParseFailurePolicy::Abort,
            ..CollectConfig::default()
        };
        let mut aggregator = Aggregator::new(2, &config, reference());
        let err = aggregator.accept(raw("bad", "99 * * * * x\n")).unwrap_err();
        assert_eq!(err.host, "bad");
        assert_eq!(err.source.line(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_targets_answer_before_the_deadline() {
        let fetcher = ScriptedFetcher::new(&[
            ("c", 1, Reply::Listing("0 3 * * 1 uname -a\n")),
            ("a", 2, Reply::Listing("@daily uname -a\n*/15 4-16 * * 6,7 ./do.sh\n")),
            ("b", 0, Reply::Listing("# none\n")),
        ]);
        let report = run_with(fetcher, &["c", "a", "b"], &CollectConfig::default())
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.worst, Severity::Ok);
        assert_eq!(hosts(&report), vec!["a", "b", "c"]);
        assert_eq!(report.reports[0].entries.len(), 2);
        assert_eq!(report.reports[0].entries[0].schedule, "@daily");
        assert_eq!(report.reports[0].entries[1].command, "./do.sh");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_keeps_only_the_targets_that_answered() {
        let fetcher = ScriptedFetcher::new(&[
            ("fast", 1, Reply::Listing("0 3 * * 1 uname -a\n")),
            ("slow", 30, Reply::Listing("0 3 * * 1 uname -a\n")),
            ("slower", 60, Reply::Listing("0 3 * * 1 uname -a\n")),
        ]);
        let config = CollectConfig {
            deadline: Duration::from_secs(5),
            ..CollectConfig::default()
        };
        let report = run_with(fetcher, &["slow", "fast", "slower"], &config)
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::TimedOut);
        assert_eq!(report.received, 1);
        assert_eq!(report.expected, 3);
        assert_eq!(hosts(&report), vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_do_not_stop_other_targets() {
        let fetcher = ScriptedFetcher::new(&[
            ("up", 1, Reply::Listing("0 3 * * 1 uname -a\n")),
            ("down", 0, Reply::Refused),
        ]);
        let report = run_with(fetcher, &["up", "down"], &CollectConfig::default())
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.worst, Severity::TransportError);
        assert_eq!(hosts(&report), vec!["down", "up"]);
        assert!(matches!(
            report.reports[0].status,
            TargetStatus::TransportError { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_parse_failure_ends_the_run() {
        let fetcher = ScriptedFetcher::new(&[
            ("bad", 0, Reply::Listing("0 3 * * 1\n")),
            ("good", 10, Reply::Listing("0 3 * * 1 uname -a\n")),
        ]);
        let config = CollectConfig {
            deadline: Duration::from_secs(30),
            on_parse_failure: ParseFailurePolicy::Abort,
            ..CollectConfig::default()
        };
        let err = run_with(fetcher, &["good", "bad"], &config)
            .await
            .unwrap_err();
        assert_eq!(err.host, "bad");
    }

    #[tokio::test(start_paused = true)]
    async fn omitted_targets_still_count_towards_completion() {
        let fetcher = ScriptedFetcher::new(&[
            ("empty", 0, Reply::Listing("")),
            ("busy", 1, Reply::Listing("@hourly /usr/bin/true\n")),
        ]);
        let config = CollectConfig {
            omit_empty: true,
            ..CollectConfig::default()
        };
        let report = run_with(fetcher, &["empty", "busy"], &config)
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.received, 2);
        assert_eq!(hosts(&report), vec!["busy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_wires_dispatcher_and_aggregator() {
        let fetcher = ScriptedFetcher::new(&[
            ("b", 0, Reply::Listing("@weekly /opt/backup\n")),
            ("a", 0, Reply::Listing("@monthly /opt/rotate\n")),
        ]);
        let report = collect(targets(&["b", "a"]), &CollectConfig::default(), fetcher)
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(hosts(&report), vec!["a", "b"]);
        for target in &report.reports {
            assert!(target.entries[0].next_run.at().unwrap() > report.generated_at);
        }
    }

    #[tokio::test]
    async fn no_targets_completes_immediately() {
        let (_tx, rx) = mpsc::channel(1);
        let report = Aggregator::new(0, &CollectConfig::default(), reference())
            .run(rx, Instant::now() + Duration::from_secs(5))
            .await
            .expect("report");
        assert_eq!(report.outcome, RunOutcome::NothingToReport);
    }
}
