mod aggregator;
mod config;
mod dispatcher;
mod fetcher;
mod report;
mod target;

pub use aggregator::{Aggregator, FatalParseError, Progress};
pub use config::{CollectConfig, ParseFailurePolicy, DEFAULT_DEADLINE, DEFAULT_PARALLELISM};
pub use dispatcher::{listing_command, Dispatcher, RawResult};
pub use fetcher::{RemoteFetcher, SshFetcher, SshOptions, TransportError};
pub use report::{RunOutcome, RunReport, Severity, TargetReport, TargetStatus};
pub use target::{Target, DEFAULT_SSH_PORT};

pub use crontab_grammar::{NextRun, ScheduleEntry};

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Collects every target's crontab and folds the results into one report.
///
/// The deadline is armed once, here. Targets still queued when the report is
/// finalized are never started; fetches already running are left to finish
/// and their results are dropped.
pub async fn collect(
    targets: Vec<Target>,
    config: &CollectConfig,
    fetcher: Arc<dyn RemoteFetcher>,
) -> Result<RunReport, FatalParseError> {
    let deadline = Instant::now() + config.deadline;
    let reference = chrono::Local::now().naive_local();
    let stop = CancellationToken::new();
    let aggregator = Aggregator::new(targets.len(), config, reference);
    let results = Dispatcher::new(fetcher, config.parallelism).dispatch(targets, stop.clone());
    let report = aggregator.run(results, deadline).await;
    stop.cancel();
    report
}
