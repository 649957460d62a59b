use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fetcher::{RemoteFetcher, TransportError};
use crate::target::Target;

const LIST_COMMAND: &str = "crontab -l";

#[derive(Debug)]
pub struct RawResult {
    pub target: Target,
    pub output: Result<String, TransportError>,
}

pub fn listing_command(target: &Target) -> String {
    if target.needs_elevation() {
        format!(
            "sudo -n {LIST_COMMAND} -u {}",
            shell_words::quote(&target.crontab_user)
        )
    } else {
        LIST_COMMAND.to_string()
    }
}

/// Fans targets out to a fixed number of workers pulling from one queue.
pub struct Dispatcher {
    fetcher: Arc<dyn RemoteFetcher>,
    parallelism: usize,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>, parallelism: usize) -> Self {
        Self {
            fetcher,
            parallelism: parallelism.max(1),
        }
    }

    /// Starts the workers and returns the channel every result arrives on.
    /// Cancelling `stop` keeps workers from starting queued targets.
    pub fn dispatch(&self, targets: Vec<Target>, stop: CancellationToken) -> mpsc::Receiver<RawResult> {
        // Room for every result, so a worker never waits on a finished aggregator.
        let (result_tx, result_rx) = mpsc::channel(targets.len().max(1));
        let workers = self.parallelism.min(targets.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let fetcher = Arc::clone(&self.fetcher);
            let result_tx = result_tx.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                run_worker(worker, queue, fetcher, result_tx, stop).await;
            });
        }
        result_rx
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<VecDeque<Target>>>,
    fetcher: Arc<dyn RemoteFetcher>,
    results: mpsc::Sender<RawResult>,
    stop: CancellationToken,
) {
    loop {
        if stop.is_cancelled() {
            debug!(worker, "collection finalized, leaving queued targets");
            break;
        }
        let Some(target) = queue.lock().await.pop_front() else {
            break;
        };
        let command = listing_command(&target);
        info!(worker, host = %target.label(), user = %target.crontab_user, "collecting crontab");
        let output = fetcher.fetch(&target, &command).await;
        if results.send(RawResult { target, output }).await.is_err() {
            debug!(worker, "aggregator finished, discarding result");
            break;
        }
    }
}
