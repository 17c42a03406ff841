mod partition;
mod resolver;
mod scanner;
mod sink;

use std::sync::Arc;

use alloy_primitives::Address;
use futures::future::join_all;
use serde::Deserialize;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{FailureClass, PipelineError, PipelineResult, Stage};
use crate::provider::ChainClient;
use crate::retry::RetryPolicy;

pub use partition::partition;
pub use resolver::{recover_sender, ResolverStats, SharedReceiver, TransactionResolver};
pub use scanner::BlockScanner;
pub use sink::{ResultSink, SinkStats};

/// What to do with a unit of work (a block range or a transaction) that failed fatally
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Cancel the whole run
    Abort,
    /// Drop the unit and carry on with the rest
    #[default]
    Skip,
}

impl FailurePolicy {
    /// Applies the policy to a failed unit.
    /// Returns the failure class if the worker should carry on, the error otherwise
    pub fn handle(
        self,
        token: &CancellationToken,
        err: PipelineError,
    ) -> PipelineResult<FailureClass> {
        if matches!(err, PipelineError::Cancelled) {
            return Err(err);
        }

        let class = err.class();
        match class {
            FailureClass::Absence => debug!(error = %err, "skipping absent item"),
            FailureClass::Local => warn!(error = %err, "skipping item"),
            _ if self == Self::Skip => error!(error = %err, "dropping failed unit"),
            _ => {
                error!(error = %err, "aborting run");
                token.cancel();
                return Err(err);
            }
        }

        Ok(class)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub partitions: usize,
    /// References emitted by the scanners
    pub references: usize,
    /// Partitions dropped under `FailurePolicy::Skip`
    pub failed_partitions: usize,
    pub resolved: usize,
    pub absent: usize,
    pub skipped: usize,
    pub written: usize,
    pub write_failures: usize,
}

/// Two-stage scan → resolve pipeline over a block range
pub struct Pipeline<C> {
    client: Arc<C>,
    contract: Address,
    workers: usize,
    buffer_factor: usize,
    retry: RetryPolicy,
    policy: FailurePolicy,
    token: CancellationToken,
}

impl<C: ChainClient> Pipeline<C> {
    pub fn new(client: Arc<C>, config: &Config, token: CancellationToken) -> Self {
        Self {
            client,
            contract: config.chain.contract,
            workers: config.sync.worker_count,
            buffer_factor: config.sync.buffer_factor,
            retry: config.retry.policy(),
            policy: config.sync.on_failure,
            token,
        }
    }

    /// Scans `[start, end]` and writes one line per resolved transaction to `output`.
    ///
    /// Both worker pools start together. Once every scanner is done the reference channel
    /// closes, resolvers drain it and exit, the record channel closes and the sink flushes.
    /// Output already written is kept even if the run fails
    #[instrument(skip(self, output), fields(contract = %self.contract))]
    pub async fn run<W>(self, start: u64, end: u64, output: W) -> PipelineResult<PipelineReport>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let ranges = partition(start, end, self.workers, self.contract)?;
        let resolvers = self.workers;

        let (refs_tx, refs_rx) = mpsc::channel(self.buffer_factor.max(1) * resolvers);
        let (records_tx, records_rx) = mpsc::channel(resolvers);
        let refs_rx: SharedReceiver = Arc::new(Mutex::new(refs_rx));

        let sink = tokio::spawn(ResultSink::new(output).run(records_rx));

        info!(partitions = ranges.len(), resolvers, "starting");
        let mut report = PipelineReport {
            partitions: ranges.len(),
            ..Default::default()
        };

        let scanners: Vec<_> = ranges
            .into_iter()
            .map(|range| {
                let scanner =
                    BlockScanner::new(self.client.clone(), self.retry, self.token.clone());
                let refs = refs_tx.clone();
                let token = self.token.clone();
                let policy = self.policy;

                // `None` marks a partition dropped by the failure policy
                tokio::spawn(async move {
                    match scanner.run(range, refs).await {
                        Ok(count) => Ok(Some(count)),
                        Err(err) => policy.handle(&token, err).map(|_| None),
                    }
                })
            })
            .collect();

        let workers: Vec<_> = (0..resolvers)
            .map(|_| {
                let resolver = TransactionResolver::new(
                    self.client.clone(),
                    self.retry,
                    self.policy,
                    self.token.clone(),
                );
                tokio::spawn(resolver.run(refs_rx.clone(), records_tx.clone()))
            })
            .collect();

        // every scanner holds its own sender. dropping ours lets the channel close once they finish
        drop(refs_tx);
        drop(records_tx);
        // scanners must see a closed channel if every resolver exits early
        drop(refs_rx);

        let mut failure = None;

        for res in join_all(scanners).await {
            match flatten(res) {
                Ok(Some(count)) => report.references += count,
                Ok(None) => report.failed_partitions += 1,
                Err(err) => keep_first(&mut failure, err),
            }
        }
        info!(references = report.references, "finished scanning block ranges");

        for res in join_all(workers).await {
            match flatten(res) {
                Ok(stats) => {
                    report.resolved += stats.resolved;
                    report.absent += stats.absent;
                    report.skipped += stats.skipped;
                }
                Err(err) => keep_first(&mut failure, err),
            }
        }
        info!(resolved = report.resolved, "finished processing transactions");

        let (_, stats) = sink.await.map_err(join_error)?;
        report.written = stats.written;
        report.write_failures = stats.failed;

        if let Some(err) = failure {
            return Err(err);
        }
        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        info!(?report, "done");
        Ok(report)
    }
}

/// The configured end block, or the chain tip if there is none
pub async fn resolve_end_block<C: ChainClient>(
    client: &C,
    configured: Option<u64>,
    retry: &RetryPolicy,
    token: &CancellationToken,
) -> PipelineResult<u64> {
    if let Some(end) = configured {
        return Ok(end);
    }

    let latest = retry
        .run(token, Stage::LatestBlock, || client.latest_block_number())
        .await?;
    info!(latest, "resolved end block to chain tip");

    Ok(latest)
}

fn flatten<T>(res: Result<PipelineResult<T>, tokio::task::JoinError>) -> PipelineResult<T> {
    res.map_err(join_error)?
}

fn join_error(err: tokio::task::JoinError) -> PipelineError {
    PipelineError::Worker(err.to_string())
}

/// Keeps the error that caused the run to stop, not the cancellations that followed it
fn keep_first(slot: &mut Option<PipelineError>, err: PipelineError) {
    match slot {
        None => *slot = Some(err),
        Some(PipelineError::Cancelled) if !matches!(err, PipelineError::Cancelled) => {
            *slot = Some(err)
        }
        Some(_) => {}
    }
}
