use std::sync::Arc;

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{PipelineError, PipelineResult, Stage};
use crate::provider::ChainClient;
use crate::retry::RetryPolicy;
use crate::types::{ScanRange, TransactionReference};

/// Finds the transactions that emitted logs from the target contract within a block range
pub struct BlockScanner<C> {
    client: Arc<C>,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl<C: ChainClient> BlockScanner<C> {
    pub fn new(client: Arc<C>, retry: RetryPolicy, token: CancellationToken) -> Self {
        Self {
            client,
            retry,
            token,
        }
    }

    /// Emits one reference per matching log, in the order the node returned them.
    /// Returns the number of references emitted
    #[instrument(name = "scan", skip(self, range, refs), fields(start = range.start, end = range.end))]
    pub async fn run(
        self,
        range: ScanRange,
        refs: Sender<TransactionReference>,
    ) -> PipelineResult<usize> {
        let contracts = [range.contract];
        let logs = self
            .retry
            .run(&self.token, Stage::FilterLogs, || {
                self.client.filter_logs(&contracts, range.start, range.end)
            })
            .await?;

        let mut count = 0;
        // some nodes return a superset of the requested addresses
        for log in logs.into_iter().filter(|l| l.address == range.contract) {
            let (Some(transaction_hash), Some(block_hash)) = (log.transaction_hash, log.block_hash)
            else {
                warn!(?log, "log without transaction or block hash");
                continue;
            };

            let reference = TransactionReference {
                transaction_hash,
                block_hash,
            };

            tokio::select! {
                _ = self.token.cancelled() => return Err(PipelineError::Cancelled),
                res = refs.send(reference) => res.map_err(|_| PipelineError::ChannelClosed)?,
            }
            count += 1;
        }

        info!(start = range.start, end = range.end, count, "scanned range");
        Ok(count)
    }
}
