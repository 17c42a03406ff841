use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::Receiver;
use tracing::{instrument, warn};

use crate::types::ResolvedRecord;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub written: usize,
    pub failed: usize,
}

/// Sole owner of the output destination.
/// Appends one line per record until every sender is gone
pub struct ResultSink<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> ResultSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    #[instrument(name = "sink", skip_all)]
    pub async fn run(mut self, mut records: Receiver<ResolvedRecord>) -> (W, SinkStats) {
        let mut stats = SinkStats::default();

        while let Some(record) = records.recv().await {
            let line = format!("{record}\n");
            match self.writer.write_all(line.as_bytes()).await {
                Ok(()) => stats.written += 1,
                Err(e) => {
                    warn!(%record, error = %e, "failed to write record");
                    stats.failed += 1;
                }
            }
        }

        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "failed to flush output");
        }

        (self.writer.into_inner(), stats)
    }
}
