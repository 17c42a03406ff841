use alloy::consensus::TxEnvelope;
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::Filter;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use color_eyre::eyre::Result;
use url::Url;

use crate::error::ChainError;
use crate::types::LogEntry;

/// Read-only access to a chain node.
/// The pipeline is written against this trait so the node can be swapped out for testing purposes.
/// Implementations are shared by every worker and must tolerate concurrent callers
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError>;

    /// `Ok(None)` if the node does not know the transaction
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxEnvelope>, ChainError>;

    /// Timestamp of the block with the given hash. `Ok(None)` if the node does not know the block
    async fn block_timestamp(&self, hash: B256) -> Result<Option<u64>, ChainError>;

    async fn latest_block_number(&self) -> Result<u64, ChainError>;
}

/// JSON-RPC over HTTP
#[derive(Debug, Clone)]
pub struct RpcClient {
    provider: RootProvider,
}

impl RpcClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url: Url = rpc_url.parse()?;
        Ok(Self {
            provider: RootProvider::new_http(url),
        })
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await?;

        Ok(logs
            .into_iter()
            .map(|log| LogEntry {
                address: log.address(),
                transaction_hash: log.transaction_hash,
                block_hash: log.block_hash,
            })
            .collect())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxEnvelope>, ChainError> {
        let tx = self.provider.get_transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| tx.inner.into_inner()))
    }

    async fn block_timestamp(&self, hash: B256) -> Result<Option<u64>, ChainError> {
        let block = self.provider.get_block_by_hash(hash).await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }
}
