#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy_primitives::{Address, TxKind, B256, U256};
use async_trait::async_trait;
use sender_indexer::types::LogEntry;
use sender_indexer::{ChainClient, ChainError};

/// In-memory chain with one matching transaction every `spacing` blocks
pub struct SyntheticChain {
    pub contract: Address,
    logs: BTreeMap<u64, LogEntry>,
    transactions: HashMap<B256, TxEnvelope>,
}

impl SyntheticChain {
    pub fn new(blocks: u64, spacing: u64) -> Self {
        let contract = Address::repeat_byte(0xc2);
        let signer: PrivateKeySigner =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let mut logs = BTreeMap::new();
        let mut transactions = HashMap::new();

        for (nonce, block) in (0..blocks).step_by(spacing as usize).enumerate() {
            let tx = TxLegacy {
                chain_id: Some(100),
                nonce: nonce as u64,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                to: TxKind::Call(contract),
                value: U256::ZERO,
                ..Default::default()
            };
            let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
            let tx: TxEnvelope = tx.into_signed(signature).into();
            let hash = *tx.tx_hash();

            logs.insert(
                block,
                LogEntry {
                    address: contract,
                    transaction_hash: Some(hash),
                    block_hash: Some(block_hash(block)),
                },
            );
            transactions.insert(hash, tx);
        }

        Self {
            contract,
            logs,
            transactions,
        }
    }
}

fn block_hash(number: u64) -> B256 {
    B256::left_padding_from(&number.to_be_bytes())
}

#[async_trait]
impl ChainClient for SyntheticChain {
    async fn filter_logs(
        &self,
        _addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        Ok(self
            .logs
            .range(from_block..=to_block)
            .map(|(_, log)| log.clone())
            .collect())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxEnvelope>, ChainError> {
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn block_timestamp(&self, hash: B256) -> Result<Option<u64>, ChainError> {
        let number = u64::from_be_bytes(hash[24..].try_into().unwrap());
        Ok(Some(1_600_000_000 + number * 5))
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.logs.keys().next_back().copied().unwrap_or_default())
    }
}
