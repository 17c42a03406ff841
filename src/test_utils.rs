#![cfg(test)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::consensus::{
    SignableTransaction, Signed, TxEip1559, TxEip2930, TxEip7702, TxEnvelope, TxLegacy,
};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy_primitives::{Address, Signature, TxKind, B256, U256};
use async_trait::async_trait;

use crate::config::Config;
use crate::error::ChainError;
use crate::provider::ChainClient;
use crate::retry::RetryPolicy;
use crate::types::LogEntry;

/// In-memory chain node with scripted failures
#[derive(Debug, Default)]
pub struct StubClient {
    logs: BTreeMap<u64, Vec<LogEntry>>,
    transactions: HashMap<B256, TxEnvelope>,
    blocks: HashMap<B256, u64>,

    /// returned once each, before any log query succeeds
    log_failures: Mutex<VecDeque<ChainError>>,
    /// returned once each, before any block query succeeds
    block_failures: Mutex<VecDeque<ChainError>>,
    /// returned forever to log queries starting at the given block
    failing_ranges: HashMap<u64, ChainError>,

    log_calls: AtomicUsize,
}

impl StubClient {
    /// Logs are returned for any queried address, the way a sloppy node would
    pub fn with_logs(mut self, block: u64, logs: Vec<LogEntry>) -> Self {
        self.logs.entry(block).or_default().extend(logs);
        self
    }

    pub fn with_transaction(mut self, tx: TxEnvelope) -> Self {
        self.transactions.insert(*tx.tx_hash(), tx);
        self
    }

    pub fn with_block(mut self, hash: B256, timestamp: u64) -> Self {
        self.blocks.insert(hash, timestamp);
        self
    }

    pub fn fail_logs(self, err: ChainError) -> Self {
        self.log_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn fail_logs_from(mut self, from_block: u64, err: ChainError) -> Self {
        self.failing_ranges.insert(from_block, err);
        self
    }

    pub fn fail_blocks(self, err: ChainError) -> Self {
        self.block_failures.lock().unwrap().push_back(err);
        self
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for StubClient {
    async fn filter_logs(
        &self,
        _addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ChainError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.failing_ranges.get(&from_block) {
            return Err(err.clone());
        }
        if let Some(err) = self.log_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(self
            .logs
            .range(from_block..=to_block)
            .flat_map(|(_, logs)| logs.iter().cloned())
            .collect())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxEnvelope>, ChainError> {
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn block_timestamp(&self, hash: B256) -> Result<Option<u64>, ChainError> {
        if let Some(err) = self.block_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.blocks.get(&hash).copied())
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.logs.keys().next_back().copied().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SignatureScheme {
    /// EIP-155
    Legacy,
    /// pre EIP-155
    LegacyNoChainId,
    /// EIP-2930
    AccessList,
    /// EIP-1559
    DynamicFee,
}

#[rstest::fixture]
pub fn signer() -> PrivateKeySigner {
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
        .parse()
        .unwrap()
}

pub fn signed_tx(signer: &PrivateKeySigner, scheme: SignatureScheme, nonce: u64) -> TxEnvelope {
    let to = TxKind::Call(Address::repeat_byte(0xc2));
    let value = U256::from(1);

    match scheme {
        SignatureScheme::Legacy => sign(
            signer,
            TxLegacy {
                chain_id: Some(100),
                nonce,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                to,
                value,
                ..Default::default()
            },
        ),
        SignatureScheme::LegacyNoChainId => sign(
            signer,
            TxLegacy {
                chain_id: None,
                nonce,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                to,
                value,
                ..Default::default()
            },
        ),
        SignatureScheme::AccessList => sign(
            signer,
            TxEip2930 {
                chain_id: 100,
                nonce,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                to,
                value,
                ..Default::default()
            },
        ),
        SignatureScheme::DynamicFee => sign(
            signer,
            TxEip1559 {
                chain_id: 100,
                nonce,
                gas_limit: 21_000,
                max_fee_per_gas: 2_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
                to,
                value,
                ..Default::default()
            },
        ),
    }
}

pub fn legacy_tx(signer: &PrivateKeySigner, nonce: u64) -> TxEnvelope {
    signed_tx(signer, SignatureScheme::Legacy, nonce)
}

/// EIP-7702 envelope, a type the resolver does not recover senders for
pub fn set_code_tx(signer: &PrivateKeySigner, nonce: u64) -> TxEnvelope {
    sign(
        signer,
        TxEip7702 {
            chain_id: 100,
            nonce,
            gas_limit: 50_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            to: Address::repeat_byte(0xc2),
            ..Default::default()
        },
    )
}

fn sign<T>(signer: &PrivateKeySigner, tx: T) -> TxEnvelope
where
    T: SignableTransaction<Signature>,
    TxEnvelope: From<Signed<T>>,
{
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    tx.into_signed(signature).into()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        max_attempts: Some(3),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn test_config(workers: usize) -> Config {
    let mut config = Config::default();
    config.chain.contract = Address::repeat_byte(0xc2);
    config.sync.worker_count = workers;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config.retry.max_attempts = 3;
    config
}
