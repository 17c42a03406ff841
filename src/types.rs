use std::fmt;

use alloy_primitives::{Address, B256};

/// Inclusive block range assigned to a single scan worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start: u64,
    pub end: u64,
    pub contract: Address,
}

impl ScanRange {
    /// Saturates at `u64::MAX` for a range covering every block
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

/// A log entry as returned by the chain node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Address of the contract that emitted the log
    pub address: Address,
    pub transaction_hash: Option<B256>,
    pub block_hash: Option<B256>,
}

/// A matching transaction, travelling from a scanner to a resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReference {
    pub transaction_hash: B256,
    pub block_hash: B256,
}

/// Final output of the pipeline.
/// Displays as `<sender> <timestamp>`, the line format of the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub sender: Address,
    pub block_timestamp: u64,
}

impl fmt::Display for ResolvedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sender, self.block_timestamp)
    }
}
