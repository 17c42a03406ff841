use std::fmt;
use std::time::Duration;

use alloy::transports::{RpcError, TransportErrorKind};
use alloy_primitives::B256;

/// A failed call to the chain node
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, DNS or socket-level failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl From<RpcError<TransportErrorKind>> for ChainError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            RpcError::Transport(TransportErrorKind::HttpError(e)) => Self::Http {
                status: e.status,
                body: e.body,
            },
            RpcError::Transport(TransportErrorKind::Custom(e)) => Self::Transport(e.to_string()),
            RpcError::Transport(TransportErrorKind::BackendGone) => {
                Self::Transport("backend connection task has stopped".to_owned())
            }
            RpcError::ErrorResp(payload) => Self::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
            },
            other => Self::Other(other.to_string()),
        }
    }
}

/// The remote call a failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FilterLogs,
    TransactionByHash,
    BlockByHash,
    LatestBlock,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FilterLogs => "eth_getLogs",
            Self::TransactionByHash => "eth_getTransactionByHash",
            Self::BlockByHash => "eth_getBlockByHash",
            Self::LatestBlock => "eth_blockNumber",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("run cancelled")]
    Cancelled,

    #[error("invalid block range [{start}, {end}]")]
    InvalidRange { start: u64, end: u64 },

    #[error("worker count must be greater than 0")]
    NoWorkers,

    #[error("{stage} failed after {attempts} attempt(s): {source}")]
    Remote {
        stage: Stage,
        attempts: usize,
        #[source]
        source: ChainError,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(B256),

    #[error("sender recovery failed for {hash}: {reason}")]
    Recovery { hash: B256, reason: String },

    #[error("block {0} not found")]
    BlockNotFound(B256),

    #[error("downstream channel closed")]
    ChannelClosed,

    #[error("worker task failed: {0}")]
    Worker(String),
}

/// How a failure affects the unit of work that produced it.
/// Independent of the stage that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried inside the retry policy, never surfaces on its own
    Transient,
    /// The entity does not exist. Skip the item
    Absence,
    /// The item is broken. Skip it
    Local,
    /// Subject to the configured `FailurePolicy`
    Fatal,
}

impl PipelineError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::TransactionNotFound(_) => FailureClass::Absence,
            Self::Recovery { .. } | Self::BlockNotFound(_) => FailureClass::Local,
            _ => FailureClass::Fatal,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
