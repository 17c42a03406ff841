use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::{address, Address};
use clap::Parser;
use color_eyre::eyre::{ensure, Result};
use serde::Deserialize;

use crate::pipeline::FailurePolicy;
use crate::retry::RetryPolicy;

#[derive(Debug, clap::Parser)]
pub struct Args {
    /// TOML config file. Used only if it exists
    #[clap(
        long,
        default_value = "sender-indexer.toml",
        env = "SENDER_INDEXER_CONFIG"
    )]
    config: PathBuf,

    /// output file
    #[clap(long, env = "SENDER_INDEXER_OUT_FILE")]
    out_file: Option<PathBuf>,

    /// start block number
    #[clap(long)]
    start: Option<u64>,

    /// end block number (0 means latest)
    #[clap(long)]
    end: Option<u64>,

    /// RPC provider
    #[clap(long, env = "SENDER_INDEXER_RPC")]
    rpc_provider: Option<String>,

    /// contract whose logs are scanned
    #[clap(long)]
    contract: Option<Address>,

    /// worker count (defaults to host parallelism)
    #[clap(long)]
    worker_count: Option<usize>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_contract")]
    pub contract: Address,

    #[serde(default = "default_start_block")]
    pub start_block: u64,

    /// `None` or 0 resolves to the latest block at startup
    #[serde(default)]
    pub end_block: Option<u64>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SyncConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// capacity of the reference channel, per resolver
    #[serde(default = "default_buffer_factor")]
    pub buffer_factor: usize,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// 0 retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct OutputConfig {
    #[serde(default = "default_out_file")]
    pub path: PathBuf,
}

impl Config {
    pub fn read() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let mut config = if args.config.exists() {
            Self::read_from(args.config.as_path())?
        } else {
            Self::default()
        };
        config.apply(args);
        config.retry.validate()?;

        Ok(config)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// command line flags take precedence over the config file
    fn apply(&mut self, args: Args) {
        if let Some(path) = args.out_file {
            self.output.path = path;
        }
        if let Some(start) = args.start {
            self.chain.start_block = start;
        }
        if let Some(end) = args.end {
            self.chain.end_block = Some(end);
        }
        if let Some(url) = args.rpc_provider {
            self.chain.rpc_url = url;
        }
        if let Some(contract) = args.contract {
            self.chain.contract = contract;
        }
        if let Some(workers) = args.worker_count {
            self.sync.worker_count = workers;
        }
    }
}

impl ChainConfig {
    pub fn end_block(&self) -> Option<u64> {
        self.end_block.filter(|&end| end != 0)
    }
}

impl RetryConfig {
    /// Zero delays or timeouts would turn an unbounded retry loop into a busy spin
    pub fn validate(&self) -> Result<()> {
        ensure!(self.call_timeout_ms > 0, "retry.call_timeout_ms must be greater than 0");
        ensure!(self.initial_delay_ms > 0, "retry.initial_delay_ms must be greater than 0");
        ensure!(
            self.max_delay_ms >= self.initial_delay_ms,
            "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
            self.max_delay_ms,
            self.initial_delay_ms
        );

        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: (self.max_attempts != 0).then_some(self.max_attempts),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            contract: default_contract(),
            start_block: default_start_block(),
            end_block: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            buffer_factor: default_buffer_factor(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_out_file(),
        }
    }
}

fn default_rpc_url() -> String {
    "https://rpc.gnosischain.com".to_owned()
}

fn default_contract() -> Address {
    address!("0xc2d5a532cf69aa9a1378737d8ccdef884b6e7420")
}

// first block after the contract was created
fn default_start_block() -> u64 {
    16_515_647
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_buffer_factor() -> usize {
    100
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> usize {
    10
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_out_file() -> PathBuf {
    PathBuf::from("out.txt")
}
