pub mod config;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod types;

mod test_utils;

pub use config::Config;
pub use error::{ChainError, FailureClass, PipelineError};
pub use pipeline::{FailurePolicy, Pipeline, PipelineReport};
pub use provider::{ChainClient, RpcClient};
pub use retry::RetryPolicy;
