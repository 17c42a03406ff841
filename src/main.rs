use std::sync::Arc;

use color_eyre::eyre::Result;
use tokio::{fs::File, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use sender_indexer::pipeline::resolve_end_block;
use sender_indexer::{Config, Pipeline, RpcClient};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::read()?;

    let client = Arc::new(RpcClient::new(&config.chain.rpc_url)?);
    let token = CancellationToken::new();

    let start = config.chain.start_block;
    let end = resolve_end_block(
        client.as_ref(),
        config.chain.end_block(),
        &config.retry.policy(),
        &token,
    )
    .await?;

    // truncates whatever a previous run left behind
    let output = File::create(&config.output.path).await?;
    info!(start, end, path = ?config.output.path, "scanning");

    let pipeline = Pipeline::new(client, &config, token.clone());

    let tracker = TaskTracker::new();
    let run = tracker.spawn(pipeline.run(start, end, output));
    tracker.close();

    // termination handling
    tokio::select! {
        _ = tracker.wait() => {}
        res = signal::ctrl_c() => {
            res?;
            warn!("interrupted. cancelling run");
            token.cancel();
            tracker.wait().await;
        }
    }

    let report = run.await??;
    info!(?report, "finished");

    Ok(())
}

fn setup() -> Result<()> {
    color_eyre::install()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NEW)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
