//! Random money transfers between keys, followed by a consistency check.
//!
//! ```bash
//! cargo run --example bank-transfer -- --rounds 200
//! RUST_LOG=shardtxn=debug cargo run --example bank-transfer -- --config cluster.toml
//! ```

use clap::Parser;
use rand::Rng;
use shardtxn::{Client, Cluster, ClusterConfig, InteractiveTxnClient};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bank-transfer")]
#[command(about = "Concurrent transfers over a partitioned transactional store")]
struct Cli {
    /// TOML cluster configuration, defaults are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transactions each client runs
    #[arg(long, default_value = "100")]
    rounds: usize,

    /// Largest amount moved by one transfer
    #[arg(long, default_value = "20")]
    max_amount: i64,
}

async fn run_client(
    mut client: InteractiveTxnClient,
    max_key: u64,
    rounds: usize,
    max_amount: i64,
) -> shardtxn::Result<(usize, usize)> {
    let (mut committed, mut aborted) = (0, 0);
    for _ in 0..rounds {
        let (from, to, amount) = {
            let mut rng = rand::thread_rng();
            let from = rng.gen_range(0..=max_key);
            let to = rng.gen_range(0..=max_key);
            (from, to, rng.gen_range(1..=max_amount))
        };
        if from == to {
            continue;
        }
        client.begin().await?;
        let a = client.read(from).await?;
        let b = client.read(to).await?;
        client.write(from, a - amount)?;
        client.write(to, b + amount)?;
        if client.end(true).await? {
            committed += 1;
        } else {
            aborted += 1;
        }
    }
    tracing::info!(client = client.id(), committed, aborted, "client done");
    Ok((committed, aborted))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    let max_key = config.max_key();
    let (cluster, clients) = Cluster::launch(config)?;

    let tasks: Vec<_> = clients
        .into_iter()
        .map(|c| tokio::spawn(run_client(c, max_key, cli.rounds, cli.max_amount)))
        .collect();
    let (mut committed, mut aborted) = (0, 0);
    for t in tasks {
        let (c, a) = t.await??;
        committed += c;
        aborted += a;
    }

    let report = cluster.check_consistency().await?;
    tracing::info!(committed, aborted, ?report, "transfers finished");
    cluster.shutdown().await?;
    if !report.is_consistent() {
        anyhow::bail!(
            "store is inconsistent: total {} expected {}",
            report.total,
            report.expected
        );
    }
    Ok(())
}
