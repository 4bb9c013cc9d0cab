use std::path::PathBuf;

use txrelay_infra::config::RelayConfig;
use txrelay_ledger::InMemoryLedger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RelayConfig::load(config_path.as_deref())?;
    txrelay_observability::init(&config.logging);

    let ledger = InMemoryLedger::new();
    let service = txrelay_node::build_service(&config, &ledger);
    let pool = service.spawn_workers();
    tracing::info!(
        workers = pool.size(),
        identities = ?config.identities,
        max_attempts = config.max_attempts,
        "txrelay node started"
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let outcome = txrelay_node::run(&service, stdin, tokio::io::stdout()).await;

    pool.shutdown().await;
    let stats = service.stats()?;
    tracing::info!(?stats, "txrelay node stopped");
    outcome
}
