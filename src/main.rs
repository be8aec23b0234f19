use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

mod config;
mod database;
mod entropy;
mod error;
mod models;
mod providers;
mod runner;
mod scoring;

use crate::config::Config;
use crate::database::ScoreStateRepository;
use crate::entropy::EntropyEngine;
use crate::providers::{ChainClient, DevChainClient, DevGameFeed, GameDataProvider};
use crate::runner::Runner;
use crate::scoring::ScoringEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        warn!("Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oddsmith=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: {} (network: {}, {} miners, {} day horizon)",
        config.service_name, config.network, config.num_miners, config.max_days
    );

    let pool = database::create_pool(&config.database_url).await?;
    info!("Database connection pool created");

    let repository = Arc::new(ScoreStateRepository::new(pool));
    repository.ensure_schema().await?;

    let entropy = EntropyEngine::restore(
        config.num_miners,
        config.max_days,
        &config.entropy_state_path,
    );
    let mut engine = ScoringEngine::new(config.num_miners, config.max_days, entropy);

    if config.reset_state {
        warn!("State reset requested: clearing persisted scoring state");
        repository.clear().await?;
        engine.full_reset();
    } else {
        let first_run = repository.load(&mut engine).await?;
        if first_run {
            info!("No previous state found, starting fresh");
        } else {
            info!(
                "Restored scoring state (day cursor {}, last update {:?})",
                engine.buffer.current_day, engine.buffer.last_update_date
            );
        }
    }

    let engine = Arc::new(Mutex::new(engine));

    // Collaborator endpoints live outside this service; the dev
    // implementations keep the loop running against an empty feed.
    let feed: Arc<dyn GameDataProvider> = Arc::new(DevGameFeed::new());
    let chain: Arc<dyn ChainClient> = Arc::new(DevChainClient::new(
        (0..config.num_miners).collect(),
        Vec::new(),
    ));

    let runner = Arc::new(Runner::new(config, engine, repository, feed, chain));
    runner.run().await?;

    Ok(())
}
