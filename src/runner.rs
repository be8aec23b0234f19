use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::Config;
use crate::database::ScoreStateRepository;
use crate::error::{AppError, AppResult};
use crate::providers::{ChainClient, GameDataProvider};
use crate::scoring::ScoringEngine;

const LOOP_TICK_SECS: u64 = 6;
const STATUS_LOG_SECS: u64 = 30;

#[derive(Debug, Default)]
struct JobMarkers {
    last_game_data_block: u64,
    last_scoring_block: u64,
    last_set_weights_block: u64,
}

/// Block-triggered scheduler around the scoring engine.
///
/// One loop dispatches three job classes: game-data ingestion, the
/// scoring tick, and weight publishing. Each class holds its own
/// mutex so at most one instance is ever in flight, and each run is
/// wrapped in a timeout; a job that times out or fails is simply
/// skipped until its next block window. The scoring tick takes the
/// engine lock for its whole duration, so nothing else observes a
/// partially scored day.
pub struct Runner {
    config: Config,
    engine: Arc<Mutex<ScoringEngine>>,
    repository: Arc<ScoreStateRepository>,
    feed: Arc<dyn GameDataProvider>,
    chain: Arc<dyn ChainClient>,
    last_weights: Arc<Mutex<Option<Vec<f64>>>>,
    markers: Arc<Mutex<JobMarkers>>,
    game_data_guard: Arc<Mutex<()>>,
    scoring_guard: Arc<Mutex<()>>,
    set_weights_guard: Arc<Mutex<()>>,
}

impl Runner {
    pub fn new(
        config: Config,
        engine: Arc<Mutex<ScoringEngine>>,
        repository: Arc<ScoreStateRepository>,
        feed: Arc<dyn GameDataProvider>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            config,
            engine,
            repository,
            feed,
            chain,
            last_weights: Arc::new(Mutex::new(None)),
            markers: Arc::new(Mutex::new(JobMarkers::default())),
            game_data_guard: Arc::new(Mutex::new(())),
            scoring_guard: Arc::new(Mutex::new(())),
            set_weights_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Drive the scheduler forever. Only a persistent inability to
    /// read the chain is surfaced; individual job failures are
    /// logged and retried on their next window.
    pub async fn run(self: Arc<Self>) -> AppResult<()> {
        tracing::info!("Runner started (network: {})", self.config.network);
        let mut last_status: Option<tokio::time::Instant> = None;

        loop {
            let block = match self.chain.block_height().await {
                Ok(block) => block,
                Err(e) => {
                    tracing::error!("Failed to read block height: {}", e);
                    tokio::time::sleep(Duration::from_secs(LOOP_TICK_SECS)).await;
                    continue;
                }
            };

            let status_due = last_status
                .map(|at| at.elapsed() >= Duration::from_secs(STATUS_LOG_SECS))
                .unwrap_or(true);
            if status_due {
                self.log_status(block).await;
                last_status = Some(tokio::time::Instant::now());
            }

            self.maybe_spawn_game_data(block).await;
            self.maybe_spawn_scoring(block).await;
            self.maybe_spawn_set_weights(block).await;

            tokio::time::sleep(Duration::from_secs(LOOP_TICK_SECS)).await;
        }
    }

    async fn log_status(&self, block: u64) {
        let markers = self.markers.lock().await;
        tracing::info!(
            "=== Runner status: block {}, blocks until game data: {}, scoring: {}, set weights: {} ===",
            block,
            blocks_until(block, markers.last_game_data_block, self.config.game_data_interval_blocks),
            blocks_until(block, markers.last_scoring_block, self.config.scoring_interval_blocks),
            blocks_until(
                block,
                markers.last_set_weights_block,
                self.config.set_weights_interval_blocks
            ),
        );
    }

    async fn maybe_spawn_game_data(self: &Arc<Self>, block: u64) {
        {
            let markers = self.markers.lock().await;
            if block.saturating_sub(markers.last_game_data_block)
                < self.config.game_data_interval_blocks
            {
                return;
            }
        }
        let Ok(guard) = self.game_data_guard.clone().try_lock_owned() else {
            return;
        };
        self.markers.lock().await.last_game_data_block = block;

        let runner = Arc::clone(self);
        let timeout_secs = self.config.game_data_timeout_secs;
        tokio::spawn(async move {
            let _guard = guard;
            match timeout(Duration::from_secs(timeout_secs), runner.ingest_game_data()).await {
                Ok(Ok(applied)) => {
                    tracing::debug!("Game data job applied {} update(s)", applied);
                }
                Ok(Err(e)) => tracing::error!("Game data job failed: {}", e),
                Err(_) => tracing::error!("Game data job timed out"),
            }
        });
    }

    async fn maybe_spawn_scoring(self: &Arc<Self>, block: u64) {
        {
            let markers = self.markers.lock().await;
            if block.saturating_sub(markers.last_scoring_block)
                < self.config.scoring_interval_blocks
            {
                return;
            }
        }
        let Ok(guard) = self.scoring_guard.clone().try_lock_owned() else {
            return;
        };
        self.markers.lock().await.last_scoring_block = block;

        let runner = Arc::clone(self);
        let timeout_secs = self.config.scoring_timeout_secs;
        tokio::spawn(async move {
            let _guard = guard;
            match timeout(Duration::from_secs(timeout_secs), runner.scoring_tick()).await {
                Ok(Ok(())) => tracing::info!("Scoring tick completed"),
                Ok(Err(e)) => tracing::error!("Scoring tick failed: {}", e),
                Err(_) => tracing::error!("Scoring tick timed out"),
            }
        });
    }

    async fn maybe_spawn_set_weights(self: &Arc<Self>, block: u64) {
        {
            let markers = self.markers.lock().await;
            if block.saturating_sub(markers.last_set_weights_block)
                < self.config.set_weights_interval_blocks
            {
                return;
            }
        }
        let Ok(guard) = self.set_weights_guard.clone().try_lock_owned() else {
            return;
        };
        self.markers.lock().await.last_set_weights_block = block;

        let runner = Arc::clone(self);
        let timeout_secs = self.config.set_weights_timeout_secs;
        tokio::spawn(async move {
            let _guard = guard;
            match timeout(Duration::from_secs(timeout_secs), runner.publish_weights()).await {
                Ok(Ok(())) => tracing::info!("Weights published"),
                Ok(Err(e)) => tracing::error!("Weight publish failed: {}", e),
                Err(_) => tracing::error!("Weight publish timed out"),
            }
        });
    }

    /// Pull lifecycle events from the feed and fold them into the
    /// entropy subsystem.
    async fn ingest_game_data(&self) -> AppResult<usize> {
        let updates = self.feed.fetch_game_updates().await?;
        if updates.is_empty() {
            return Ok(0);
        }
        let count = updates.len();
        let mut engine = self.engine.lock().await;
        for update in updates {
            engine.apply_game_update(update);
        }
        Ok(count)
    }

    /// One full scoring tick: fetch inputs, score synchronously
    /// under the engine lock, commit, then stage the weight vector
    /// for the next publish window. A failed commit drops the tick;
    /// the next window recomputes from the last committed state.
    async fn scoring_tick(&self) -> AppResult<()> {
        let snapshot = self.chain.uid_snapshot().await?;
        let date = Utc::now().date_naive();
        let batch = self.feed.fetch_scoring_batch(date).await?;

        let mut engine = self.engine.lock().await;
        let weights = engine.scoring_run(
            date,
            &snapshot.valid_uids,
            &snapshot.invalid_uids,
            &batch,
        );

        self.repository
            .save(&engine)
            .await
            .map_err(|e| AppError::Database(format!("Tick commit failed: {}", e)))?;
        drop(engine);

        *self.last_weights.lock().await = Some(weights);
        Ok(())
    }

    async fn publish_weights(&self) -> AppResult<()> {
        let weights = self.last_weights.lock().await.clone();
        match weights {
            Some(weights) => self.chain.publish_weights(&weights).await,
            None => {
                tracing::warn!("No weights staged yet, skipping publish");
                Ok(())
            }
        }
    }
}

fn blocks_until(block: u64, last: u64, interval: u64) -> u64 {
    interval.saturating_sub(block.saturating_sub(last))
}
