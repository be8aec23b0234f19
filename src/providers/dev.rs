use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::models::{GameUpdate, ScoringBatch};

use super::{ChainClient, GameDataProvider, UidSnapshot};

/// Offline stand-in for the real data feed. Updates queued through
/// `push_update` drain on the next poll; scoring batches are empty.
/// Lets the engine loop run end-to-end without any upstream service.
#[derive(Default)]
pub struct DevGameFeed {
    queued: Mutex<Vec<GameUpdate>>,
}

impl DevGameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_update(&self, update: GameUpdate) {
        self.queued.lock().await.push(update);
    }
}

#[async_trait]
impl GameDataProvider for DevGameFeed {
    async fn fetch_game_updates(&self) -> AppResult<Vec<GameUpdate>> {
        Ok(std::mem::take(&mut *self.queued.lock().await))
    }

    async fn fetch_scoring_batch(&self, date: NaiveDate) -> AppResult<ScoringBatch> {
        tracing::debug!("Dev feed: no scoring batch for {}", date);
        Ok(ScoringBatch::default())
    }
}

/// Dev-mode chain client: synthesizes a block height from wall-clock
/// time and logs emitted weights instead of publishing them.
pub struct DevChainClient {
    started: Instant,
    block_time_secs: u64,
    valid_uids: Vec<usize>,
    invalid_uids: Vec<usize>,
}

impl DevChainClient {
    pub fn new(valid_uids: Vec<usize>, invalid_uids: Vec<usize>) -> Self {
        Self {
            started: Instant::now(),
            block_time_secs: 12,
            valid_uids,
            invalid_uids,
        }
    }
}

#[async_trait]
impl ChainClient for DevChainClient {
    async fn block_height(&self) -> AppResult<u64> {
        Ok(self.started.elapsed().as_secs() / self.block_time_secs)
    }

    async fn uid_snapshot(&self) -> AppResult<UidSnapshot> {
        Ok(UidSnapshot {
            valid_uids: self.valid_uids.clone(),
            invalid_uids: self.invalid_uids.clone(),
        })
    }

    async fn publish_weights(&self, weights: &[f64]) -> AppResult<()> {
        let total: f64 = weights.iter().sum();
        tracing::info!(
            "Dev chain client: would publish {} weight(s), sum {:.6}",
            weights.len(),
            total
        );
        Ok(())
    }
}
