pub mod dev;

pub use dev::{DevChainClient, DevGameFeed};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::AppResult;
use crate::models::{GameUpdate, ScoringBatch};

/// Current split of network slots as reported by the chain.
#[derive(Debug, Clone, Default)]
pub struct UidSnapshot {
    pub valid_uids: Vec<usize>,
    pub invalid_uids: Vec<usize>,
}

/// Upstream source of games, predictions and settled results. The
/// real implementation sits outside the engine; the engine only ever
/// sees these two calls.
#[async_trait]
pub trait GameDataProvider: Send + Sync {
    /// Incremental game lifecycle events since the last poll.
    async fn fetch_game_updates(&self) -> AppResult<Vec<GameUpdate>>;

    /// Everything needed to score `date`: settled predictions,
    /// closing lines and final results.
    async fn fetch_scoring_batch(&self, date: NaiveDate) -> AppResult<ScoringBatch>;
}

/// The chain-facing collaborator: reports block height, supplies the
/// UID partition, and accepts the emitted weight vector.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_height(&self) -> AppResult<u64>;

    async fn uid_snapshot(&self) -> AppResult<UidSnapshot>;

    async fn publish_weights(&self, weights: &[f64]) -> AppResult<()>;
}
