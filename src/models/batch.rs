use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One settled prediction row as delivered by the data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRow {
    pub miner_uid: usize,
    pub game_id: i64,
    pub predicted_outcome: i64,
    pub predicted_odds: f64,
    pub payout: f64,
    pub wager: f64,
}

/// Final market odds per game, row order parallel to `game_ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosingLineOdds {
    pub game_ids: Vec<i64>,
    pub odds: Vec<Vec<f64>>,
}

impl ClosingLineOdds {
    pub fn is_empty(&self) -> bool {
        self.game_ids.is_empty()
    }

    pub fn row_for(&self, game_id: i64) -> Option<&[f64]> {
        self.game_ids
            .iter()
            .position(|&id| id == game_id)
            .map(|idx| self.odds[idx].as_slice())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GameResultRow {
    pub game_id: i64,
    pub actual_outcome: i64,
}

/// Everything a scoring tick consumes, fetched from the feed in one
/// call so the tick itself stays synchronous.
#[derive(Debug, Clone, Default)]
pub struct ScoringBatch {
    pub predictions: Vec<PredictionRow>,
    pub closing_line_odds: ClosingLineOdds,
    pub results: Vec<GameResultRow>,
}

impl ScoringBatch {
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
            || self.closing_line_odds.is_empty()
            || self.results.is_empty()
    }
}

/// Incremental game-lifecycle events applied between ticks by the
/// ingestion job.
#[derive(Debug, Clone)]
pub enum GameUpdate {
    NewGame {
        game_id: i64,
        odds: Vec<f64>,
    },
    PredictionPlaced {
        prediction_id: Uuid,
        miner_uid: usize,
        game_id: i64,
        predicted_outcome: i64,
        predicted_odds: f64,
        wager: f64,
        placed_at: DateTime<Utc>,
    },
    GameClosed {
        game_id: i64,
    },
}
