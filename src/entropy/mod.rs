pub mod snapshot;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use snapshot::EntropySnapshot;

pub const EPSILON: f64 = 1e-8;

const SIMILARITY_WEIGHT: f64 = 0.6;
const CONTRARIAN_WEIGHT: f64 = 0.4;

/// One wager sitting in an outcome pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub prediction_id: Uuid,
    pub miner_uid: usize,
    pub odds: f64,
    pub wager: f64,
    pub placed_at: DateTime<Utc>,
    pub entropy_contribution: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomePool {
    pub predictions: Vec<PoolEntry>,
    pub entropy_score: f64,
}

/// Entropy-based diversity scorer.
///
/// Tracks one pool per (game, outcome), scores every incoming
/// prediction for how much it disperses from the crowd (timing,
/// stake size, outcome popularity), and folds the contributions into
/// a per-participant daily vector. Games transition open -> closed
/// -> reaped; the reap sweep is opportunistic and only runs inside
/// `current_scores`.
#[derive(Debug)]
pub struct EntropyEngine {
    num_miners: usize,
    max_days: usize,
    pub current_day: usize,
    game_pools: BTreeMap<i64, BTreeMap<i64, OutcomePool>>,
    closed_games: BTreeSet<i64>,
    game_close_times: BTreeMap<i64, DateTime<Utc>>,
    /// Day-major M x D matrix of the most recent per-day score
    /// vectors, carried in the snapshot.
    scores: Vec<f64>,
    snapshot_path: PathBuf,
}

impl EntropyEngine {
    pub fn new(num_miners: usize, max_days: usize, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            num_miners,
            max_days,
            current_day: 0,
            game_pools: BTreeMap::new(),
            closed_games: BTreeSet::new(),
            game_close_times: BTreeMap::new(),
            scores: vec![0.0; num_miners * max_days],
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Construct and restore from the snapshot file when one exists.
    /// A missing or corrupt snapshot is logged and replaced with
    /// fresh state.
    pub fn restore(num_miners: usize, max_days: usize, snapshot_path: impl Into<PathBuf>) -> Self {
        let mut engine = Self::new(num_miners, max_days, snapshot_path);
        match snapshot::read_snapshot(&engine.snapshot_path) {
            Ok(Some(snap)) => {
                engine.apply_snapshot(snap);
                tracing::info!(
                    "Entropy state restored from {}",
                    engine.snapshot_path.display()
                );
            }
            Ok(None) => {
                tracing::warn!(
                    "No entropy state at {}, starting fresh",
                    engine.snapshot_path.display()
                );
            }
            Err(e) => {
                tracing::error!("Failed to load entropy state, starting fresh: {}", e);
            }
        }
        engine
    }

    pub fn num_miners(&self) -> usize {
        self.num_miners
    }

    pub fn game_count(&self) -> usize {
        self.game_pools.len()
    }

    pub fn has_game(&self, game_id: i64) -> bool {
        self.game_pools.contains_key(&game_id)
    }

    pub fn is_closed(&self, game_id: i64) -> bool {
        self.closed_games.contains(&game_id)
    }

    pub fn outcome_pool(&self, game_id: i64, outcome: i64) -> Option<&OutcomePool> {
        self.game_pools.get(&game_id).and_then(|p| p.get(&outcome))
    }

    /// Register a game and seed each outcome pool with the entropy
    /// implied by its opening odds. A 3-column odds row whose third
    /// column is zero is a two-outcome game (no tie line offered).
    pub fn add_new_game(&mut self, game_id: i64, odds: &[f64]) {
        if self.game_pools.contains_key(&game_id) {
            tracing::warn!("Game {} already exists, skipping", game_id);
            return;
        }

        let num_outcomes = if odds.len() == 3 && odds[2] == 0.0 {
            2
        } else {
            odds.len()
        };

        let mut pools = BTreeMap::new();
        for (i, &o) in odds.iter().enumerate().take(num_outcomes) {
            pools.insert(
                i as i64,
                OutcomePool {
                    predictions: Vec::new(),
                    entropy_score: initial_entropy(o),
                },
            );
        }
        self.game_pools.insert(game_id, pools);

        tracing::debug!(
            "Added game {} with {} outcomes, odds {:?}",
            game_id,
            num_outcomes,
            odds
        );
    }

    /// Mark a game closed and stamp the close time. Closing twice or
    /// closing an unknown game only warns.
    pub fn close_game(&mut self, game_id: i64) {
        self.close_game_at(game_id, Utc::now());
    }

    pub fn close_game_at(&mut self, game_id: i64, close_time: DateTime<Utc>) {
        if !self.game_pools.contains_key(&game_id) {
            tracing::error!("Game {} does not exist, cannot close", game_id);
            return;
        }
        if self.closed_games.contains(&game_id) {
            tracing::warn!("Game {} is already closed", game_id);
            return;
        }
        self.closed_games.insert(game_id);
        self.game_close_times.insert(game_id, close_time);
        tracing::info!("Game {} marked as closed", game_id);
    }

    /// Score a prediction against its pool and append it. Invalid
    /// input (unknown game or outcome, closed game) is logged and
    /// dropped; nothing escapes as an error.
    #[allow(clippy::too_many_arguments)]
    pub fn add_prediction(
        &mut self,
        prediction_id: Uuid,
        miner_uid: usize,
        game_id: i64,
        predicted_outcome: i64,
        wager: f64,
        predicted_odds: f64,
        placed_at: DateTime<Utc>,
    ) {
        let Some(pools) = self.game_pools.get(&game_id) else {
            tracing::error!("Game {} does not exist, cannot add prediction", game_id);
            return;
        };
        if !pools.contains_key(&predicted_outcome) {
            tracing::error!(
                "Invalid outcome {} for game {} (available: {:?})",
                predicted_outcome,
                game_id,
                pools.keys().collect::<Vec<_>>()
            );
            return;
        }
        if self.closed_games.contains(&game_id) {
            tracing::warn!("Game {} is closed, cannot add prediction", game_id);
            return;
        }
        if miner_uid >= self.num_miners {
            tracing::error!("Miner uid {} out of range, skipping prediction", miner_uid);
            return;
        }

        let entropy_contribution =
            self.entropy_contribution(game_id, predicted_outcome, miner_uid, wager, placed_at);

        if let Some(pool) = self
            .game_pools
            .get_mut(&game_id)
            .and_then(|p| p.get_mut(&predicted_outcome))
        {
            pool.predictions.push(PoolEntry {
                prediction_id,
                miner_uid,
                odds: predicted_odds,
                wager,
                placed_at,
                entropy_contribution,
            });
        }

        tracing::debug!(
            "Added prediction for game {}, outcome {} by miner {} (contribution {:.4})",
            game_id,
            predicted_outcome,
            miner_uid,
            entropy_contribution
        );
        self.persist();
    }

    /// Combined diversity score in [-1, 1]: dispersion from the
    /// crowd already in this pool plus a contrarian bonus for
    /// backing the less popular outcome.
    fn entropy_contribution(
        &self,
        game_id: i64,
        predicted_outcome: i64,
        miner_uid: usize,
        wager: f64,
        placed_at: DateTime<Utc>,
    ) -> f64 {
        let similarity =
            self.prediction_similarity(game_id, predicted_outcome, miner_uid, wager, placed_at);
        let contrarian = self.contrarian_component(game_id, predicted_outcome);

        (SIMILARITY_WEIGHT * similarity + CONTRARIAN_WEIGHT * contrarian).clamp(-1.0, 1.0)
    }

    /// Mean of a time sub-similarity and a wager sub-similarity,
    /// each measured against the other miners' entries in the same
    /// pool. With no other miners present both default to 1.0.
    fn prediction_similarity(
        &self,
        game_id: i64,
        predicted_outcome: i64,
        miner_uid: usize,
        wager: f64,
        placed_at: DateTime<Utc>,
    ) -> f64 {
        let pool = &self.game_pools[&game_id][&predicted_outcome];
        let others: Vec<&PoolEntry> = pool
            .predictions
            .iter()
            .filter(|p| p.miner_uid != miner_uid)
            .collect();

        let time_similarity = if others.is_empty() {
            1.0
        } else {
            let earliest = others.iter().map(|p| p.placed_at).min().unwrap();
            let latest = others.iter().map(|p| p.placed_at).max().unwrap();
            let range = (latest - earliest).num_milliseconds() as f64 / 1000.0 + EPSILON;
            let offset = (placed_at - earliest).num_milliseconds() as f64 / 1000.0;
            1.0 - offset.abs() / range
        };

        let wager_similarity = if others.is_empty() {
            1.0
        } else {
            let min_wager = others.iter().map(|p| p.wager).fold(f64::INFINITY, f64::min);
            let max_wager = others
                .iter()
                .map(|p| p.wager)
                .fold(f64::NEG_INFINITY, f64::max);
            let range = max_wager - min_wager + EPSILON;
            1.0 - (wager - min_wager).abs() / range
        };

        (time_similarity + wager_similarity) / 2.0
    }

    /// Centered contrarian score. The square root stretches the top
    /// of the scale so thinly backed outcomes separate from merely
    /// unpopular ones. A game with no predictions at all scores the
    /// neutral 0.5.
    fn contrarian_component(&self, game_id: i64, predicted_outcome: i64) -> f64 {
        let pools = &self.game_pools[&game_id];
        let total: usize = pools.values().map(|p| p.predictions.len()).sum();
        if total == 0 {
            return 0.5;
        }

        let outcome_count = pools[&predicted_outcome].predictions.len();
        let ratio = outcome_count as f64 / total as f64;
        let contrarian = (1.0 - ratio).clamp(0.0, 1.0);

        contrarian.sqrt() - 0.5
    }

    /// Current-day diversity vector over all miners for the listed
    /// games, normalized by its maximum when positive. Also fires
    /// the opportunistic reap sweep for stale closed games; if this
    /// is never called, sweeping is deferred.
    pub fn current_scores(&mut self, day: usize, game_ids: &[i64]) -> Vec<f64> {
        self.current_scores_at(day, game_ids, Utc::now())
    }

    pub fn current_scores_at(
        &mut self,
        day: usize,
        game_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Vec<f64> {
        tracing::debug!("Computing diversity scores for day {}", day);

        let mut scores = vec![0.0; self.num_miners];
        for game_id in game_ids {
            if let Some(pools) = self.game_pools.get(game_id) {
                for pool in pools.values() {
                    for prediction in &pool.predictions {
                        // A snapshot from a larger network may carry
                        // out-of-range UIDs.
                        if prediction.miner_uid < self.num_miners {
                            scores[prediction.miner_uid] += prediction.entropy_contribution;
                        }
                    }
                }
            }
        }

        let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max_score > 0.0 {
            for score in scores.iter_mut() {
                *score /= max_score;
            }
        }

        self.current_day = day % self.max_days;
        let start = self.current_day * self.num_miners;
        self.scores[start..start + self.num_miners].copy_from_slice(&scores);

        self.reap_closed_games(now);

        scores
    }

    /// Clear pools for games closed more than one day ago and drop
    /// them from the closed set.
    fn reap_closed_games(&mut self, now: DateTime<Utc>) {
        let stale: Vec<i64> = self
            .closed_games
            .iter()
            .copied()
            .filter(|game_id| {
                self.game_close_times
                    .get(game_id)
                    .map(|closed| now - *closed > Duration::days(1))
                    .unwrap_or(false)
            })
            .collect();

        for game_id in stale {
            if let Some(pools) = self.game_pools.get_mut(&game_id) {
                for (outcome, pool) in pools.iter_mut() {
                    pool.predictions.clear();
                    pool.entropy_score = 0.0;
                    tracing::info!(
                        "Cleared predictions for closed game {}, outcome {}",
                        game_id,
                        outcome
                    );
                }
            }
            self.closed_games.remove(&game_id);
            self.game_close_times.remove(&game_id);
            tracing::info!("Reaped closed game {}", game_id);
        }
    }

    pub fn reset(&mut self) {
        self.current_day = 0;
        self.game_pools.clear();
        self.closed_games.clear();
        self.game_close_times.clear();
        self.scores.fill(0.0);
    }

    /// Write the snapshot file; failures are logged, never raised.
    pub fn persist(&self) {
        if let Err(e) = snapshot::write_snapshot(&self.snapshot_path, &self.to_snapshot()) {
            tracing::error!(
                "Failed to persist entropy state to {}: {}",
                self.snapshot_path.display(),
                e
            );
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn to_snapshot(&self) -> EntropySnapshot {
        EntropySnapshot {
            current_day: self.current_day,
            game_pools: self.game_pools.clone(),
            closed_games: self.closed_games.iter().copied().collect(),
            game_close_times: self.game_close_times.clone(),
            ebdr_scores: self.scores.clone(),
        }
    }

    pub fn apply_snapshot(&mut self, snap: EntropySnapshot) {
        self.current_day = snap.current_day % self.max_days;
        self.game_pools = snap.game_pools;
        self.closed_games = snap.closed_games.into_iter().collect();
        self.game_close_times = snap.game_close_times;
        if snap.ebdr_scores.len() == self.scores.len() {
            self.scores = snap.ebdr_scores;
        } else {
            tracing::warn!(
                "Snapshot score matrix has {} cells, expected {}; keeping zeros",
                snap.ebdr_scores.len(),
                self.scores.len()
            );
        }
    }
}

/// Entropy implied by opening odds: `-p log2(p)` with the implied
/// probability `p = 1/(odds + eps)` clamped to [0, 1]. Non-positive
/// odds carry no information and score zero.
pub fn initial_entropy(odds: f64) -> f64 {
    if odds <= 0.0 {
        return 0.0;
    }
    let prob = (1.0 / (odds + EPSILON)).clamp(0.0, 1.0);
    let entropy = -prob * (prob + EPSILON).log2();
    entropy.max(EPSILON)
}
