use std::collections::HashMap;

use crate::models::{ClosingLineOdds, GameResultRow, PredictionRow};

pub const DAILY_WAGER_CAP: f64 = 1_000.0;

const RISK_FREE_RATE: f64 = 0.0;
const MAX_SORTINO_RATIO: f64 = 10.0;
const SORTINO_EPSILON: f64 = 0.01;
const OUTLIER_SIGMA: f64 = 3.0;

/// Closing line value per participant: the average of
/// `predicted_odds / closing_odds` over the day's predictions.
/// Values above 1 mean the participant beat the closing market.
pub fn clv_scores(
    predictions: &[PredictionRow],
    closing_line_odds: &ClosingLineOdds,
    num_miners: usize,
) -> Vec<f64> {
    let mut scores = vec![0.0; num_miners];
    let mut counts = vec![0u32; num_miners];

    if predictions.is_empty() || closing_line_odds.is_empty() {
        tracing::error!("Predictions or closing line odds are empty");
        return scores;
    }

    let closing_by_game: HashMap<i64, &[f64]> = closing_line_odds
        .game_ids
        .iter()
        .zip(closing_line_odds.odds.iter())
        .map(|(&id, row)| (id, row.as_slice()))
        .collect();

    for pred in predictions {
        if pred.miner_uid >= num_miners {
            tracing::warn!("Invalid miner uid {}, skipping prediction", pred.miner_uid);
            continue;
        }
        let outcome = pred.predicted_outcome;
        let row = match closing_by_game.get(&pred.game_id) {
            Some(row) if outcome >= 0 && (outcome as usize) < row.len() => *row,
            _ => {
                tracing::warn!(
                    "Invalid game id or outcome for CLV: game {}, outcome {}",
                    pred.game_id,
                    outcome
                );
                continue;
            }
        };

        let closing_odds = row[outcome as usize];
        if closing_odds > 0.0 {
            let clv = pred.predicted_odds / closing_odds;
            if clv.is_finite() {
                scores[pred.miner_uid] += clv;
                counts[pred.miner_uid] += 1;
            } else {
                tracing::warn!(
                    "Non-finite CLV for miner {} on game {}",
                    pred.miner_uid,
                    pred.game_id
                );
            }
        } else if outcome == 2 {
            // No tie line offered for this game.
            continue;
        } else {
            tracing::warn!(
                "Closing odds are zero for game {}, outcome {}",
                pred.game_id,
                outcome
            );
        }
    }

    for uid in 0..num_miners {
        if counts[uid] > 0 {
            scores[uid] /= counts[uid] as f64;
        }
    }
    scores
}

/// Average return on investment per participant:
/// `(payout - wager) / wager` over predictions with a known result.
/// No normalization is applied.
pub fn roi_scores(
    predictions: &[PredictionRow],
    results: &[GameResultRow],
    num_miners: usize,
) -> Vec<f64> {
    let mut scores = vec![0.0; num_miners];
    let mut counts = vec![0u32; num_miners];

    if predictions.is_empty() || results.is_empty() {
        tracing::error!("Predictions or game results are empty");
        return scores;
    }

    let outcomes = results_by_game(results);

    for pred in predictions {
        if pred.miner_uid >= num_miners {
            tracing::warn!("Invalid miner uid {}, skipping prediction", pred.miner_uid);
            continue;
        }
        if !outcomes.contains_key(&pred.game_id) {
            tracing::error!(
                "No actual outcome for game {}, skipping ROI for miner {}",
                pred.game_id,
                pred.miner_uid
            );
            continue;
        }
        if pred.wager == 0.0 {
            tracing::error!(
                "Zero wager for miner {} on game {}, skipping ROI",
                pred.miner_uid,
                pred.game_id
            );
            continue;
        }

        let roi = (pred.payout - pred.wager) / pred.wager;
        if roi.is_finite() {
            scores[pred.miner_uid] += roi;
            counts[pred.miner_uid] += 1;
        } else {
            tracing::error!(
                "Non-finite ROI for miner {} on game {}",
                pred.miner_uid,
                pred.game_id
            );
        }
    }

    for uid in 0..num_miners {
        if counts[uid] > 0 {
            scores[uid] /= counts[uid] as f64;
        }
    }
    scores
}

/// Risk-adjusted return per participant. Returns beyond three sigma
/// of the participant's own mean are trimmed, downside deviation is
/// taken over the negative remainder, and an all-positive series
/// falls back to the Sharpe denominator. Capped at 10.
pub fn sortino_scores(
    predictions: &[PredictionRow],
    results: &[GameResultRow],
    num_miners: usize,
) -> Vec<f64> {
    let mut ratios = vec![0.0; num_miners];

    if predictions.is_empty() || results.is_empty() {
        tracing::error!("Predictions or game results are empty");
        return ratios;
    }

    let outcomes = results_by_game(results);
    let mut returns: Vec<Vec<f64>> = vec![Vec::new(); num_miners];

    for pred in predictions {
        if pred.miner_uid >= num_miners {
            tracing::warn!("Invalid miner uid {}, skipping prediction", pred.miner_uid);
            continue;
        }
        if !outcomes.contains_key(&pred.game_id) {
            tracing::error!(
                "No actual outcome for game {}, skipping Sortino input",
                pred.game_id
            );
            continue;
        }
        if pred.wager == 0.0 {
            tracing::error!(
                "Zero wager for miner {} on game {}, skipping Sortino input",
                pred.miner_uid,
                pred.game_id
            );
            continue;
        }
        returns[pred.miner_uid].push((pred.payout - pred.wager) / pred.wager - RISK_FREE_RATE);
    }

    for (uid, series) in returns.iter().enumerate() {
        if series.is_empty() {
            continue;
        }

        let series_mean = mean(series);
        let series_std = std_dev(series, series_mean);
        let trimmed: Vec<f64> = series
            .iter()
            .copied()
            .filter(|r| (r - series_mean).abs() <= OUTLIER_SIGMA * series_std)
            .collect();
        if trimmed.is_empty() {
            continue;
        }

        let average_return = mean(&trimmed);
        let downside: Vec<f64> = trimmed.iter().copied().filter(|&r| r < 0.0).collect();

        let ratio = if !downside.is_empty() {
            let downside_deviation =
                (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
            average_return / (downside_deviation + SORTINO_EPSILON)
        } else {
            // All returns positive: fall back to the Sharpe denominator.
            average_return / (std_dev(&trimmed, average_return) + SORTINO_EPSILON)
        };

        let ratio = ratio.min(MAX_SORTINO_RATIO);
        ratios[uid] = if ratio.is_nan() { 0.0 } else { ratio };
    }

    ratios
}

/// Fold the day's wagers into the wager column, clamping each
/// participant to the daily cap. Overflow beyond the cap only adds
/// the remaining slack and logs a cap event.
pub fn accumulate_wagers(predictions: &[PredictionRow], wager_col: &mut [f64]) {
    for pred in predictions {
        let uid = pred.miner_uid;
        if uid >= wager_col.len() {
            tracing::error!("Invalid miner uid {} in wager accounting", uid);
            continue;
        }
        if !pred.wager.is_finite() || pred.wager < 0.0 {
            tracing::error!("Malformed wager {} for miner {}, skipping", pred.wager, uid);
            continue;
        }

        let current = wager_col[uid];
        if current + pred.wager > DAILY_WAGER_CAP {
            let capped = DAILY_WAGER_CAP - current;
            if capped > 0.0 {
                tracing::warn!("Capping daily wager for miner {} to {}", uid, capped);
                wager_col[uid] += capped;
            } else {
                tracing::warn!("Daily wager cap reached for miner {}, wager not added", uid);
            }
        } else {
            wager_col[uid] += pred.wager;
        }
    }
}

fn results_by_game(results: &[GameResultRow]) -> HashMap<i64, i64> {
    results
        .iter()
        .map(|r| (r.game_id, r.actual_outcome))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(uid: usize, game: i64, outcome: i64, odds: f64, payout: f64, wager: f64) -> PredictionRow {
        PredictionRow {
            miner_uid: uid,
            game_id: game,
            predicted_outcome: outcome,
            predicted_odds: odds,
            payout,
            wager,
        }
    }

    fn closing(rows: Vec<(i64, Vec<f64>)>) -> ClosingLineOdds {
        ClosingLineOdds {
            game_ids: rows.iter().map(|(id, _)| *id).collect(),
            odds: rows.into_iter().map(|(_, o)| o).collect(),
        }
    }

    #[test]
    fn test_clv_average_and_matching_odds() {
        let predictions = vec![
            row(0, 1, 0, 2.0, 0.0, 100.0),
            row(0, 2, 1, 3.0, 0.0, 100.0),
            row(1, 1, 0, 1.5, 0.0, 100.0),
        ];
        let odds = closing(vec![(1, vec![2.0, 2.0, 0.0]), (2, vec![2.0, 2.0, 0.0])]);

        let scores = clv_scores(&predictions, &odds, 4);
        // Miner 0: (2.0/2.0 + 3.0/2.0) / 2 = 1.25.
        assert!((scores[0] - 1.25).abs() < 1e-9);
        // Miner 1 predicted exactly the closing line.
        assert!((scores[1] - 0.75).abs() < 1e-9);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_clv_skips_missing_tie_line_silently() {
        let predictions = vec![row(0, 1, 2, 3.2, 0.0, 100.0), row(1, 1, 0, 2.0, 0.0, 100.0)];
        let odds = closing(vec![(1, vec![2.0, 2.0, 0.0])]);

        let scores = clv_scores(&predictions, &odds, 2);
        assert_eq!(scores[0], 0.0);
        assert!((scores[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clv_skips_unknown_game_and_bad_outcome() {
        let predictions = vec![row(0, 99, 0, 2.0, 0.0, 100.0), row(0, 1, 7, 2.0, 0.0, 100.0)];
        let odds = closing(vec![(1, vec![2.0, 2.0, 0.0])]);
        let scores = clv_scores(&predictions, &odds, 2);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn test_roi_average_skips_zero_wager() {
        let predictions = vec![
            row(0, 1, 0, 2.0, 200.0, 100.0), // +1.0
            row(0, 2, 0, 2.0, 0.0, 100.0),   // -1.0
            row(1, 1, 0, 2.0, 150.0, 0.0),   // zero wager, skipped
            row(2, 3, 0, 2.0, 90.0, 60.0),   // 0.5
        ];
        let results = vec![
            GameResultRow { game_id: 1, actual_outcome: 0 },
            GameResultRow { game_id: 2, actual_outcome: 1 },
            GameResultRow { game_id: 3, actual_outcome: 0 },
        ];

        let scores = roi_scores(&predictions, &results, 4);
        assert!((scores[0] - 0.0).abs() < 1e-9);
        assert_eq!(scores[1], 0.0);
        assert!((scores[2] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_roi_skips_unknown_result() {
        let predictions = vec![row(0, 42, 0, 2.0, 200.0, 100.0)];
        let results = vec![GameResultRow { game_id: 1, actual_outcome: 0 }];
        let scores = roi_scores(&predictions, &results, 2);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn test_sortino_downside_deviation() {
        // Returns: +1.0, -0.5, -0.5 -> mean 0, downside sqrt(0.25).
        let predictions = vec![
            row(0, 1, 0, 2.0, 200.0, 100.0),
            row(0, 2, 0, 2.0, 50.0, 100.0),
            row(0, 3, 0, 2.0, 50.0, 100.0),
        ];
        let results = (1..=3)
            .map(|g| GameResultRow { game_id: g, actual_outcome: 0 })
            .collect::<Vec<_>>();

        let scores = sortino_scores(&predictions, &results, 1);
        let expected = 0.0 / (0.5 + SORTINO_EPSILON);
        assert!((scores[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sortino_sharpe_fallback_and_cap() {
        // Single winning bet: fallback denominator is 0 + epsilon,
        // ratio 1.0 / 0.01 = 100, capped at 10.
        let predictions = vec![row(0, 1, 0, 2.0, 200.0, 100.0)];
        let results = vec![GameResultRow { game_id: 1, actual_outcome: 0 }];

        let scores = sortino_scores(&predictions, &results, 1);
        assert_eq!(scores[0], MAX_SORTINO_RATIO);
    }

    #[test]
    fn test_sortino_trims_outliers() {
        // Nineteen modest returns and one absurd spike; the spike
        // sits beyond three sigma and must not dominate the ratio.
        let mut predictions: Vec<PredictionRow> = (1..=19)
            .map(|g| row(0, g, 0, 2.0, 105.0, 100.0))
            .collect();
        predictions.push(row(0, 20, 0, 2.0, 100_000.0, 100.0));
        let results: Vec<GameResultRow> = (1..=20)
            .map(|g| GameResultRow { game_id: g, actual_outcome: 0 })
            .collect();

        let scores = sortino_scores(&predictions, &results, 1);
        // Post-trim series is all +0.05: Sharpe fallback with a zero
        // denominator collapses to 0.05 / 0.01.
        assert!((scores[0] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_wager_cap_exact() {
        let predictions: Vec<PredictionRow> =
            (0..10).map(|g| row(0, g, 0, 2.0, 0.0, 200.0)).collect();
        let mut col = vec![0.0; 2];
        accumulate_wagers(&predictions, &mut col);
        assert_eq!(col[0], DAILY_WAGER_CAP);
        assert_eq!(col[1], 0.0);
    }

    #[test]
    fn test_wager_partial_cap_adds_slack() {
        let predictions = vec![row(0, 1, 0, 2.0, 0.0, 900.0), row(0, 2, 0, 2.0, 0.0, 400.0)];
        let mut col = vec![0.0; 1];
        accumulate_wagers(&predictions, &mut col);
        assert_eq!(col[0], DAILY_WAGER_CAP);
    }

    #[test]
    fn test_wager_skips_malformed() {
        let predictions = vec![
            row(0, 1, 0, 2.0, 0.0, f64::NAN),
            row(0, 2, 0, 2.0, 0.0, -50.0),
            row(0, 3, 0, 2.0, 0.0, 100.0),
        ];
        let mut col = vec![0.0; 1];
        accumulate_wagers(&predictions, &mut col);
        assert_eq!(col[0], 100.0);
    }
}
