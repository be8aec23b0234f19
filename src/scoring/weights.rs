use crate::models::{tier_configs, UidPartition, FIRST_ACTIVE_TIER, LAST_ACTIVE_TIER, NUM_TIERS};

use super::buffer::ScoreBuffer;

/// Synthesize the reward weight vector for the current day.
///
/// Each active tier's normalized incentive share is split across its
/// members by min-max-normalized daily composite, then the whole
/// vector is renormalized to sum to one. Invalid and empty UIDs are
/// forced to zero. Returns an all-zero vector when no valid
/// participant holds an active tier.
pub fn synthesize(buffer: &ScoreBuffer, partition: &UidPartition) -> Vec<f64> {
    let num_miners = buffer.num_miners();
    let day = buffer.current_day;
    let configs = tier_configs(num_miners);
    let mut weights = vec![0.0; num_miners];

    let tier_col = buffer.tier_col(day);

    // Valid participants currently holding an active tier.
    let valid_active: Vec<usize> = (0..num_miners)
        .filter(|&uid| {
            partition.valid.contains(uid)
                && tier_col[uid] >= FIRST_ACTIVE_TIER
                && tier_col[uid] <= LAST_ACTIVE_TIER
        })
        .collect();

    if valid_active.is_empty() {
        tracing::warn!("No valid miners in active tiers, returning zero weights");
        return weights;
    }

    let incentives: Vec<f64> = (FIRST_ACTIVE_TIER as usize..NUM_TIERS)
        .map(|t| configs[t].incentive)
        .collect();
    let total_incentive: f64 = incentives.iter().sum();
    let normalized_incentives: Vec<f64> = if total_incentive > 0.0 {
        incentives.iter().map(|i| i / total_incentive).collect()
    } else {
        vec![0.0; incentives.len()]
    };

    for tier in FIRST_ACTIVE_TIER..=LAST_ACTIVE_TIER {
        let members: Vec<usize> = (0..num_miners)
            .filter(|&uid| tier_col[uid] == tier)
            .collect();
        if members.is_empty() {
            continue;
        }

        let scores: Vec<f64> = members
            .iter()
            .map(|&uid| buffer.composite(uid, day, 0))
            .collect();
        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max_score - min_score;

        let incentive_factor = normalized_incentives[(tier - FIRST_ACTIVE_TIER) as usize];
        for (&uid, &score) in members.iter().zip(scores.iter()) {
            let normalized = if range != 0.0 {
                (score - min_score) / range
            } else {
                0.0
            };
            weights[uid] = normalized * incentive_factor;
        }
        tracing::debug!(
            "Tier {} weights assigned to {} member(s)",
            tier - 1,
            members.len()
        );
    }

    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    } else {
        // Flat composites everywhere: split the pool evenly across
        // the valid active set.
        let share = 1.0 / valid_active.len() as f64;
        for &uid in &valid_active {
            weights[uid] = share;
        }
    }

    // The partition always wins over tier bookkeeping.
    for uid in 0..num_miners {
        if partition.invalid.contains(uid) || partition.empty.contains(uid) {
            weights[uid] = 0.0;
        }
    }
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    } else if partition.valid.count() > 0 {
        let share = 1.0 / partition.valid.count() as f64;
        for uid in partition.valid.iter() {
            weights[uid] = share;
        }
    }

    weights
}
