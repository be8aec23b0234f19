use crate::models::tier_configs;

use super::buffer::{Metric, ScoreBuffer};

pub const CLV_WEIGHT: f64 = 0.30;
pub const ROI_WEIGHT: f64 = 0.30;
pub const SORTINO_WEIGHT: f64 = 0.30;
pub const ENTROPY_WEIGHT: f64 = 0.10;

/// Fold the current day's raw metrics into the daily composite
/// (slice 0), then refresh the tier-windowed rolling means (slices
/// 1..=5). Raw components are combined unnormalized.
pub fn update_composites(buffer: &mut ScoreBuffer) {
    let day = buffer.current_day;
    let num_miners = buffer.num_miners();
    let configs = tier_configs(num_miners);

    for uid in 0..num_miners {
        let daily = CLV_WEIGHT * buffer.metric_cell(Metric::Clv, uid, day)
            + ROI_WEIGHT * buffer.metric_cell(Metric::Roi, uid, day)
            + SORTINO_WEIGHT * buffer.metric_cell(Metric::Sortino, uid, day)
            + ENTROPY_WEIGHT * buffer.metric_cell(Metric::Entropy, uid, day);
        buffer.set_composite(uid, day, 0, daily);
    }

    // Tier slice k averages the daily composite over tier k's window.
    for slice in 1..=5 {
        let window = configs[slice + 1].window;
        for uid in 0..num_miners {
            let rolling = buffer.rolling_composite_mean(uid, window);
            buffer.set_composite(uid, day, slice, rolling);
        }
    }

    tracing::debug!("Composite scores updated for day {}", day);
}
