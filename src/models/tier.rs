use serde::{Deserialize, Serialize};

/// Tier cell values: 0 = empty slot, 1 = invalid UID, 2..=6 = active
/// tiers 1 through 5.
pub const NUM_TIERS: usize = 7;
pub const TIER_EMPTY: u8 = 0;
pub const TIER_INVALID: u8 = 1;
pub const FIRST_ACTIVE_TIER: u8 = 2;
pub const LAST_ACTIVE_TIER: u8 = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    /// Rolling scoring window in days.
    pub window: usize,
    /// Minimum cumulative wager over `window` days to hold the tier.
    pub min_wager: f64,
    /// Maximum number of members.
    pub capacity: usize,
    /// Fraction of the reward pool captured by the tier collectively.
    pub incentive: f64,
}

/// Static tier table, indexed by tier cell value. Capacities scale
/// with the network size the way the reward pool is partitioned:
/// everyone fits in tier 1, the top tiers are progressively scarcer.
pub fn tier_configs(num_miners: usize) -> [TierConfig; NUM_TIERS] {
    let capacity = |frac: f64| (num_miners as f64 * frac) as usize;
    [
        // Empty slots
        TierConfig {
            window: 0,
            min_wager: 0.0,
            capacity: capacity(1.0),
            incentive: 0.0,
        },
        // Invalid UIDs
        TierConfig {
            window: 0,
            min_wager: 0.0,
            capacity: capacity(1.0),
            incentive: 0.0,
        },
        // Tier 1
        TierConfig {
            window: 3,
            min_wager: 0.0,
            capacity: capacity(1.0),
            incentive: 0.10,
        },
        // Tier 2
        TierConfig {
            window: 7,
            min_wager: 4_000.0,
            capacity: capacity(0.2),
            incentive: 0.15,
        },
        // Tier 3
        TierConfig {
            window: 15,
            min_wager: 10_000.0,
            capacity: capacity(0.2),
            incentive: 0.20,
        },
        // Tier 4
        TierConfig {
            window: 30,
            min_wager: 20_000.0,
            capacity: capacity(0.1),
            incentive: 0.25,
        },
        // Tier 5
        TierConfig {
            window: 45,
            min_wager: 35_000.0,
            capacity: capacity(0.05),
            incentive: 0.30,
        },
    ]
}

/// Label for a slice of the composite tensor, used as the scores
/// table `score_type` key. Slice 0 is the daily composite; slices
/// 1..=5 are the tier-windowed rolling means.
pub fn score_type_label(slice: usize) -> &'static str {
    match slice {
        0 => "daily",
        1 => "tier_1",
        2 => "tier_2",
        3 => "tier_3",
        4 => "tier_4",
        5 => "tier_5",
        _ => "unknown",
    }
}

pub fn score_type_slice(label: &str) -> Option<usize> {
    match label {
        "daily" => Some(0),
        "tier_1" => Some(1),
        "tier_2" => Some(2),
        "tier_3" => Some(3),
        "tier_4" => Some(4),
        "tier_5" => Some(5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacities_scale_with_network_size() {
        let configs = tier_configs(256);
        assert_eq!(configs[2].capacity, 256);
        assert_eq!(configs[3].capacity, 51);
        assert_eq!(configs[4].capacity, 51);
        assert_eq!(configs[5].capacity, 25);
        assert_eq!(configs[6].capacity, 12);
    }

    #[test]
    fn test_windows_ascend_with_tier() {
        let configs = tier_configs(256);
        let windows: Vec<usize> = configs[2..].iter().map(|c| c.window).collect();
        assert_eq!(windows, vec![3, 7, 15, 30, 45]);
    }

    #[test]
    fn test_score_type_round_trip() {
        for slice in 0..6 {
            let label = score_type_label(slice);
            assert_eq!(score_type_slice(label), Some(slice));
        }
        assert_eq!(score_type_slice("tier_9"), None);
    }
}
