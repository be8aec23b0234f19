use std::cmp::Ordering;

use crate::models::{
    tier_configs, TierConfig, UidPartition, FIRST_ACTIVE_TIER, LAST_ACTIVE_TIER, NUM_TIERS,
    TIER_EMPTY, TIER_INVALID,
};

use super::buffer::ScoreBuffer;

/// Run the tier lifecycle for the current day: demotion cascade,
/// promotion and swapping into higher tiers, then backfill of empty
/// slots. Operates on a working copy of the day's tier column and
/// writes it back, re-stamping invalid UIDs last so the partition
/// always wins over any mis-promotion.
pub fn manage_tiers(buffer: &mut ScoreBuffer, partition: &UidPartition) {
    tracing::info!("Managing tiers");
    let day = buffer.current_day;
    let num_miners = buffer.num_miners();
    let configs = tier_configs(num_miners);

    let mut tiers = buffer.tier_col(day).to_vec();
    tracing::debug!(
        "Tier distribution before management: {:?}",
        tier_distribution(&tiers)
    );

    // Step 1: demote everyone whose window wager fell below their
    // tier's floor, cascading downward until the requirement holds.
    for tier in (FIRST_ACTIVE_TIER..=LAST_ACTIVE_TIER).rev() {
        for uid in 0..num_miners {
            if tiers[uid] == tier && !meets_tier_requirements(buffer, uid, tier, &configs) {
                cascade_demotion(buffer, uid, tier, &mut tiers, partition, &configs);
            }
        }
    }

    // Step 2: promote into open capacity, or swap against the
    // weakest incumbents when the next tier is full.
    promote_and_swap(buffer, &mut tiers, &configs);

    // Step 3: backfill remaining open slots from lower active tiers.
    for tier in FIRST_ACTIVE_TIER..NUM_TIERS as u8 {
        fill_empty_slots(buffer, tier, &mut tiers, &configs[tier as usize]);
    }

    buffer.tier_col_mut(day).copy_from_slice(&tiers);

    for uid in partition.invalid.iter() {
        buffer.set_tier(uid, day, TIER_EMPTY);
    }

    tracing::info!(
        "Tier distribution after management: {:?}",
        tier_distribution(buffer.tier_col(day))
    );
}

/// A participant holds a tier as long as its cumulative wager over
/// the tier's window clears the tier's minimum.
pub fn meets_tier_requirements(
    buffer: &ScoreBuffer,
    uid: usize,
    tier: u8,
    configs: &[TierConfig; NUM_TIERS],
) -> bool {
    let config = &configs[tier as usize];
    buffer.cumulative_wager(uid, config.window) >= config.min_wager
}

/// Demote one tier at a time until the requirement holds. Valid
/// participants never drop below the first active tier; everyone
/// else bottoms out at the invalid tier.
fn cascade_demotion(
    buffer: &ScoreBuffer,
    uid: usize,
    current_tier: u8,
    tiers: &mut [u8],
    partition: &UidPartition,
    configs: &[TierConfig; NUM_TIERS],
) {
    let floor = if partition.valid.contains(uid) {
        FIRST_ACTIVE_TIER
    } else {
        TIER_INVALID
    };
    let new_tier = (current_tier - 1).max(floor);
    tiers[uid] = new_tier;
    tracing::info!("Miner {} demoted to tier {}", uid, new_tier as i32 - 1);

    if new_tier > floor && !meets_tier_requirements(buffer, uid, new_tier, configs) {
        cascade_demotion(buffer, uid, new_tier, tiers, partition, configs);
    }
}

fn promote_and_swap(buffer: &ScoreBuffer, tiers: &mut [u8], configs: &[TierConfig; NUM_TIERS]) {
    let day = buffer.current_day;

    for tier in FIRST_ACTIVE_TIER..LAST_ACTIVE_TIER {
        let next_tier = tier + 1;
        let current_members: Vec<usize> = members_of(tiers, tier);
        let next_members: Vec<usize> = members_of(tiers, next_tier);

        let capacity = configs[next_tier as usize].capacity;
        let open_slots = capacity as i64 - next_members.len() as i64;

        if open_slots > 0 {
            let mut eligible: Vec<usize> = current_members
                .into_iter()
                .filter(|&uid| meets_tier_requirements(buffer, uid, next_tier, configs))
                .collect();
            tracing::debug!("Tier {}: eligible for promotion: {:?}", tier - 1, eligible);

            // Best candidates first; ties resolve to the lower UID.
            eligible.sort_by(|&a, &b| {
                score_of(buffer, b, day, tier)
                    .partial_cmp(&score_of(buffer, a, day, tier))
                    .unwrap_or(Ordering::Equal)
            });

            for &uid in eligible.iter().take(open_slots as usize) {
                tiers[uid] = next_tier;
                tracing::info!("Miner {} promoted to tier {}", uid, next_tier as i32 - 1);
            }
        } else if !next_members.is_empty() {
            // Full tier: pair challengers and incumbents weakest
            // first and swap while each pair improves, stopping at
            // the first pair that does not.
            let mut challengers = current_members;
            challengers.sort_by(|&a, &b| {
                score_of(buffer, a, day, tier)
                    .partial_cmp(&score_of(buffer, b, day, tier))
                    .unwrap_or(Ordering::Equal)
            });
            let mut incumbents = next_members;
            incumbents.sort_by(|&a, &b| {
                score_of(buffer, a, day, next_tier)
                    .partial_cmp(&score_of(buffer, b, day, next_tier))
                    .unwrap_or(Ordering::Equal)
            });

            for (&challenger, &incumbent) in challengers.iter().zip(incumbents.iter()) {
                let challenger_score = score_of(buffer, challenger, day, tier);
                let incumbent_score = score_of(buffer, incumbent, day, next_tier);

                if challenger_score > incumbent_score
                    && meets_tier_requirements(buffer, challenger, next_tier, configs)
                {
                    tiers[challenger] = next_tier;
                    tiers[incumbent] = tier;
                    tracing::info!(
                        "Swapped miner {} (promoted to tier {}) with miner {} (demoted to tier {})",
                        challenger,
                        next_tier as i32 - 1,
                        incumbent,
                        tier as i32 - 1
                    );
                } else {
                    break;
                }
            }
        }
    }
}

/// Promote the best qualifying members of lower active tiers into
/// `tier` until it reaches capacity.
fn fill_empty_slots(buffer: &ScoreBuffer, tier: u8, tiers: &mut [u8], config: &TierConfig) {
    if tier <= TIER_INVALID {
        return;
    }
    let day = buffer.current_day;
    let configs = tier_configs(buffer.num_miners());

    let current_members = members_of(tiers, tier).len();
    let open_slots = config.capacity as i64 - current_members as i64;
    if open_slots <= 0 {
        return;
    }

    let mut eligible: Vec<usize> = (0..tiers.len())
        .filter(|&uid| {
            tiers[uid] >= FIRST_ACTIVE_TIER
                && tiers[uid] < tier
                && meets_tier_requirements(buffer, uid, tier, &configs)
        })
        .collect();

    eligible.sort_by(|&a, &b| {
        score_of(buffer, b, day, tier)
            .partial_cmp(&score_of(buffer, a, day, tier))
            .unwrap_or(Ordering::Equal)
    });

    for &uid in eligible.iter().take(open_slots as usize) {
        let from_tier = tiers[uid];
        tiers[uid] = tier;
        tracing::info!(
            "Miner {} promoted to tier {} from tier {} to fill empty slot",
            uid,
            tier as i32 - 1,
            from_tier as i32 - 1
        );
    }
}

/// Composite slice used when ranking members of `tier`: the slice
/// index equals the tier cell value minus one.
fn score_of(buffer: &ScoreBuffer, uid: usize, day: usize, tier: u8) -> f64 {
    buffer.composite(uid, day, (tier - 1) as usize)
}

fn members_of(tiers: &[u8], tier: u8) -> Vec<usize> {
    (0..tiers.len()).filter(|&uid| tiers[uid] == tier).collect()
}

fn tier_distribution(tiers: &[u8]) -> [usize; NUM_TIERS] {
    let mut counts = [0usize; NUM_TIERS];
    for &t in tiers {
        if (t as usize) < NUM_TIERS {
            counts[t as usize] += 1;
        }
    }
    counts
}
