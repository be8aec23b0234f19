pub mod batch;
pub mod tier;
pub mod uids;

pub use batch::{ClosingLineOdds, GameResultRow, GameUpdate, PredictionRow, ScoringBatch};
pub use tier::{
    score_type_label, score_type_slice, tier_configs, TierConfig, FIRST_ACTIVE_TIER,
    LAST_ACTIVE_TIER, NUM_TIERS, TIER_EMPTY, TIER_INVALID,
};
pub use uids::{UidMask, UidPartition};
