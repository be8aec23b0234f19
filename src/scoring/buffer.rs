use chrono::NaiveDate;

use crate::models::{TIER_INVALID, FIRST_ACTIVE_TIER};

pub const COMPOSITE_SLICES: usize = 6;

/// Fixed-horizon circular store of per-participant daily scores.
///
/// Every matrix is pre-allocated at construction and laid out
/// day-major (`day * num_miners + uid`) so a day column is one
/// contiguous slice; writing day `d` overwrites the slot for day
/// `d - max_days`. The composite tensor carries 6 slices per cell:
/// slice 0 is the daily composite, slices 1..=5 the tier-windowed
/// rolling means.
#[derive(Debug, Clone)]
pub struct ScoreBuffer {
    num_miners: usize,
    max_days: usize,
    pub current_day: usize,
    pub last_update_date: Option<NaiveDate>,

    clv: Vec<f64>,
    roi: Vec<f64>,
    sortino: Vec<f64>,
    entropy: Vec<f64>,
    amount_wagered: Vec<f64>,
    tiers: Vec<u8>,
    composite: Vec<f64>,
}

/// Raw metric selector for generic column access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Clv,
    Roi,
    Sortino,
    Entropy,
    AmountWagered,
}

impl ScoreBuffer {
    pub fn new(num_miners: usize, max_days: usize) -> Self {
        let cells = num_miners * max_days;
        Self {
            num_miners,
            max_days,
            current_day: 0,
            last_update_date: None,
            clv: vec![0.0; cells],
            roi: vec![0.0; cells],
            sortino: vec![0.0; cells],
            entropy: vec![0.0; cells],
            amount_wagered: vec![0.0; cells],
            tiers: vec![TIER_INVALID; cells],
            composite: vec![0.0; cells * COMPOSITE_SLICES],
        }
    }

    pub fn num_miners(&self) -> usize {
        self.num_miners
    }

    pub fn max_days(&self) -> usize {
        self.max_days
    }

    pub fn day_index(&self, day: usize) -> usize {
        day % self.max_days
    }

    fn metric_store(&self, metric: Metric) -> &Vec<f64> {
        match metric {
            Metric::Clv => &self.clv,
            Metric::Roi => &self.roi,
            Metric::Sortino => &self.sortino,
            Metric::Entropy => &self.entropy,
            Metric::AmountWagered => &self.amount_wagered,
        }
    }

    fn metric_store_mut(&mut self, metric: Metric) -> &mut Vec<f64> {
        match metric {
            Metric::Clv => &mut self.clv,
            Metric::Roi => &mut self.roi,
            Metric::Sortino => &mut self.sortino,
            Metric::Entropy => &mut self.entropy,
            Metric::AmountWagered => &mut self.amount_wagered,
        }
    }

    pub fn metric_col(&self, metric: Metric, day: usize) -> &[f64] {
        let start = self.day_index(day) * self.num_miners;
        &self.metric_store(metric)[start..start + self.num_miners]
    }

    pub fn metric_col_mut(&mut self, metric: Metric, day: usize) -> &mut [f64] {
        let start = self.day_index(day) * self.num_miners;
        let miners = self.num_miners;
        &mut self.metric_store_mut(metric)[start..start + miners]
    }

    pub fn set_metric_col(&mut self, metric: Metric, day: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.num_miners);
        self.metric_col_mut(metric, day).copy_from_slice(values);
    }

    pub fn metric_cell(&self, metric: Metric, uid: usize, day: usize) -> f64 {
        self.metric_store(metric)[self.day_index(day) * self.num_miners + uid]
    }

    pub fn tier_col(&self, day: usize) -> &[u8] {
        let start = self.day_index(day) * self.num_miners;
        &self.tiers[start..start + self.num_miners]
    }

    pub fn tier_col_mut(&mut self, day: usize) -> &mut [u8] {
        let start = self.day_index(day) * self.num_miners;
        &mut self.tiers[start..start + self.num_miners]
    }

    pub fn tier(&self, uid: usize, day: usize) -> u8 {
        self.tiers[self.day_index(day) * self.num_miners + uid]
    }

    pub fn set_tier(&mut self, uid: usize, day: usize, tier: u8) {
        let idx = self.day_index(day) * self.num_miners + uid;
        self.tiers[idx] = tier;
    }

    pub fn composite(&self, uid: usize, day: usize, slice: usize) -> f64 {
        self.composite[self.composite_index(uid, day, slice)]
    }

    pub fn set_composite(&mut self, uid: usize, day: usize, slice: usize, value: f64) {
        let idx = self.composite_index(uid, day, slice);
        self.composite[idx] = value;
    }

    fn composite_index(&self, uid: usize, day: usize, slice: usize) -> usize {
        (self.day_index(day) * self.num_miners + uid) * COMPOSITE_SLICES + slice
    }

    /// Advance the day cursor to `today`.
    ///
    /// First call only records the date. A non-positive delta leaves
    /// the cursor untouched. Otherwise the cursor moves `delta` slots
    /// (mod `max_days`), the new day's wager column is zeroed, the
    /// tier column is carried over, and any skipped days receive a
    /// copy of their predecessor's metric, composite and tier
    /// columns so downtime does not leave holes in the rolling
    /// windows. Wagers are never carried: a day nobody ran is a day
    /// nobody wagered.
    ///
    /// Returns the number of days advanced.
    pub fn advance_day(&mut self, today: NaiveDate) -> i64 {
        let last = match self.last_update_date {
            Some(last) => last,
            None => {
                self.last_update_date = Some(today);
                tracing::info!("Recorded first update date {} without advancing day", today);
                return 0;
            }
        };

        let days_passed = (today - last).num_days();
        if days_passed <= 0 {
            tracing::debug!("No new day to advance (delta {} days)", days_passed);
            return 0;
        }

        let old_day = self.current_day;
        self.current_day = (self.current_day + days_passed as usize) % self.max_days;
        self.last_update_date = Some(today);
        tracing::info!(
            "Advanced {} day(s), day cursor {} -> {}",
            days_passed,
            old_day,
            self.current_day
        );

        self.metric_col_mut(Metric::AmountWagered, self.current_day)
            .fill(0.0);
        self.copy_tier_col(old_day, self.current_day);

        if days_passed > 1 {
            self.carry_forward_downtime(old_day, days_passed as usize);
        }

        days_passed
    }

    /// Copy each intermediate downtime day from its predecessor so
    /// window reductions see the last known scores instead of stale
    /// wrap-around data.
    fn carry_forward_downtime(&mut self, old_day: usize, days_passed: usize) {
        tracing::warn!(
            "Engine was down for {} day(s), carrying scores forward",
            days_passed - 1
        );

        // A gap longer than the horizon rewrites every slot once.
        let span = days_passed.min(self.max_days);
        for i in 1..span {
            let prev = (old_day + i - 1) % self.max_days;
            let day = (old_day + i) % self.max_days;
            if prev == day {
                continue;
            }

            for metric in [Metric::Clv, Metric::Roi, Metric::Sortino, Metric::Entropy] {
                self.copy_metric_col(metric, prev, day);
            }
            self.copy_composite_col(prev, day);
            self.copy_tier_col(prev, day);
            self.metric_col_mut(Metric::AmountWagered, day).fill(0.0);
        }
    }

    fn copy_metric_col(&mut self, metric: Metric, from_day: usize, to_day: usize) {
        let m = self.num_miners;
        let from = self.day_index(from_day) * m;
        let to = self.day_index(to_day) * m;
        if from == to {
            return;
        }
        let store = self.metric_store_mut(metric);
        let (src, dst) = split_copy_ranges(store, from, to, m);
        dst.copy_from_slice(src);
    }

    fn copy_tier_col(&mut self, from_day: usize, to_day: usize) {
        let m = self.num_miners;
        let from = self.day_index(from_day) * m;
        let to = self.day_index(to_day) * m;
        if from == to {
            return;
        }
        let (src, dst) = split_copy_ranges(&mut self.tiers, from, to, m);
        dst.copy_from_slice(src);
    }

    fn copy_composite_col(&mut self, from_day: usize, to_day: usize) {
        let width = self.num_miners * COMPOSITE_SLICES;
        let from = self.day_index(from_day) * width;
        let to = self.day_index(to_day) * width;
        if from == to {
            return;
        }
        let (src, dst) = split_copy_ranges(&mut self.composite, from, to, width);
        dst.copy_from_slice(src);
    }

    /// Sum of a participant's wagers over the most recent `window`
    /// days ending at `current_day`, with circular wrap.
    pub fn cumulative_wager(&self, uid: usize, window: usize) -> f64 {
        let mut total = 0.0;
        for back in 0..window.min(self.max_days) {
            let day = (self.current_day + self.max_days - back) % self.max_days;
            total += self.amount_wagered[day * self.num_miners + uid];
        }
        total
    }

    /// Mean of the daily composite over the most recent `window`
    /// days ending at `current_day`, with circular wrap. Days are
    /// summed oldest-first so the reduction order is fixed.
    pub fn rolling_composite_mean(&self, uid: usize, window: usize) -> f64 {
        let window = window.min(self.max_days).max(1);
        let mut total = 0.0;
        for back in (0..window).rev() {
            let day = (self.current_day + self.max_days - back) % self.max_days;
            total += self.composite[(day * self.num_miners + uid) * COMPOSITE_SLICES];
        }
        total / window as f64
    }

    /// Zero every stored score for one UID and re-seat its tier row,
    /// used when a network slot is handed to a new participant.
    pub fn reset_uid(&mut self, uid: usize, invalid: bool) {
        for day in 0..self.max_days {
            let idx = day * self.num_miners + uid;
            self.clv[idx] = 0.0;
            self.roi[idx] = 0.0;
            self.sortino[idx] = 0.0;
            self.entropy[idx] = 0.0;
            self.amount_wagered[idx] = 0.0;
            self.tiers[idx] = if invalid { TIER_INVALID } else { FIRST_ACTIVE_TIER };
            for slice in 0..COMPOSITE_SLICES {
                self.composite[idx * COMPOSITE_SLICES + slice] = 0.0;
            }
        }
    }

    pub fn reset_all(&mut self) {
        self.clv.fill(0.0);
        self.roi.fill(0.0);
        self.sortino.fill(0.0);
        self.entropy.fill(0.0);
        self.amount_wagered.fill(0.0);
        self.tiers.fill(TIER_INVALID);
        self.composite.fill(0.0);
        self.current_day = 0;
        self.last_update_date = None;
    }
}

/// Borrow two non-overlapping column ranges out of one store, source
/// immutably and destination mutably.
fn split_copy_ranges<T>(store: &mut [T], from: usize, to: usize, width: usize) -> (&[T], &mut [T]) {
    debug_assert_ne!(from, to);
    if from < to {
        let (head, tail) = store.split_at_mut(to);
        (&head[from..from + width], &mut tail[..width])
    } else {
        let (head, tail) = store.split_at_mut(from);
        let dst_start = to;
        let (src, dst) = (&tail[..width], &mut head[dst_start..dst_start + width]);
        (src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_advance_records_date_only() {
        let mut buffer = ScoreBuffer::new(4, 3);
        assert_eq!(buffer.advance_day(date(2025, 1, 1)), 0);
        assert_eq!(buffer.current_day, 0);
        assert_eq!(buffer.last_update_date, Some(date(2025, 1, 1)));
    }

    #[test]
    fn test_advance_is_idempotent_for_same_date() {
        let mut buffer = ScoreBuffer::new(4, 3);
        buffer.advance_day(date(2025, 1, 1));
        buffer.advance_day(date(2025, 1, 2));
        let snapshot = buffer.clone();

        buffer.advance_day(date(2025, 1, 2));
        assert_eq!(buffer.current_day, snapshot.current_day);
        assert_eq!(buffer.tier_col(1), snapshot.tier_col(1));

        // Going backwards is also a no-op.
        buffer.advance_day(date(2024, 12, 25));
        assert_eq!(buffer.current_day, snapshot.current_day);
    }

    #[test]
    fn test_advance_wraps_and_zeroes_wagers() {
        let mut buffer = ScoreBuffer::new(2, 3);
        buffer.advance_day(date(2025, 1, 1));

        buffer.metric_col_mut(Metric::AmountWagered, 0)[0] = 500.0;
        buffer.advance_day(date(2025, 1, 2));
        assert_eq!(buffer.current_day, 1);
        assert_eq!(buffer.metric_col(Metric::AmountWagered, 1), &[0.0, 0.0]);

        // Day 3 wraps back onto physical slot 0 and must be cleared.
        buffer.metric_col_mut(Metric::AmountWagered, 1)[0] = 200.0;
        buffer.advance_day(date(2025, 1, 3));
        buffer.advance_day(date(2025, 1, 4));
        assert_eq!(buffer.current_day, 0);
        assert_eq!(buffer.metric_col(Metric::AmountWagered, 0), &[0.0, 0.0]);
    }

    #[test]
    fn test_tier_carry_over_on_advance() {
        let mut buffer = ScoreBuffer::new(3, 5);
        buffer.advance_day(date(2025, 1, 1));
        buffer.tier_col_mut(0).copy_from_slice(&[2, 4, 1]);

        buffer.advance_day(date(2025, 1, 2));
        assert_eq!(buffer.tier_col(1), &[2, 4, 1]);
    }

    #[test]
    fn test_downtime_carries_scores_but_not_wagers() {
        let mut buffer = ScoreBuffer::new(2, 10);
        buffer.advance_day(date(2025, 1, 1));

        buffer.metric_col_mut(Metric::Clv, 0).copy_from_slice(&[1.5, 0.5]);
        buffer.metric_col_mut(Metric::Sortino, 0).copy_from_slice(&[2.0, 0.0]);
        buffer.metric_col_mut(Metric::AmountWagered, 0)[0] = 900.0;
        buffer.set_composite(0, 0, 0, 0.7);
        buffer.tier_col_mut(0).copy_from_slice(&[3, 2]);

        // Three days pass in one advance: days 1 and 2 are downtime.
        buffer.advance_day(date(2025, 1, 4));
        assert_eq!(buffer.current_day, 3);

        for day in 1..=2 {
            assert_eq!(buffer.metric_col(Metric::Clv, day), &[1.5, 0.5]);
            assert_eq!(buffer.metric_col(Metric::Sortino, day), &[2.0, 0.0]);
            assert_eq!(buffer.composite(0, day, 0), 0.7);
            assert_eq!(buffer.tier_col(day), &[3, 2]);
            assert_eq!(buffer.metric_col(Metric::AmountWagered, day), &[0.0, 0.0]);
        }
        assert_eq!(buffer.tier_col(3), &[3, 2]);
    }

    #[test]
    fn test_cumulative_wager_wraps() {
        let mut buffer = ScoreBuffer::new(1, 4);
        buffer.advance_day(date(2025, 1, 1));
        buffer.metric_col_mut(Metric::AmountWagered, 0)[0] = 100.0;
        buffer.advance_day(date(2025, 1, 2));
        buffer.metric_col_mut(Metric::AmountWagered, 1)[0] = 200.0;
        buffer.advance_day(date(2025, 1, 3));
        buffer.metric_col_mut(Metric::AmountWagered, 2)[0] = 300.0;
        buffer.advance_day(date(2025, 1, 4));
        buffer.metric_col_mut(Metric::AmountWagered, 3)[0] = 400.0;
        buffer.advance_day(date(2025, 1, 5));
        buffer.metric_col_mut(Metric::AmountWagered, 0)[0] = 500.0;

        // Window of 3 ending at physical day 0: days 0, 3, 2.
        assert_eq!(buffer.cumulative_wager(0, 3), 500.0 + 400.0 + 300.0);
        // Window larger than the horizon clamps to max_days.
        assert_eq!(buffer.cumulative_wager(0, 45), 500.0 + 400.0 + 300.0 + 200.0);
    }

    #[test]
    fn test_reset_uid() {
        let mut buffer = ScoreBuffer::new(2, 3);
        buffer.metric_col_mut(Metric::Roi, 1)[0] = 0.4;
        buffer.set_composite(0, 1, 0, 0.9);
        buffer.set_tier(0, 1, 5);

        buffer.reset_uid(0, false);
        assert_eq!(buffer.metric_cell(Metric::Roi, 0, 1), 0.0);
        assert_eq!(buffer.composite(0, 1, 0), 0.0);
        assert_eq!(buffer.tier(0, 1), FIRST_ACTIVE_TIER);

        buffer.reset_uid(1, true);
        assert_eq!(buffer.tier(1, 0), TIER_INVALID);
    }
}
