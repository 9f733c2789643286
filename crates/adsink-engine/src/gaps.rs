//! Gap detection: diff the expected calendar against recorded dates.
//!
//! A gap is a maximal contiguous run of dates with no fact row. Gaps are a
//! view over fact absence, computed fresh on every pass and never stored.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};

use adsink_core::DateRange;

/// Computes the window of dates expected to have facts at `now`.
///
/// The window reaches `lookback_days` into the past. Its trailing edge stops
/// before the current day, pushed back further until `grace_hours` have
/// passed since midnight UTC — upstream platforms finalize a day's metrics
/// well after it ends, and counting a still-settling day as missing would
/// make every pass report a trivial gap.
///
/// Returns `None` when the grace period leaves no completed day in the
/// window (e.g. a 1-day lookback queried just after midnight).
#[must_use]
pub fn expected_window(
    now: DateTime<Utc>,
    lookback_days: u32,
    grace_hours: u32,
) -> Option<DateRange> {
    let start = now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(lookback_days)))?;
    let end = (now - chrono::Duration::hours(i64::from(grace_hours)))
        .date_naive()
        .checked_sub_days(Days::new(1))?;

    (start <= end).then(|| DateRange::new(start, end))
}

/// Diffs `window` against the recorded dates and merges adjacent missing
/// days into maximal contiguous ranges, oldest first.
///
/// An empty result is the common case: the store is complete and the sync
/// is a no-op.
#[must_use]
pub fn detect_gaps(window: DateRange, present: &BTreeSet<NaiveDate>) -> Vec<DateRange> {
    let mut gaps = Vec::new();
    let mut open: Option<(NaiveDate, NaiveDate)> = None;

    let mut cursor = window.start;
    while cursor <= window.end {
        if present.contains(&cursor) {
            if let Some((start, end)) = open.take() {
                gaps.push(DateRange::new(start, end));
            }
        } else {
            open = match open {
                Some((start, _)) => Some((start, cursor)),
                None => Some((cursor, cursor)),
            };
        }
        let Some(next) = cursor.succ_opt() else { break };
        cursor = next;
    }

    if let Some((start, end)) = open {
        gaps.push(DateRange::new(start, end));
    }

    gaps
}
