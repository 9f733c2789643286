//! Range chunking: split gaps into upstream-request-sized pieces.
//!
//! Chunks cover their gaps exactly once, never overlap, and come out oldest
//! first — the oldest data is stable and highest-value to repair first.

use chrono::Days;

use adsink_core::DateRange;

/// Splits `gaps` into closed date ranges no longer than `max_chunk_days`,
/// additionally bounded so the expected row count per request stays under
/// `max_rows_per_call` given `rows_per_day_estimate`.
#[must_use]
pub fn chunk_gaps(
    gaps: &[DateRange],
    max_chunk_days: u32,
    max_rows_per_call: u32,
    rows_per_day_estimate: u32,
) -> Vec<DateRange> {
    let span_days = chunk_span_days(max_chunk_days, max_rows_per_call, rows_per_day_estimate);
    let mut chunks = Vec::new();

    for gap in gaps {
        let mut cursor = gap.start;
        while cursor <= gap.end {
            let tentative_end = cursor
                .checked_add_days(Days::new(span_days - 1))
                .unwrap_or(gap.end);
            let end = tentative_end.min(gap.end);
            chunks.push(DateRange::new(cursor, end));

            let Some(next) = end.succ_opt() else { break };
            cursor = next;
        }
    }

    chunks
}

/// The effective chunk span: the tighter of the calendar bound and the
/// row-count bound, never below one day.
fn chunk_span_days(max_chunk_days: u32, max_rows_per_call: u32, rows_per_day_estimate: u32) -> u64 {
    let by_rows = if rows_per_day_estimate == 0 {
        max_chunk_days
    } else {
        (max_rows_per_call / rows_per_day_estimate).max(1)
    };
    u64::from(max_chunk_days.min(by_rows).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date literal")
    }

    fn r(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    #[test]
    fn short_gap_stays_a_single_chunk() {
        let chunks = chunk_gaps(&[r("2026-03-01", "2026-03-05")], 30, 5000, 50);
        assert_eq!(chunks, vec![r("2026-03-01", "2026-03-05")]);
    }

    #[test]
    fn long_gap_splits_without_overlap_oldest_first() {
        // MaxChunkDays=2 over a 3-day gap plus a 1-day gap: the 3-day gap
        // becomes two chunks and the 1-day gap passes through unchanged.
        let gaps = [r("2026-03-04", "2026-03-06"), r("2026-03-09", "2026-03-09")];
        let chunks = chunk_gaps(&gaps, 2, 5000, 1);

        assert_eq!(
            chunks,
            vec![
                r("2026-03-04", "2026-03-05"),
                r("2026-03-06", "2026-03-06"),
                r("2026-03-09", "2026-03-09"),
            ]
        );
    }

    #[test]
    fn chunking_is_lossless() {
        let gap = r("2026-01-01", "2026-02-14");
        let chunks = chunk_gaps(&[gap], 7, 5000, 50);

        // Consecutive chunks tile the gap exactly: each starts the day after
        // the previous one ends.
        assert_eq!(chunks.first().expect("non-empty").start, gap.start);
        assert_eq!(chunks.last().expect("non-empty").end, gap.end);
        for pair in chunks.windows(2) {
            assert_eq!(
                pair[1].start,
                pair[0].end.succ_opt().expect("not max date"),
                "chunks must tile without gap or overlap"
            );
        }
        let total: i64 = chunks.iter().map(DateRange::len_days).sum();
        assert_eq!(total, gap.len_days());
    }

    #[test]
    fn row_estimate_tightens_the_span() {
        // 5000 rows per call at 1000 rows/day caps chunks at 5 days even
        // though the calendar bound allows 30.
        let chunks = chunk_gaps(&[r("2026-03-01", "2026-03-12")], 30, 5000, 1000);
        assert_eq!(
            chunks,
            vec![
                r("2026-03-01", "2026-03-05"),
                r("2026-03-06", "2026-03-10"),
                r("2026-03-11", "2026-03-12"),
            ]
        );
    }

    #[test]
    fn degenerate_bounds_still_make_progress() {
        // A row estimate larger than the call budget forces 1-day chunks
        // rather than an infinite loop or a zero-day span.
        let chunks = chunk_gaps(&[r("2026-03-01", "2026-03-03")], 30, 10, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len_days() == 1));
    }

    #[test]
    fn empty_gap_list_yields_no_chunks() {
        assert!(chunk_gaps(&[], 30, 5000, 50).is_empty());
    }
}
