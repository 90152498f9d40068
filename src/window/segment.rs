use super::planner::TimeWindow;
use std::time::Duration;

/// One provider request's worth of a [`TimeWindow`].
///
/// `start`/`end` are partition boundaries: consecutive segments share a
/// boundary and their lengths sum to the window span. The range actually
/// requested is given by [`Segment::request_range`], which stops one second
/// short of `end` on every segment but the last so that no second is requested
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: i64,
    pub end: i64,
    closes_window: bool,
}

impl Segment {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this segment carries the window's inclusive end
    pub fn is_last(&self) -> bool {
        self.closes_window
    }

    /// Inclusive `[start, end]` passed to the log source
    pub fn request_range(&self) -> (i64, i64) {
        if self.closes_window {
            (self.start, self.end)
        } else {
            (self.start, self.end - 1)
        }
    }
}

/// Split a window into segments no longer than `max_segment`.
///
/// Produces `ceil(span / max)` segments (one when the span fits), in ascending
/// order, with the trailing segment absorbing the remainder.
pub fn segment_window(window: &TimeWindow, max_segment: Duration) -> Vec<Segment> {
    let max = (max_segment.as_secs() as i64).max(1);
    let total = window.span().max(0);

    if total <= max {
        return vec![Segment {
            index: 0,
            start: window.start,
            end: window.start + total,
            closes_window: true,
        }];
    }

    let remainder = total % max;
    let full_segments = (total - remainder) / max;
    let count = full_segments as usize + usize::from(remainder != 0);

    let mut segments = Vec::with_capacity(count);
    let mut cursor = window.start;
    for index in 0..full_segments as usize {
        segments.push(Segment {
            index,
            start: cursor,
            end: cursor + max,
            closes_window: false,
        });
        cursor += max;
    }
    if remainder != 0 {
        segments.push(Segment {
            index: segments.len(),
            start: cursor,
            end: cursor + remainder,
            closes_window: false,
        });
    }

    if let Some(last) = segments.last_mut() {
        last.closes_window = true;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_three_segments_for_300_over_120() {
        let window = TimeWindow::new(1000, 1300);
        let segments = segment_window(&window, secs(120));

        assert_eq!(segments.len(), 3);
        assert_eq!((segments[0].start, segments[0].end), (1000, 1120));
        assert_eq!((segments[1].start, segments[1].end), (1120, 1240));
        assert_eq!((segments[2].start, segments[2].end), (1240, 1300));
        assert_eq!(segments.iter().map(Segment::len).sum::<i64>(), 300);

        assert_eq!(segments[0].request_range(), (1000, 1119));
        assert_eq!(segments[1].request_range(), (1120, 1239));
        assert_eq!(segments[2].request_range(), (1240, 1300));
        assert!(segments[2].is_last());
        assert!(!segments[0].is_last());
    }

    #[test]
    fn test_window_that_fits_is_one_segment() {
        let window = TimeWindow::new(500, 620);
        let segments = segment_window(&window, secs(120));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].request_range(), (500, 620));
    }

    #[test]
    fn test_empty_window_is_one_empty_segment() {
        let window = TimeWindow::new(42, 42);
        let segments = segment_window(&window, secs(120));
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_empty());
        assert_eq!(segments[0].request_range(), (42, 42));
    }

    #[test]
    fn test_exact_multiple_has_no_remainder_segment() {
        let window = TimeWindow::new(0, 600);
        let segments = segment_window(&window, secs(120));
        assert_eq!(segments.len(), 5);
        assert!(segments.iter().all(|s| s.len() == 120));
        assert_eq!(segments[4].request_range(), (480, 600));
    }

    #[test]
    fn test_zero_max_segment_treated_as_one_second() {
        let window = TimeWindow::new(10, 13);
        let segments = segment_window(&window, secs(0));
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn test_partition_properties_hold_across_spans_and_sizes() {
        for max in 1..=150i64 {
            for total in 0..=1000i64 {
                let window = TimeWindow::new(1_700_000_000, 1_700_000_000 + total);
                let segments = segment_window(&window, secs(max as u64));

                let expected = if total <= max {
                    1
                } else {
                    ((total + max - 1) / max) as usize
                };
                assert_eq!(segments.len(), expected, "total={total} max={max}");
                assert_eq!(segments.iter().map(Segment::len).sum::<i64>(), total);
                assert_eq!(segments[0].start, window.start);
                assert_eq!(segments[segments.len() - 1].end, window.end);

                for (i, pair) in segments.windows(2).enumerate() {
                    assert_eq!(pair[0].end, pair[1].start, "gap at {i}");
                    assert!(pair[0].start < pair[1].start);
                }

                // every second in [start, end] is requested exactly once
                let mut next = window.start;
                for (i, seg) in segments.iter().enumerate() {
                    assert_eq!(seg.index, i);
                    assert!(seg.len() <= max);
                    let (lo, hi) = seg.request_range();
                    assert_eq!(lo, next);
                    next = hi + 1;
                }
                assert_eq!(next, window.end + 1);
            }
        }
    }
}
