//! Segment planning
//!
//! Splits a video of known duration into overlapping, bounded segments.
//! The plan is committed once and frozen; indices never change afterwards.

use serde::{Deserialize, Serialize};

/// One planned segment boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSegment {
    /// Position within the video
    pub index: u32,
    /// Start offset in seconds
    pub start_sec: u32,
    /// End offset in seconds
    pub end_sec: u32,
}

/// Plan segment boundaries for a video.
///
/// Rules, for `max` = maximum segment length and `overlap`:
/// - `duration <= max` yields one segment `[0, duration]`.
/// - Otherwise segments of up to `max` seconds are emitted; when the
///   remainder past a boundary is shorter than `0.3 * max` the segment is
///   stretched to the end instead of leaving a stub.
/// - Consecutive segments overlap by `overlap` seconds. If the overlap
///   would prevent progress, the next start advances by `0.8 * max`.
/// - The segment count is capped at `ceil(duration / (max / 2)) + 2`;
///   combined with the progress rule this precludes unbounded plans.
///
/// A zero duration yields an empty plan; the caller treats that as a
/// validation failure.
#[must_use]
pub fn plan_segments(duration_sec: u32, max_segment_sec: u32, overlap_sec: u32) -> Vec<PlannedSegment> {
    if duration_sec == 0 || max_segment_sec == 0 {
        return Vec::new();
    }

    if duration_sec <= max_segment_sec {
        return vec![PlannedSegment {
            index: 0,
            start_sec: 0,
            end_sec: duration_sec,
        }];
    }

    let stub_threshold = max_segment_sec * 3 / 10;
    let forced_advance = max_segment_sec * 4 / 5;
    let half = (max_segment_sec / 2).max(1);
    let safety_cap = duration_sec.div_ceil(half) + 2;

    let mut segments = Vec::new();
    let mut start = 0_u32;

    while start < duration_sec && (segments.len() as u32) < safety_cap {
        let mut end = (start + max_segment_sec).min(duration_sec);
        if duration_sec - end < stub_threshold {
            end = duration_sec;
        }

        segments.push(PlannedSegment {
            index: segments.len() as u32,
            start_sec: start,
            end_sec: end,
        });

        if end >= duration_sec {
            break;
        }

        let mut next_start = end.saturating_sub(overlap_sec);
        if next_start <= start {
            next_start = start + forced_advance;
        }
        start = next_start;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 900;
    const OVERLAP: u32 = 30;

    fn covers(segments: &[PlannedSegment], duration: u32) {
        assert_eq!(segments.first().unwrap().start_sec, 0);
        assert_eq!(segments.last().unwrap().end_sec, duration);
        for pair in segments.windows(2) {
            // No gaps, bounded overlap.
            assert!(pair[1].start_sec <= pair[0].end_sec);
            assert!(pair[0].end_sec - pair[1].start_sec <= OVERLAP);
        }
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i as u32);
            assert!(segment.start_sec < segment.end_sec);
        }
    }

    #[test]
    fn test_short_video_single_segment() {
        let segments = plan_segments(480, MAX, OVERLAP);
        assert_eq!(
            segments,
            vec![PlannedSegment {
                index: 0,
                start_sec: 0,
                end_sec: 480
            }]
        );
    }

    #[test]
    fn test_duration_exactly_max() {
        let segments = plan_segments(MAX, MAX, OVERLAP);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_sec, MAX);
    }

    #[test]
    fn test_one_second_past_max_gives_two_segments() {
        let segments = plan_segments(MAX + 1, MAX, OVERLAP);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].end_sec, MAX + 1);
        covers(&segments, MAX + 1);
    }

    #[test]
    fn test_two_segment_fan_out() {
        // 1500s: [0,900], [870,1500]
        let segments = plan_segments(1_500, MAX, OVERLAP);
        assert_eq!(
            segments,
            vec![
                PlannedSegment {
                    index: 0,
                    start_sec: 0,
                    end_sec: 900
                },
                PlannedSegment {
                    index: 1,
                    start_sec: 870,
                    end_sec: 1_500
                },
            ]
        );
    }

    #[test]
    fn test_stub_remainder_absorbed() {
        // 900 + 200 leftover < 0.3 * 900, so one stretched segment.
        let segments = plan_segments(1_100, MAX, OVERLAP);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_sec, 1_100);
    }

    #[test]
    fn test_long_video_coverage() {
        let duration = 7_200;
        let segments = plan_segments(duration, MAX, OVERLAP);
        covers(&segments, duration);
        assert!(segments.len() as u32 <= duration.div_ceil(MAX / 2) + 2);
    }

    #[test]
    fn test_degenerate_overlap_still_progresses() {
        // Overlap equal to the segment length would loop forever without the
        // forced advance.
        let segments = plan_segments(1_000, 100, 100);
        covers(&segments, 1_000);
        let cap = 1_000_u32.div_ceil(50) + 2;
        assert!((segments.len() as u32) <= cap);
        for pair in segments.windows(2) {
            assert!(pair[1].start_sec > pair[0].start_sec);
        }
    }

    #[test]
    fn test_zero_duration_empty_plan() {
        assert!(plan_segments(0, MAX, OVERLAP).is_empty());
    }
}
