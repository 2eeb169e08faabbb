//! Command recording fan-out.
//!
//! A frame's draw instances are split into contiguous segments, one per
//! secondary command buffer, and every segment is recorded on its own scoped
//! thread. Segments only share read-only binding state, so no locking is
//! involved; the only ordering requirement is that every segment finishes
//! before the primary buffer executes them, which the scope join provides.

use anyhow::{anyhow, Result};
use std::ops::Range;

/// Number of recording segments for a configured thread count.
///
/// One thread is kept for the primary buffer and the overlay.
#[inline]
pub fn segment_count(thread_count: usize) -> usize {
    thread_count.saturating_sub(1).max(1)
}

/// Instances handled by each segment: `ceil(draw_count / segments)`.
#[inline]
pub fn segment_len(draw_count: usize, segments: usize) -> usize {
    draw_count.div_ceil(segments.max(1))
}

/// Split `[0, draw_count)` into `segments` contiguous ranges.
///
/// Every range but possibly the trailing ones has `ceil(D / S)` entries; the
/// last non-empty range may be short and ranges past `D` are empty.
pub fn segment_ranges(draw_count: usize, segments: usize) -> Vec<Range<usize>> {
    let len = segment_len(draw_count, segments);
    (0..segments.max(1))
        .map(|s| {
            let start = (s * len).min(draw_count);
            let end = ((s + 1) * len).min(draw_count);
            start..end
        })
        .collect()
}

/// Records the draws for one segment into a secondary command buffer.
pub trait SegmentRecorder: Sync {
    type Buffer: Copy + Send;

    /// Record instances `range` into `buffer`. Called concurrently for
    /// different buffers, never twice for the same buffer within a frame.
    fn record_segment(&self, buffer: Self::Buffer, segment: usize, range: Range<usize>) -> Result<()>;
}

/// Record `draw_count` instances across `buffers.len()` segments in parallel.
///
/// Returns the buffers that received work, in segment order, ready for a
/// single execute call from the primary buffer. Empty segments are skipped.
pub fn record_segments<R: SegmentRecorder>(
    recorder: &R,
    buffers: &[R::Buffer],
    draw_count: usize,
) -> Result<Vec<R::Buffer>> {
    if buffers.is_empty() {
        return Err(anyhow!("no secondary command buffers to record into"));
    }

    let work: Vec<(usize, R::Buffer, Range<usize>)> = segment_ranges(draw_count, buffers.len())
        .into_iter()
        .zip(buffers.iter().copied())
        .enumerate()
        .filter(|(_, (range, _))| !range.is_empty())
        .map(|(segment, (range, buffer))| (segment, buffer, range))
        .collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = work
            .iter()
            .cloned()
            .map(|(segment, buffer, range)| {
                scope.spawn(move || recorder.record_segment(buffer, segment, range))
            })
            .collect();

        handles.into_iter().try_for_each(|handle| {
            handle
                .join()
                .map_err(|_| anyhow!("command recording thread panicked"))?
        })
    })?;

    Ok(work.into_iter().map(|(_, buffer, _)| buffer).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    fn sizes(ranges: &[Range<usize>]) -> Vec<usize> {
        ranges.iter().map(|r| r.len()).collect()
    }

    #[test]
    fn one_thread_is_reserved_for_the_primary_buffer() {
        assert_eq!(segment_count(4), 3);
        assert_eq!(segment_count(2), 1);
        assert_eq!(segment_count(1), 1);
        assert_eq!(segment_count(32), 31);
    }

    #[test]
    fn nine_instances_over_three_segments() {
        let ranges = segment_ranges(9, segment_count(4));
        assert_eq!(sizes(&ranges), vec![3, 3, 3]);
        assert_eq!(ranges, vec![0..3, 3..6, 6..9]);
    }

    #[test]
    fn last_segment_receives_fewer_not_more() {
        let ranges = segment_ranges(10, 3);
        assert_eq!(sizes(&ranges), vec![4, 4, 2]);
    }

    #[test]
    fn fewer_instances_than_segments_leaves_trailing_segments_empty() {
        let ranges = segment_ranges(2, 5);
        assert_eq!(sizes(&ranges), vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn partition_covers_every_index_exactly_once() {
        for draw_count in 1..=70 {
            for segments in 1..=33 {
                let ranges = segment_ranges(draw_count, segments);
                assert_eq!(ranges.len(), segments);

                let len = segment_len(draw_count, segments);
                let mut seen = vec![0u32; draw_count];
                let mut short = 0;
                for range in &ranges {
                    assert!(range.len() <= len);
                    if !range.is_empty() && range.len() < len {
                        short += 1;
                    }
                    for i in range.clone() {
                        seen[i] += 1;
                    }
                }
                assert!(seen.iter().all(|&n| n == 1), "D={} S={}", draw_count, segments);
                assert!(short <= 1, "D={} S={}", draw_count, segments);
            }
        }
    }

    struct Collect {
        seen: Mutex<Vec<(u32, usize, Range<usize>)>>,
    }

    impl SegmentRecorder for Collect {
        type Buffer = u32;

        fn record_segment(&self, buffer: u32, segment: usize, range: Range<usize>) -> Result<()> {
            self.seen.lock().push((buffer, segment, range));
            Ok(())
        }
    }

    #[test]
    fn each_buffer_gets_a_distinct_segment() {
        let recorder = Collect {
            seen: Mutex::new(Vec::new()),
        };
        let executed = record_segments(&recorder, &[10, 11, 12], 9).unwrap();
        assert_eq!(executed, vec![10, 11, 12]);

        let mut seen = recorder.seen.into_inner();
        seen.sort_by_key(|(buffer, _, _)| *buffer);
        assert_eq!(
            seen,
            vec![(10, 0, 0..3), (11, 1, 3..6), (12, 2, 6..9)]
        );

        let indices: HashSet<usize> = seen.iter().flat_map(|(_, _, r)| r.clone()).collect();
        assert_eq!(indices.len(), 9);
    }

    #[test]
    fn empty_segments_are_not_executed() {
        let recorder = Collect {
            seen: Mutex::new(Vec::new()),
        };
        let executed = record_segments(&recorder, &[1, 2, 3, 4], 2).unwrap();
        assert_eq!(executed, vec![1, 2]);
        assert_eq!(recorder.seen.lock().len(), 2);
    }

    struct FailOn(usize);

    impl SegmentRecorder for FailOn {
        type Buffer = ();

        fn record_segment(&self, _: (), segment: usize, _: Range<usize>) -> Result<()> {
            if segment == self.0 {
                Err(anyhow!("segment {} failed", segment))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn a_failing_segment_fails_the_frame() {
        let err = record_segments(&FailOn(1), &[(), (), ()], 30).unwrap_err();
        assert!(err.to_string().contains("segment 1 failed"));
    }

    #[test]
    fn no_buffers_is_an_error() {
        let recorder = Collect {
            seen: Mutex::new(Vec::new()),
        };
        assert!(record_segments(&recorder, &[], 4).is_err());
    }
}
