//! Bounded per-lane history of vehicle counts.

use std::collections::VecDeque;

use serde::Serialize;

use crate::LANE_COUNT;
use crate::snapshot::Lane;

/// Maximum number of points retained per lane.
pub const HISTORY_CAPACITY: usize = 30;

/// Four independent FIFO windows, oldest entry first.
///
/// Only the poll loop mutates a window; readers get a [`HistorySnapshot`].
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    lanes: [VecDeque<u32>; LANE_COUNT],
}

impl HistoryWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `value` onto the lane's tail, evicting the head past capacity.
    pub fn append(&mut self, lane: Lane, value: u32) {
        let window = &mut self.lanes[lane.index()];
        window.push_back(value);
        while window.len() > HISTORY_CAPACITY {
            window.pop_front();
        }
    }

    /// Appends one point per lane.
    pub fn record(&mut self, counts: &[u32; LANE_COUNT]) {
        for lane in Lane::ALL {
            self.append(lane, counts[lane.index()]);
        }
    }

    /// Copies the current contents into an independent value.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            lanes: std::array::from_fn(|i| self.lanes[i].iter().copied().collect()),
        }
    }
}

/// Immutable copy of a [`HistoryWindow`] taken at publish time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HistorySnapshot {
    lanes: [Box<[u32]>; LANE_COUNT],
}

impl HistorySnapshot {
    /// Chronological counts for one lane, oldest first.
    pub fn lane(&self, lane: Lane) -> &[u32] {
        &self.lanes[lane.index()]
    }

    pub fn lanes(&self) -> impl Iterator<Item = (Lane, &[u32])> {
        Lane::ALL
            .into_iter()
            .zip(self.lanes.iter().map(|points| &**points))
    }

    /// Most recent count for a lane.
    pub fn latest(&self, lane: Lane) -> Option<u32> {
        self.lane(lane).last().copied()
    }

    /// Latest count minus the oldest retained one. `None` with fewer than two points.
    pub fn trend(&self, lane: Lane) -> Option<i64> {
        let points = self.lane(lane);
        let first = *points.first()?;
        let latest = self.latest(lane)?;
        (points.len() > 1).then(|| i64::from(latest) - i64::from(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane(index: usize) -> Lane {
        Lane::new(index).unwrap()
    }

    #[test]
    fn test_starts_with_four_empty_lanes() {
        let snapshot = HistoryWindow::new().snapshot();
        for (_, points) in snapshot.lanes() {
            assert!(points.is_empty());
        }
    }

    #[test]
    fn test_keeps_last_thirty_in_order() {
        let mut window = HistoryWindow::new();
        for i in 1..=35 {
            window.append(lane(0), i);
        }

        let snapshot = window.snapshot();
        let expected: Vec<u32> = (6..=35).collect();
        assert_eq!(snapshot.lane(lane(0)), expected.as_slice());
        assert_eq!(snapshot.lane(lane(0)).len(), HISTORY_CAPACITY);
        assert_eq!(snapshot.latest(lane(0)), Some(35));
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut window = HistoryWindow::new();
        window.append(lane(2), 9);

        let snapshot = window.snapshot();
        assert_eq!(snapshot.lane(lane(2)), &[9]);
        assert!(snapshot.lane(lane(0)).is_empty());
        assert!(snapshot.lane(lane(3)).is_empty());
        assert_eq!(snapshot.latest(lane(2)), Some(9));
        assert_eq!(snapshot.latest(lane(0)), None);
    }

    #[test]
    fn test_trend_spans_retained_window() {
        let mut window = HistoryWindow::new();
        window.append(lane(1), 7);
        assert_eq!(window.snapshot().trend(lane(1)), None);

        window.append(lane(1), 3);
        window.append(lane(1), 4);
        assert_eq!(window.snapshot().trend(lane(1)), Some(-3));

        for i in 0..HISTORY_CAPACITY as u32 {
            window.append(lane(1), 10 + i);
        }
        assert_eq!(window.snapshot().trend(lane(1)), Some(29));
        assert_eq!(window.snapshot().trend(lane(0)), None);
    }

    #[test]
    fn test_record_appends_every_lane() {
        let mut window = HistoryWindow::new();
        window.record(&[1, 2, 3, 4]);
        window.record(&[5, 6, 7, 8]);

        let snapshot = window.snapshot();
        assert_eq!(snapshot.lane(lane(0)), &[1, 5]);
        assert_eq!(snapshot.lane(lane(3)), &[4, 8]);
    }

    #[test]
    fn test_snapshot_is_not_aliased() {
        let mut window = HistoryWindow::new();
        window.record(&[1, 1, 1, 1]);
        let before = window.snapshot();

        window.record(&[2, 2, 2, 2]);

        assert_eq!(before.lane(lane(1)), &[1]);
        assert_eq!(window.snapshot().lane(lane(1)), &[1, 2]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut window = HistoryWindow::new();
        for k in 0..100u32 {
            window.record(&[k, k, k, k]);
            let snapshot = window.snapshot();
            for (_, points) in snapshot.lanes() {
                assert_eq!(points.len(), (k as usize + 1).min(HISTORY_CAPACITY));
            }
        }
    }
}
