//! Dual-ring phase plan: derives the target phase's green intervals from a movement/duration
//! row pair, and answers "how long until the next state change" for a given cycle position.

use crate::error::{NodeError, NodeResult};

const RING_SIZE: usize = 8;

/// Green intervals (half-open, `[start, end)` seconds into the cycle) and total cycle length
/// for one target phase, derived from a single ring's movement/duration slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    /// Green intervals in ascending order, adjacent intervals already merged.
    pub green_intervals: Vec<(i32, i32)>,
    /// Total cycle duration in seconds (sum of all 8 slot durations on the selected ring).
    pub cycle_duration: i32,
}

/// Where `lc_cnt` currently sits relative to the plan's green intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePosition {
    /// Seconds to sleep before the next state transition.
    pub sleep_seconds: i32,
    /// Index into `green_intervals` that `lc_cnt` belongs to (or is waiting for).
    pub interval_idx: usize,
    /// Whether the target phase is green right now.
    pub signal_on: bool,
}

impl PhasePlan {
    /// Build a plan for `target_signal` from a 16-slot movement/duration row pair
    /// (slots `0..8` = ring A, `8..16` = ring B). The target phase must appear in exactly one
    /// ring.
    pub fn build(target_signal: i32, movement: &[i32; 16], duration: &[i32; 16]) -> NodeResult<Self> {
        let a_mvmt = &movement[0..RING_SIZE];
        let b_mvmt = &movement[RING_SIZE..];
        let a_dur = &duration[0..RING_SIZE];
        let b_dur = &duration[RING_SIZE..];

        let is_a = a_mvmt.contains(&target_signal);
        let is_b = b_mvmt.contains(&target_signal);

        if is_a && is_b {
            return Err(NodeError::TargetAmbiguous(target_signal));
        }
        if !is_a && !is_b {
            return Err(NodeError::TargetNotFound(target_signal));
        }

        let (mvmt, dur) = if is_a { (a_mvmt, a_dur) } else { (b_mvmt, b_dur) };

        let mut green_intervals: Vec<(i32, i32)> = Vec::new();
        let mut cur_time = 0;
        for i in 0..RING_SIZE {
            if mvmt[i] == target_signal {
                let start = cur_time;
                let end = start + dur[i];
                match green_intervals.last_mut() {
                    Some(last) if last.1 == start => last.1 = end,
                    _ => green_intervals.push((start, end)),
                }
            }
            cur_time += dur[i];
        }

        if green_intervals.is_empty() {
            return Err(NodeError::PlanMalformed(format!(
                "target phase {target_signal} matched ring but has zero total duration"
            )));
        }

        Ok(Self {
            green_intervals,
            cycle_duration: cur_time,
        })
    }

    /// Locate `lc_cnt` within the plan and compute the sleep until the next transition.
    pub fn position_for(&self, lc_cnt: i32) -> CyclePosition {
        for (idx, &(on, off)) in self.green_intervals.iter().enumerate() {
            if lc_cnt >= on && lc_cnt < off {
                return CyclePosition {
                    sleep_seconds: off - lc_cnt,
                    interval_idx: idx,
                    signal_on: true,
                };
            }
            if lc_cnt < on {
                return CyclePosition {
                    sleep_seconds: on - lc_cnt,
                    interval_idx: idx,
                    signal_on: false,
                };
            }
        }

        CyclePosition {
            sleep_seconds: self.cycle_duration - lc_cnt + self.green_intervals[0].0,
            interval_idx: 0,
            signal_on: false,
        }
    }

    /// Index of the interval following `idx`, wrapping to the start of the cycle.
    pub fn next_interval_idx(&self, idx: usize) -> usize {
        (idx + 1) % self.green_intervals.len()
    }

    /// The next interval's index and the red-gap seconds between `off` (the end of the
    /// interval just vacated) and that interval's start, wrapping across the cycle boundary.
    /// Works unmodified for a single-interval plan, since the wrapped "next" interval is then
    /// the same interval and its start always precedes `off`.
    pub fn red_gap_after(&self, current_idx: usize, off: i32) -> (usize, i32) {
        let next_idx = self.next_interval_idx(current_idx);
        let next_on = self.green_intervals[next_idx].0;
        let gap = if next_on > off {
            next_on - off
        } else {
            self.cycle_duration - off + next_on
        };
        (next_idx, gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duration_slots(a: [i32; 8], b: [i32; 8]) -> [i32; 16] {
        let mut out = [0; 16];
        out[..8].copy_from_slice(&a);
        out[8..].copy_from_slice(&b);
        out
    }

    #[test]
    fn single_green_interval_on_ring_a() {
        let movement = duration_slots([0, 0, 4, 0, 0, 0, 0, 0], [0; 8]);
        let duration = duration_slots([30, 0, 70, 0, 0, 0, 0, 0], [0; 8]);
        let plan = PhasePlan::build(4, &movement, &duration).expect("plan");

        assert_eq!(plan.green_intervals, vec![(30, 100)]);
        assert_eq!(plan.cycle_duration, 100);
    }

    #[test]
    fn adjacent_slots_merge_into_one_interval() {
        // target phase occupies slots 2 and 3 back-to-back -> single merged interval
        let movement = duration_slots([0, 0, 4, 4, 0, 0, 0, 0], [0; 8]);
        let duration = duration_slots([10, 0, 20, 15, 0, 0, 0, 0], [0; 8]);
        let plan = PhasePlan::build(4, &movement, &duration).expect("plan");

        assert_eq!(plan.green_intervals, vec![(10, 45)]);
    }

    #[test]
    fn ambiguous_target_in_both_rings_errors() {
        let movement = duration_slots([4, 0, 0, 0, 0, 0, 0, 0], [4, 0, 0, 0, 0, 0, 0, 0]);
        let duration = duration_slots([10; 8], [10; 8]);
        let err = PhasePlan::build(4, &movement, &duration).unwrap_err();
        assert!(matches!(err, NodeError::TargetAmbiguous(4)));
    }

    #[test]
    fn missing_target_errors() {
        let movement = duration_slots([1, 2, 3, 5, 6, 7, 8, 9], [1, 2, 3, 5, 6, 7, 8, 9]);
        let duration = duration_slots([10; 8], [10; 8]);
        let err = PhasePlan::build(4, &movement, &duration).unwrap_err();
        assert!(matches!(err, NodeError::TargetNotFound(4)));
    }

    #[test]
    fn position_inside_green_interval() {
        let movement = duration_slots([0, 0, 4, 0, 0, 0, 0, 0], [0; 8]);
        let duration = duration_slots([30, 0, 70, 0, 0, 0, 0, 0], [0; 8]);
        let plan = PhasePlan::build(4, &movement, &duration).expect("plan");

        let pos = plan.position_for(0);
        assert!(!pos.signal_on);
        assert_eq!(pos.sleep_seconds, 30);

        let pos = plan.position_for(50);
        assert!(pos.signal_on);
        assert_eq!(pos.sleep_seconds, 50);

        let pos = plan.position_for(100);
        assert!(!pos.signal_on);
        assert_eq!(pos.sleep_seconds, 30);
    }

    #[test]
    fn red_gap_after_wraps_a_single_interval_plan_to_itself() {
        let movement = duration_slots([0, 0, 4, 0, 0, 0, 0, 0], [0; 8]);
        let duration = duration_slots([30, 0, 70, 0, 0, 0, 0, 0], [0; 8]);
        let plan = PhasePlan::build(4, &movement, &duration).expect("plan");

        let (next_idx, gap) = plan.red_gap_after(0, 100);
        assert_eq!(next_idx, 0);
        assert_eq!(gap, 30);
    }

    #[test]
    fn red_gap_after_finds_the_next_of_two_intervals() {
        let movement = duration_slots([4, 0, 0, 0, 4, 0, 0, 0], [0; 8]);
        let duration = duration_slots([10, 10, 10, 10, 10, 10, 10, 10], [0; 8]);
        let plan = PhasePlan::build(4, &movement, &duration).expect("plan");
        assert_eq!(plan.green_intervals, vec![(0, 10), (40, 50)]);

        let (next_idx, gap) = plan.red_gap_after(0, 10);
        assert_eq!(next_idx, 1);
        assert_eq!(gap, 30);

        let (next_idx, gap) = plan.red_gap_after(1, 50);
        assert_eq!(next_idx, 0);
        assert_eq!(gap, 30);
    }
}
