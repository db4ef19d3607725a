//! Ramp stages and the target-concurrency function they describe.
//!
//! For a stage with `start` (the previous stage's target, `0` for the first
//! stage) and `end` (`stage.target`) over `duration`, the target at `elapsed`
//! seconds into the stage is:
//!
//! ```text
//! t = elapsed / duration
//! target(t) = start + (end - start) * t
//! ```
//!
//! A stage with `Duration::ZERO` jumps straight to its target. Past the last
//! stage the target stays at the last stage's value.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A stage defines a target number of virtual users and how long to ramp to it.
///
/// Use `Stage::new(Duration::from_secs(30), 100)` to ramp to 100 VUs over 30s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    /// Virtual users at the end of the stage
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Sum of every stage duration.
pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

/// Index of the stage running at `elapsed`, `None` once all stages are over.
pub fn stage_index_at(stages: &[Stage], elapsed: Duration) -> Option<usize> {
    let mut end = Duration::ZERO;
    for (i, stage) in stages.iter().enumerate() {
        end += stage.duration;
        if elapsed < end {
            return Some(i);
        }
    }
    None
}

/// Interpolated concurrency target at `elapsed` since the run started.
pub fn target_at(stages: &[Stage], elapsed: Duration) -> f64 {
    let mut from = 0.0;
    let mut stage_start = Duration::ZERO;
    for stage in stages {
        let to = stage.target as f64;
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let into = (elapsed - stage_start).as_secs_f64();
            // Interpolation factor [0.0..1.0]
            let t = (into / stage.duration.as_secs_f64()).clamp(0.0, 1.0);
            return from + (to - from) * t;
        }
        from = to;
        stage_start = stage_end;
    }
    from
}

/// [`target_at`] rounded to a whole number of virtual users.
pub fn vus_at(stages: &[Stage], elapsed: Duration) -> u64 {
    target_at(stages, elapsed).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ramp_hold_down() -> Vec<Stage> {
        vec![
            Stage::new(secs(30), 100),
            Stage::new(secs(60), 100),
            Stage::new(secs(30), 0),
        ]
    }

    #[test]
    fn ramp_up() {
        let stages = ramp_hold_down();
        assert_eq!(target_at(&stages, Duration::ZERO), 0.0);
        for s in 0..=30 {
            let expected = s as f64 * 100.0 / 30.0;
            assert!((target_at(&stages, secs(s)) - expected).abs() < 1e-9, "t={s}");
        }
        assert_eq!(vus_at(&stages, secs(15)), 50);
        assert_eq!(vus_at(&stages, secs(30)), 100);
    }

    #[test]
    fn hold_steady() {
        let stages = ramp_hold_down();
        for s in 30..=90 {
            assert_eq!(target_at(&stages, secs(s)), 100.0, "t={s}");
        }
    }

    #[test]
    fn ramp_down() {
        let stages = ramp_hold_down();
        assert_eq!(vus_at(&stages, secs(105)), 50);
        assert!((target_at(&stages, secs(111)) - 30.0).abs() < 1e-9);
        assert_eq!(target_at(&stages, secs(120)), 0.0);
    }

    #[test]
    fn after_last_stage_holds_last_target() {
        let stages = vec![Stage::new(secs(10), 5)];
        assert_eq!(target_at(&stages, secs(11)), 5.0);
        assert_eq!(target_at(&ramp_hold_down(), secs(500)), 0.0);
        assert_eq!(target_at(&[], secs(1)), 0.0);
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let stages = vec![Stage::new(Duration::ZERO, 50), Stage::new(secs(10), 50)];
        assert_eq!(target_at(&stages, Duration::ZERO), 50.0);
        assert_eq!(target_at(&stages, secs(5)), 50.0);
    }

    #[test]
    fn zero_target_stage_runs_nobody() {
        let stages = vec![Stage::new(secs(10), 0), Stage::new(secs(10), 10)];
        for s in 0..=10 {
            assert_eq!(vus_at(&stages, secs(s)), 0);
        }
        assert_eq!(vus_at(&stages, secs(15)), 5);
    }

    #[test]
    fn stage_index() {
        let stages = ramp_hold_down();
        assert_eq!(stage_index_at(&stages, Duration::ZERO), Some(0));
        assert_eq!(stage_index_at(&stages, secs(30)), Some(1));
        assert_eq!(stage_index_at(&stages, secs(119)), Some(2));
        assert_eq!(stage_index_at(&stages, secs(120)), None);
        assert_eq!(total_duration(&stages), secs(120));
    }
}
