//! Greedy coordinate-descent pose optimizer
//!
//! One [`PoseOptimizer::step`] nudges every tunable coordinate by `±step`
//! in turn, measures the tracked-point error after each trial, and commits
//! only the single best trial. The step size shrinks with the error but
//! never below a fixed floor:
//!
//! ```text
//! step = gain * error + floor        (0.0193 * error + 0.0005)
//! ```
//!
//! Trials are evaluated strictly in order (coordinate ascending, `+step`
//! before `-step`) and each one starts from the untouched baseline, so the
//! first trial to reach a given error wins ties. The baseline error is the
//! starting "best", which makes a step monotonically non-increasing.

use std::ops::Range;
use tracing::{debug, trace};

use crate::constants::solver;
use crate::kinematics::ForwardKinematics;
use crate::types::{BodyId, Target, TargetFrame, Vec3};

/// Which coordinates of the configuration vector the optimizer may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateLayout {
    /// Leading root/free-floating coordinates that are never adjusted
    pub prefix_len: usize,
    /// Full configuration vector length
    pub coordinate_count: usize,
}

impl CoordinateLayout {
    pub const fn new(prefix_len: usize, coordinate_count: usize) -> Self {
        Self { prefix_len, coordinate_count }
    }

    /// Indices the optimizer iterates over
    pub fn tunable(&self) -> Range<usize> {
        self.prefix_len.min(self.coordinate_count)..self.coordinate_count
    }

    #[cfg(test)]
    pub fn tunable_count(&self) -> usize {
        self.tunable().len()
    }

    pub fn is_tunable(&self, index: usize) -> bool {
        self.tunable().contains(&index)
    }
}

/// Adaptive step size constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepGains {
    pub gain: f64,
    pub floor: f64,
}

impl Default for StepGains {
    fn default() -> Self {
        Self { gain: solver::STEP_GAIN, floor: solver::STEP_FLOOR }
    }
}

/// One tentative adjustment of a single coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trial {
    pub coordinate: usize,
    /// Signed amount added to the coordinate
    pub delta: f64,
    /// Tracked-point error with the adjustment applied
    pub error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub baseline_error: f64,
    pub step: f64,
    /// Best improving trial, if any beat the baseline
    pub best: Option<Trial>,
    pub committed: bool,
}

impl StepReport {
    /// Error of the configuration left behind by the step
    pub fn error_after(&self) -> f64 {
        match self.best {
            Some(trial) if self.committed => trial.error,
            _ => self.baseline_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub iterations: u32,
    pub initial_error: f64,
    pub final_error: f64,
    /// Error reached the tolerance before the cap or a stall
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseOptimizer {
    pub layout: CoordinateLayout,
    pub gains: StepGains,
}

impl PoseOptimizer {
    pub fn new(layout: CoordinateLayout, gains: StepGains) -> Self {
        Self { layout, gains }
    }

    pub fn step_size(&self, error: f64) -> f64 {
        self.gains.gain * error + self.gains.floor
    }

    /// Point being tracked for `target`: the end body in world space, or its
    /// offset from the root body. A body tracked relative to itself falls
    /// back to world space.
    pub fn tracked_point<E>(engine: &E, target: &Target, end: BodyId, root: BodyId) -> Vec3
    where
        E: ForwardKinematics + ?Sized,
    {
        let end_pos = engine.body_position(end);
        match target.frame {
            TargetFrame::RelativeToRoot if end != root => end_pos - engine.body_position(root),
            _ => end_pos,
        }
    }

    /// Run forward kinematics for `qpos` and measure the distance to `target`
    pub fn tracking_error<E>(engine: &mut E, qpos: &[f64], target: &Target, end: BodyId, root: BodyId) -> f64
    where
        E: ForwardKinematics + ?Sized,
    {
        engine.forward(qpos);
        Self::tracked_point(engine, target, end, root).distance(target.point)
    }

    /// One greedy step. Runs forward kinematics `2 * tunable + 1` times and
    /// leaves `qpos` either unchanged or with exactly one coordinate moved.
    pub fn step<E>(&self, engine: &mut E, qpos: &mut [f64], target: &Target, end: BodyId, root: BodyId) -> StepReport
    where
        E: ForwardKinematics + ?Sized,
    {
        let baseline_error = Self::tracking_error(engine, qpos, target, end, root);
        let step = self.step_size(baseline_error);

        let mut best_error = baseline_error;
        let mut best: Option<Trial> = None;

        let tunable = self.layout.tunable();
        let end_index = tunable.end.min(qpos.len());
        for i in tunable.start..end_index {
            let original = qpos[i];
            for delta in [step, -step] {
                qpos[i] = original + delta;
                let error = Self::tracking_error(engine, qpos, target, end, root);
                if error < best_error {
                    best_error = error;
                    best = Some(Trial { coordinate: i, delta, error });
                }
            }
            qpos[i] = original;
        }

        let committed = match best {
            Some(trial) if self.layout.is_tunable(trial.coordinate) => {
                qpos[trial.coordinate] += trial.delta;
                true
            }
            _ => false,
        };

        StepReport { baseline_error, step, best, committed }
    }

    /// Repeat [`step`](Self::step) until the error is within `tolerance`,
    /// a step makes no progress, or `max_iterations` steps have run
    pub fn solve<E>(
        &self,
        engine: &mut E,
        qpos: &mut [f64],
        target: &Target,
        end: BodyId,
        root: BodyId,
        max_iterations: u32,
        tolerance: f64,
    ) -> SolveReport
    where
        E: ForwardKinematics + ?Sized,
    {
        let initial_error = Self::tracking_error(engine, qpos, target, end, root);
        let mut error = initial_error;
        let mut iterations = 0;

        while iterations < max_iterations && error > tolerance {
            let report = self.step(engine, qpos, target, end, root);
            iterations += 1;
            trace!(iteration = iterations, step = report.step, best = ?report.best, "Pose step");
            if !report.committed {
                break;
            }
            error = report.error_after();
        }

        debug!(
            end = end,
            root = root,
            iterations = iterations,
            initial_error = initial_error,
            final_error = error,
            "Pose solve finished"
        );

        SolveReport { iterations, initial_error, final_error: error, converged: error <= tolerance }
    }
}

impl Default for PoseOptimizer {
    fn default() -> Self {
        Self::new(
            CoordinateLayout::new(solver::FREE_PREFIX_LEN, crate::constants::qpos::SIZE),
            StepGains::default(),
        )
    }
}
