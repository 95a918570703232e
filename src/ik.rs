//! Generic IK solver seam and its tuning block

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::ik;
use crate::kinematics::ForwardKinematics;
use crate::optimizer::PoseOptimizer;
use crate::types::{BodyId, Target, Vec3};

/// Whether a solve may start from the previous solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedOption {
    SeedLastSolution,
    NeverSeedLastSolution,
}

/// Parameter block handed to the IK solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub accuracy_cutoff: f64,
    pub seed_option: SeedOption,
    pub stiffness: f64,
    pub damping: f64,
    pub max_iterations: u32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            accuracy_cutoff: ik::DEFAULT_ACCURACY_CUTOFF,
            seed_option: SeedOption::SeedLastSolution,
            stiffness: ik::DEFAULT_STIFFNESS,
            damping: ik::DEFAULT_DAMPING,
            max_iterations: crate::constants::solver::ITERATION_CAP,
        }
    }
}

impl SolverParams {
    /// Refine schedule: halve the cutoff, stop seeding, pin stiffness and
    /// damping high. Cumulative across calls.
    pub fn tighten(&mut self) {
        self.accuracy_cutoff /= 2.0;
        self.seed_option = SeedOption::NeverSeedLastSolution;
        self.stiffness = ik::REFINE_STIFFNESS;
        self.damping = ik::REFINE_DAMPING;
    }
}

/// A grab: move `grabbed` so it sits at `offset` from `root_frame`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PertRequest {
    pub offset: Vec3,
    pub grabbed: BodyId,
    pub root_frame: BodyId,
}

/// Solver invoked for explicit perturbations. Non-convergence is never
/// reported back; the configuration is simply left where the solver got it.
pub trait IkSolver {
    fn perform(&mut self, params: &SolverParams, request: &PertRequest, qpos: &mut [f64]);

    /// Solve the last performed request again with `params`
    fn refine(&mut self, params: &SolverParams, qpos: &mut [f64]);
}

/// Reference solver built on [`PoseOptimizer`]
#[derive(Debug)]
pub struct CoordinateDescentIk<E> {
    engine: E,
    optimizer: PoseOptimizer,
    last_request: Option<PertRequest>,
    last_solution: Option<Vec<f64>>,
}

impl<E: ForwardKinematics> CoordinateDescentIk<E> {
    pub fn new(engine: E, optimizer: PoseOptimizer) -> Self {
        Self { engine, optimizer, last_request: None, last_solution: None }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    #[cfg(test)]
    pub fn last_request(&self) -> Option<&PertRequest> {
        self.last_request.as_ref()
    }

    fn solve(&mut self, params: &SolverParams, request: PertRequest, qpos: &mut [f64]) {
        if params.seed_option == SeedOption::SeedLastSolution
            && let Some(seed) = self.last_solution.as_ref().filter(|s| s.len() == qpos.len())
        {
            debug!("Seeding solve with last solution");
            qpos.copy_from_slice(seed);
        }

        debug!(
            stiffness = params.stiffness,
            damping = params.damping,
            cutoff = params.accuracy_cutoff,
            "IK parameters"
        );

        let report = self.optimizer.solve(
            &mut self.engine,
            qpos,
            &Target::relative(request.offset),
            request.grabbed,
            request.root_frame,
            params.max_iterations,
            params.accuracy_cutoff,
        );

        info!(
            grabbed = request.grabbed,
            root_frame = request.root_frame,
            iterations = report.iterations,
            error = report.final_error,
            converged = report.converged,
            "IK solve finished"
        );

        self.last_request = Some(request);
        self.last_solution = Some(qpos.to_vec());
    }
}

impl<E: ForwardKinematics> IkSolver for CoordinateDescentIk<E> {
    fn perform(&mut self, params: &SolverParams, request: &PertRequest, qpos: &mut [f64]) {
        self.solve(params, *request, qpos);
    }

    fn refine(&mut self, params: &SolverParams, qpos: &mut [f64]) {
        match self.last_request {
            Some(request) => self.solve(params, request, qpos),
            None => warn!("Refine requested before any perturbation was performed"),
        }
    }
}
