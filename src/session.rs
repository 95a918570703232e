//! Perturbation session: selection state, record load/save, refine, drag
//!
//! The session owns the solver tuning block. It is created lazily by the
//! first refine and tightened by every refine after that, so repeated
//! refine presses converge harder each time for the rest of the session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::constants::{self, selection};
use crate::ik::{IkSolver, PertRequest, SolverParams};
use crate::kinematics::ForwardKinematics;
use crate::optimizer::{PoseOptimizer, SolveReport};
use crate::record::{PartialRecord, PerturbationRecord};
use crate::snapshot::ConfigurationSnapshot;
use crate::timeline::Timeline;
use crate::types::{BodyId, Target, Vec3};

/// What the selection nodes are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    JointId,
    Body,
    CenterOfMass,
}

impl NodeType {
    pub const COUNT: usize = 3;

    const ALL: [NodeType; Self::COUNT] = [NodeType::JointId, NodeType::Body, NodeType::CenterOfMass];

    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::COUNT]
    }
}

/// How a record with missing lines is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Apply every field read before the first missing line
    #[default]
    Partial,
    /// Apply nothing unless all six lines are present
    Atomic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Configuration coordinate highlighted by joint navigation
    pub joint_index: usize,
    pub node_type: NodeType,
    /// Number of visualization nodes ("selection radius")
    pub node_count: f64,
    pub node_sigma: f64,
    pub node_height: f64,
    /// Last body picked directly (not through a visualization node)
    pub id_last_non_node_select: i32,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            joint_index: 0,
            node_type: NodeType::JointId,
            node_count: selection::DEFAULT_NODE_COUNT,
            node_sigma: selection::DEFAULT_NODE_SIGMA,
            node_height: selection::DEFAULT_NODE_HEIGHT,
            id_last_non_node_select: 0,
        }
    }
}

impl Selection {
    pub fn select_next_joint(&mut self, coordinate_count: usize) {
        self.joint_index = (self.joint_index + 1) % coordinate_count.max(1);
    }

    pub fn select_prev_joint(&mut self, coordinate_count: usize) {
        let n = coordinate_count.max(1);
        self.joint_index = (self.joint_index + n - 1) % n;
    }

    pub fn shrink_radius(&mut self) {
        self.node_count /= selection::NODE_COUNT_FACTOR;
    }

    pub fn grow_radius(&mut self) {
        self.node_count *= selection::NODE_COUNT_FACTOR;
    }

    pub fn cycle_node_type(&mut self) -> NodeType {
        self.node_type = self.node_type.next();
        self.node_type
    }

    /// Body to re-visualize after a history move, if one is being tracked
    pub fn tracked_body(&self) -> Option<BodyId> {
        let id = self.id_last_non_node_select;
        if (selection::FIRST_TRACKED_BODY..=selection::LAST_TRACKED_BODY).contains(&id) {
            BodyId::try_from(id).ok()
        } else {
            None
        }
    }
}

/// Outcome of loading a record into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLoad {
    /// Lines present in the input
    pub fields_read: usize,
    /// Fields written into the session
    pub fields_applied: usize,
    pub complete: bool,
}

impl RecordLoad {
    const MISSING: Self = Self { fields_read: 0, fields_applied: 0, complete: false };
}

/// A mouse grab of `body` dragged to world position `reference`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drag {
    pub body: BodyId,
    pub reference: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragOutcome {
    /// The root body was grabbed; it was placed directly
    MovedRoot,
    Solved(SolveReport),
}

#[derive(Debug, Clone)]
pub struct PerturbationSession {
    pub selection: Selection,
    pub body_id: i32,
    pub root_frame: i32,
    pub grabbed_offset: Vec3,
    pub load_policy: LoadPolicy,
    /// Block the tuning state starts from
    base_params: SolverParams,
    tuning: Option<SolverParams>,
}

impl Default for PerturbationSession {
    fn default() -> Self {
        Self::new(SolverParams::default(), LoadPolicy::default())
    }
}

impl PerturbationSession {
    pub fn new(base_params: SolverParams, load_policy: LoadPolicy) -> Self {
        Self {
            selection: Selection::default(),
            body_id: 0,
            root_frame: 0,
            grabbed_offset: Vec3::ZERO,
            load_policy,
            base_params,
            tuning: None,
        }
    }

    /// Tuning block, once the first refine has created it
    #[cfg(test)]
    pub fn tuning(&self) -> Option<&SolverParams> {
        self.tuning.as_ref()
    }

    /// Session fields as a persistable record
    pub fn record(&self) -> PerturbationRecord {
        PerturbationRecord {
            body_id: self.body_id,
            root_frame: self.root_frame,
            node_sigma: self.selection.node_sigma,
            offset: self.grabbed_offset,
        }
    }

    /// Grab request for the current record fields; negative ids have no body
    pub fn pert_request(&self) -> Option<PertRequest> {
        Some(PertRequest {
            offset: self.grabbed_offset,
            grabbed: BodyId::try_from(self.body_id).ok()?,
            root_frame: BodyId::try_from(self.root_frame).ok()?,
        })
    }

    /// Parse `text` and apply it under the session's load policy
    pub fn load_from_record(&mut self, text: &str) -> RecordLoad {
        let parsed = PartialRecord::parse(text);
        let fields_read = parsed.field_count();
        let complete = fields_read == PartialRecord::FIELD_COUNT;

        let fields_applied = match (self.load_policy, parsed.complete()) {
            (_, Some(record)) => {
                self.apply_record(&record);
                PartialRecord::FIELD_COUNT
            }
            (LoadPolicy::Atomic, None) => 0,
            (LoadPolicy::Partial, None) => self.apply_partial(&parsed),
        };

        if !complete {
            warn!(
                fields_read = fields_read,
                fields_applied = fields_applied,
                policy = ?self.load_policy,
                "Perturbation record truncated"
            );
        }

        RecordLoad { fields_read, fields_applied, complete }
    }

    fn apply_record(&mut self, record: &PerturbationRecord) {
        self.body_id = record.body_id;
        self.root_frame = record.root_frame;
        self.selection.node_sigma = record.node_sigma;
        self.grabbed_offset = record.offset;
    }

    fn apply_partial(&mut self, parsed: &PartialRecord) -> usize {
        if let Some(body_id) = parsed.body_id {
            self.body_id = body_id;
        }
        if let Some(root_frame) = parsed.root_frame {
            self.root_frame = root_frame;
        }
        if let Some(node_sigma) = parsed.node_sigma {
            self.selection.node_sigma = node_sigma;
        }
        let [x, y, z] = parsed.offset;
        if let Some(x) = x {
            self.grabbed_offset.x = x;
        }
        if let Some(y) = y {
            self.grabbed_offset.y = y;
        }
        if let Some(z) = z {
            self.grabbed_offset.z = z;
        }
        parsed.field_count()
    }

    /// Load the record at `path` and, when it is complete, perform the
    /// perturbation with a default parameter block. A missing or unreadable
    /// file is logged and otherwise ignored.
    pub fn load_from_path(&mut self, path: &Path, solver: &mut dyn IkSolver, qpos: &mut [f64]) -> RecordLoad {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "No perturbation record to load");
                return RecordLoad::MISSING;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read perturbation record");
                return RecordLoad::MISSING;
            }
        };

        let load = self.load_from_record(&contents);
        if !load.complete {
            return load;
        }

        match self.pert_request() {
            Some(request) => {
                info!(
                    body = request.grabbed,
                    root_frame = request.root_frame,
                    offset = ?request.offset,
                    "Performing loaded perturbation"
                );
                solver.perform(&SolverParams::default(), &request, qpos);
                self.selection.id_last_non_node_select = self.body_id;
            }
            None => warn!(body_id = self.body_id, root_frame = self.root_frame, "Record names no valid body"),
        }
        load
    }

    /// Write the session's record to `path`
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create record directory {}", parent.display()))?;
        }
        fs::write(path, self.record().to_string())
            .with_context(|| format!("Failed to write perturbation record to {}", path.display()))?;
        info!(path = %path.display(), "Saved perturbation record");
        Ok(())
    }

    /// Tighten the tuning block and refine the last perturbation with it
    pub fn refine(&mut self, solver: &mut dyn IkSolver, qpos: &mut [f64]) {
        let base = self.base_params;
        let params = self.tuning.get_or_insert(base);
        params.tighten();
        let params = *params;

        info!(
            accuracy_cutoff = params.accuracy_cutoff,
            seed_option = ?params.seed_option,
            stiffness = params.stiffness,
            damping = params.damping,
            "Refining perturbation"
        );
        solver.refine(&params, qpos);
    }

    /// Push the working configuration onto the timeline as a new snapshot
    pub fn expand_pose(&self, timeline: &mut Timeline, qpos: &[f64], frame: usize) {
        timeline.expand(ConfigurationSnapshot::capture(qpos, frame));
        debug!(frame = frame, history = timeline.len(), "Expanded pose");
    }

    /// Follow a mouse drag. Grabbing the root places it directly; any other
    /// body is pulled toward the reference by the greedy optimizer.
    pub fn apply_drag<E>(
        &mut self,
        engine: &mut E,
        optimizer: &PoseOptimizer,
        qpos: &mut [f64],
        drag: &Drag,
        max_iterations: u32,
    ) -> DragOutcome
    where
        E: ForwardKinematics + ?Sized,
    {
        self.selection.id_last_non_node_select = i32::try_from(drag.body).unwrap_or(i32::MAX);

        let (outcome, root_frame) = if drag.body == selection::ROOT_BODY {
            let n = constants::qpos::ROOT_TRANSLATION.min(qpos.len());
            qpos[..n].copy_from_slice(&drag.reference.to_array()[..n]);
            debug!(reference = ?drag.reference, "Moved root body");
            (DragOutcome::MovedRoot, selection::WORLD_BODY)
        } else {
            let report = optimizer.solve(
                engine,
                qpos,
                &Target::world(drag.reference),
                drag.body,
                drag.body,
                max_iterations,
                0.0,
            );
            (DragOutcome::Solved(report), selection::ROOT_BODY)
        };

        // Keep the grab as a perturbation so it can be saved and replayed
        engine.forward(qpos);
        self.body_id = i32::try_from(drag.body).unwrap_or(i32::MAX);
        self.root_frame = i32::try_from(root_frame).unwrap_or(i32::MAX);
        self.grabbed_offset = drag.reference - engine.body_position(root_frame);
        outcome
    }
}
