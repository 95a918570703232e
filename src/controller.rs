//! Key mapping and command dispatch
//!
//! Navigation keys work with or without modifiers. Anything that touches
//! the history or the perturbation session needs Ctrl, so ordinary
//! navigation can never rewrite the timeline by accident.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::constants::playback;
use crate::ik::IkSolver;
use crate::kinematics::ForwardKinematics;
use crate::optimizer::PoseOptimizer;
use crate::session::{Drag, DragOutcome, NodeType, PerturbationSession, Selection};
use crate::snapshot::ConfigurationSnapshot;
use crate::timeline::Timeline;

/// Keys the editor reacts to, independent of the input backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    PageUp,
    PageDown,
    Minus,
    Equal,
    Enter,
    Space,
    Left,
    Right,
    Up,
    Down,
    E,
    P,
    R,
    S,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub control: bool,
    pub shift: bool,
}

#[cfg(test)]
impl Modifiers {
    pub const NONE: Self = Self { control: false, shift: false };
    pub const CONTROL: Self = Self { control: true, shift: false };
    pub const CONTROL_SHIFT: Self = Self { control: true, shift: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SelectNextJoint,
    SelectPrevJoint,
    ShrinkSelectionRadius,
    GrowSelectionRadius,
    CycleNodeType,
    TogglePause,
    /// Move frozen playback time by this many microseconds
    Scrub(i64),
    LoadPerturbation,
    SavePerturbation,
    RefinePerturbation,
    ExpandPose,
    Undo,
    Redo,
}

impl Command {
    /// Map a key press to a command. Arrow keys only scrub while paused.
    pub fn from_key(key: Key, mods: Modifiers, paused: bool) -> Option<Self> {
        let command = match key {
            Key::PageUp => Self::SelectNextJoint,
            Key::PageDown => Self::SelectPrevJoint,
            Key::Minus => Self::ShrinkSelectionRadius,
            Key::Equal => Self::GrowSelectionRadius,
            Key::Enter => Self::CycleNodeType,
            Key::Space => Self::TogglePause,
            Key::Right if paused => Self::Scrub(-playback::FINE_SCRUB_US),
            Key::Left if paused => Self::Scrub(playback::FINE_SCRUB_US),
            Key::Down if paused => Self::Scrub(-playback::COARSE_SCRUB_US),
            Key::Up if paused => Self::Scrub(playback::COARSE_SCRUB_US),
            Key::P if mods.control => Self::LoadPerturbation,
            Key::S if mods.control => Self::SavePerturbation,
            Key::R if mods.control => Self::RefinePerturbation,
            Key::E if mods.control => Self::ExpandPose,
            Key::Z if mods.control && !mods.shift => Self::Undo,
            Key::Z | Key::Y if mods.control => Self::Redo,
            _ => return None,
        };
        Some(command)
    }

    /// History and session commands, gated behind Ctrl
    #[cfg(test)]
    pub fn mutates_history(&self) -> bool {
        matches!(
            self,
            Self::LoadPerturbation
                | Self::SavePerturbation
                | Self::RefinePerturbation
                | Self::ExpandPose
                | Self::Undo
                | Self::Redo
        )
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let command = match name {
            "select-next-joint" => Self::SelectNextJoint,
            "select-prev-joint" => Self::SelectPrevJoint,
            "shrink-selection-radius" => Self::ShrinkSelectionRadius,
            "grow-selection-radius" => Self::GrowSelectionRadius,
            "cycle-node-type" => Self::CycleNodeType,
            "toggle-pause" => Self::TogglePause,
            "scrub" => {
                let Some(delta) = parts.next() else { bail!("scrub needs a microsecond delta") };
                Self::Scrub(delta.parse()?)
            }
            "load-perturbation" => Self::LoadPerturbation,
            "save-perturbation" => Self::SavePerturbation,
            "refine-perturbation" => Self::RefinePerturbation,
            "expand-pose" => Self::ExpandPose,
            "undo" => Self::Undo,
            "redo" => Self::Redo,
            other => bail!("Unknown command '{other}'"),
        };
        Ok(command)
    }
}

/// Rendering hooks the editor drives
pub trait Visualizer {
    /// Rebuild the selection nodes around the selected body
    fn revisualize(&mut self, selection: &Selection, qpos: &[f64]);

    fn recolor(&mut self, node_type: NodeType);
}

/// Visualizer that only logs, for headless runs
#[derive(Debug, Default)]
pub struct LogVisualizer;

impl Visualizer for LogVisualizer {
    fn revisualize(&mut self, selection: &Selection, _qpos: &[f64]) {
        info!(
            body = selection.id_last_non_node_select,
            joint = selection.joint_index,
            node_type = ?selection.node_type,
            node_count = selection.node_count,
            node_sigma = selection.node_sigma,
            node_height = selection.node_height,
            "Revisualize selection"
        );
    }

    fn recolor(&mut self, node_type: NodeType) {
        info!(node_type = ?node_type, "Recolor nodes");
    }
}

/// Trajectory playback clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Playback {
    pub paused: bool,
    /// Playback time while paused, in microseconds
    pub time_frozen: i64,
}

impl Playback {
    pub fn frame(&self) -> usize {
        let frame = self.time_frozen.max(0) * playback::FRAMES_PER_SECOND / 1_000_000;
        usize::try_from(frame).unwrap_or(0)
    }
}

/// External collaborators a command may need
pub struct Collaborators<'a> {
    pub ik: &'a mut dyn IkSolver,
    pub engine: &'a mut dyn ForwardKinematics,
    pub view: &'a mut dyn Visualizer,
}

pub struct InputController {
    pub timeline: Timeline,
    pub session: PerturbationSession,
    pub playback: Playback,
    working: Vec<f64>,
    optimizer: PoseOptimizer,
    iteration_cap: u32,
    record_path: PathBuf,
}

impl InputController {
    pub fn new(
        initial: ConfigurationSnapshot,
        session: PerturbationSession,
        optimizer: PoseOptimizer,
        iteration_cap: u32,
        record_path: PathBuf,
        history_depth: Option<usize>,
    ) -> Self {
        let working = initial.values().to_vec();
        let timeline = match history_depth {
            Some(depth) => Timeline::with_max_depth(initial, depth),
            None => Timeline::new(initial),
        };
        Self {
            timeline,
            session,
            playback: Playback::default(),
            working,
            optimizer,
            iteration_cap,
            record_path,
        }
    }

    /// Configuration being edited (may be ahead of the timeline)
    #[cfg(test)]
    pub fn working(&self) -> &[f64] {
        &self.working
    }

    pub fn coordinate_count(&self) -> usize {
        self.working.len()
    }

    pub fn handle_key(&mut self, key: Key, mods: Modifiers, collab: &mut Collaborators<'_>) -> Result<Option<Command>> {
        let Some(command) = Command::from_key(key, mods, self.playback.paused) else {
            debug!(key = ?key, mods = ?mods, "Key not bound");
            return Ok(None);
        };
        self.execute(command, collab)?;
        Ok(Some(command))
    }

    pub fn execute(&mut self, command: Command, collab: &mut Collaborators<'_>) -> Result<()> {
        debug!(command = ?command, "Executing command");
        let count = self.coordinate_count();
        match command {
            Command::SelectNextJoint | Command::SelectPrevJoint => {
                if command == Command::SelectNextJoint {
                    self.session.selection.select_next_joint(count);
                } else {
                    self.session.selection.select_prev_joint(count);
                }
                if self.session.selection.node_type == NodeType::JointId {
                    collab.view.revisualize(&self.session.selection, &self.working);
                }
            }
            Command::ShrinkSelectionRadius => {
                self.session.selection.shrink_radius();
                collab.view.revisualize(&self.session.selection, &self.working);
            }
            Command::GrowSelectionRadius => {
                self.session.selection.grow_radius();
                collab.view.revisualize(&self.session.selection, &self.working);
            }
            Command::CycleNodeType => {
                let node_type = self.session.selection.cycle_node_type();
                collab.view.recolor(node_type);
                collab.view.revisualize(&self.session.selection, &self.working);
            }
            Command::TogglePause => {
                self.playback.paused = !self.playback.paused;
                info!(paused = self.playback.paused, "Playback toggled");
            }
            Command::Scrub(delta) => {
                if self.playback.paused {
                    self.playback.time_frozen += delta;
                }
            }
            Command::LoadPerturbation => {
                let load = self.session.load_from_path(&self.record_path, &mut *collab.ik, &mut self.working);
                debug!(fields_read = load.fields_read, fields_applied = load.fields_applied, "Loaded perturbation record");
                if load.complete {
                    self.commit();
                }
            }
            Command::SavePerturbation => self.session.save_to_path(&self.record_path)?,
            Command::RefinePerturbation => {
                self.session.refine(&mut *collab.ik, &mut self.working);
                self.commit();
            }
            Command::ExpandPose => {
                self.session.expand_pose(&mut self.timeline, &self.working, self.playback.frame());
            }
            Command::Undo => {
                if self.timeline.undo() {
                    self.after_history_move(&mut *collab.view);
                }
            }
            Command::Redo => {
                if self.timeline.redo() {
                    self.after_history_move(&mut *collab.view);
                }
            }
        }
        Ok(())
    }

    /// Follow a drag; the working configuration changes but nothing is
    /// committed until [`end_drag`](Self::end_drag)
    pub fn drag(&mut self, drag: Drag, collab: &mut Collaborators<'_>) -> DragOutcome {
        let outcome = self.session.apply_drag(
            &mut *collab.engine,
            &self.optimizer,
            &mut self.working,
            &drag,
            self.iteration_cap,
        );
        if let DragOutcome::Solved(report) = outcome
            && !report.converged
        {
            debug!(body = drag.body, error = report.final_error, "Drag target not reached yet");
        }
        outcome
    }

    /// Commit the dragged pose to the history
    pub fn end_drag(&mut self) {
        self.commit();
    }

    /// Push the working configuration unless it matches the current
    /// snapshot; an unchanged commit would still drop the redo branch
    fn commit(&mut self) {
        if self.working.as_slice() == self.timeline.current().values() {
            debug!(redo = self.timeline.redo_depth(), "Working configuration unchanged, nothing to commit");
            return;
        }
        self.session.expand_pose(&mut self.timeline, &self.working, self.playback.frame());
    }

    fn after_history_move(&mut self, view: &mut dyn Visualizer) {
        let current = self.timeline.current();
        if current.len() == self.working.len() {
            self.working.copy_from_slice(current.values());
        } else {
            warn!(expected = self.working.len(), found = current.len(), "Snapshot length mismatch");
            self.working = current.values().to_vec();
        }
        if self.session.selection.tracked_body().is_some() {
            view.revisualize(&self.session.selection, &self.working);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{qpos, selection};
    use crate::ik::{PertRequest, SolverParams};
    use crate::kinematics::SerialChain;
    use crate::optimizer::{CoordinateLayout, StepGains};
    use crate::types::Vec3;

    #[derive(Default)]
    struct NullSolver {
        refines: usize,
        /// Refine leaves the configuration untouched
        stalled: bool,
    }

    impl IkSolver for NullSolver {
        fn perform(&mut self, _params: &SolverParams, _request: &PertRequest, qpos: &mut [f64]) {
            qpos[qpos.len() - 1] += 1.0;
        }

        fn refine(&mut self, _params: &SolverParams, qpos: &mut [f64]) {
            self.refines += 1;
            if !self.stalled {
                qpos[qpos.len() - 1] += 0.5;
            }
        }
    }

    #[derive(Default)]
    struct CountingView {
        revisualized: usize,
        recolored: Vec<NodeType>,
    }

    impl Visualizer for CountingView {
        fn revisualize(&mut self, _selection: &Selection, _qpos: &[f64]) {
            self.revisualized += 1;
        }

        fn recolor(&mut self, node_type: NodeType) {
            self.recolored.push(node_type);
        }
    }

    struct Fixture {
        controller: InputController,
        ik: NullSolver,
        engine: SerialChain,
        view: CountingView,
    }

    impl Fixture {
        fn new() -> Self {
            let record = std::env::temp_dir().join(format!("pose-timeline-controller-{}.pert", std::process::id()));
            Self {
                controller: InputController::new(
                    ConfigurationSnapshot::new(vec![0.0; qpos::SIZE]),
                    PerturbationSession::default(),
                    PoseOptimizer::new(CoordinateLayout::new(15, qpos::SIZE), StepGains::default()),
                    100,
                    record,
                    None,
                ),
                ik: NullSolver::default(),
                engine: SerialChain::reference(15, qpos::SIZE, 0.05),
                view: CountingView::default(),
            }
        }

        fn key(&mut self, key: Key, mods: Modifiers) -> Option<Command> {
            let mut collab = Collaborators { ik: &mut self.ik, engine: &mut self.engine, view: &mut self.view };
            self.controller.handle_key(key, mods, &mut collab).unwrap()
        }

        fn drag(&mut self, drag: Drag) -> DragOutcome {
            let mut collab = Collaborators { ik: &mut self.ik, engine: &mut self.engine, view: &mut self.view };
            self.controller.drag(drag, &mut collab)
        }
    }

    #[test]
    fn test_history_commands_need_control() {
        for key in [Key::P, Key::R, Key::E, Key::S, Key::Z, Key::Y] {
            assert_eq!(Command::from_key(key, Modifiers::NONE, false), None, "{key:?}");
            assert!(Command::from_key(key, Modifiers::CONTROL, false).is_some_and(|c| c.mutates_history()));
        }
    }

    #[test]
    fn test_navigation_keys_ignore_modifiers() {
        for mods in [Modifiers::NONE, Modifiers::CONTROL] {
            assert_eq!(Command::from_key(Key::PageUp, mods, false), Some(Command::SelectNextJoint));
            assert_eq!(Command::from_key(Key::Enter, mods, false), Some(Command::CycleNodeType));
        }
    }

    #[test]
    fn test_undo_redo_bindings() {
        assert_eq!(Command::from_key(Key::Z, Modifiers::CONTROL, false), Some(Command::Undo));
        assert_eq!(Command::from_key(Key::Z, Modifiers::CONTROL_SHIFT, false), Some(Command::Redo));
        assert_eq!(Command::from_key(Key::Y, Modifiers::CONTROL, false), Some(Command::Redo));
    }

    #[test]
    fn test_arrows_only_scrub_while_paused() {
        assert_eq!(Command::from_key(Key::Left, Modifiers::NONE, false), None);
        assert_eq!(
            Command::from_key(Key::Left, Modifiers::NONE, true),
            Some(Command::Scrub(playback::FINE_SCRUB_US))
        );
        assert_eq!(
            Command::from_key(Key::Down, Modifiers::NONE, true),
            Some(Command::Scrub(-playback::COARSE_SCRUB_US))
        );
    }

    #[test]
    fn test_command_names_parse() {
        assert_eq!("undo".parse::<Command>().unwrap(), Command::Undo);
        assert_eq!("refine-perturbation".parse::<Command>().unwrap(), Command::RefinePerturbation);
        assert_eq!("scrub -50000".parse::<Command>().unwrap(), Command::Scrub(-50_000));
        assert!("scrub".parse::<Command>().is_err());
        assert!("jump".parse::<Command>().is_err());
    }

    #[test]
    fn test_joint_selection_wraps_both_ways() {
        let mut fx = Fixture::new();
        fx.key(Key::PageDown, Modifiers::NONE);
        assert_eq!(fx.controller.session.selection.joint_index, qpos::SIZE - 1);
        fx.key(Key::PageUp, Modifiers::NONE);
        assert_eq!(fx.controller.session.selection.joint_index, 0);
        assert_eq!(fx.view.revisualized, 2);
    }

    #[test]
    fn test_joint_selection_revisualizes_only_for_joint_nodes() {
        let mut fx = Fixture::new();
        fx.key(Key::Enter, Modifiers::NONE);
        assert_eq!(fx.view.recolored, vec![NodeType::Body]);
        assert_eq!(fx.view.revisualized, 1);

        fx.key(Key::PageUp, Modifiers::NONE);
        assert_eq!(fx.view.revisualized, 1);
    }

    #[test]
    fn test_expand_undo_redo_through_keys() {
        let mut fx = Fixture::new();
        fx.controller.working[20] = 0.25;
        fx.key(Key::E, Modifiers::CONTROL);
        assert_eq!(fx.controller.timeline.len(), 2);

        fx.key(Key::Z, Modifiers::CONTROL);
        assert_eq!(fx.controller.working()[20], 0.0);

        fx.key(Key::Y, Modifiers::CONTROL);
        assert_eq!(fx.controller.working()[20], 0.25);
    }

    #[test]
    fn test_undo_revisualizes_tracked_body_only() {
        let mut fx = Fixture::new();
        fx.key(Key::E, Modifiers::CONTROL);

        fx.key(Key::Z, Modifiers::CONTROL);
        assert_eq!(fx.view.revisualized, 0);

        fx.controller.session.selection.id_last_non_node_select = 5;
        fx.key(Key::Y, Modifiers::CONTROL);
        assert_eq!(fx.view.revisualized, 1);

        // Redo at the newest entry moves nothing and revisualizes nothing
        fx.key(Key::Y, Modifiers::CONTROL);
        assert_eq!(fx.view.revisualized, 1);
    }

    #[test]
    fn test_refine_commits_snapshot() {
        let mut fx = Fixture::new();
        fx.key(Key::R, Modifiers::CONTROL);
        fx.key(Key::R, Modifiers::CONTROL);

        assert_eq!(fx.ik.refines, 2);
        assert_eq!(fx.controller.timeline.len(), 3);
        assert_eq!(fx.controller.timeline.current().values()[qpos::SIZE - 1], 1.0);
    }

    #[test]
    fn test_unchanged_refine_keeps_redo_branch() {
        let mut fx = Fixture::new();
        fx.controller.working[20] = 0.25;
        fx.key(Key::E, Modifiers::CONTROL);
        fx.key(Key::Z, Modifiers::CONTROL);
        assert!(fx.controller.timeline.can_redo());

        fx.ik.stalled = true;
        fx.key(Key::R, Modifiers::CONTROL);

        assert_eq!(fx.ik.refines, 1);
        assert!(fx.controller.timeline.can_redo());
        assert_eq!(fx.controller.timeline.len(), 2);

        fx.key(Key::Y, Modifiers::CONTROL);
        assert_eq!(fx.controller.working[20], 0.25);
    }

    #[test]
    fn test_scrub_changes_frame_while_paused() {
        let mut fx = Fixture::new();
        fx.key(Key::Up, Modifiers::NONE);
        assert_eq!(fx.controller.playback.time_frozen, 0);

        fx.key(Key::Space, Modifiers::NONE);
        fx.key(Key::Up, Modifiers::NONE);
        fx.key(Key::Right, Modifiers::NONE);
        assert_eq!(fx.controller.playback.time_frozen, 450_000);
        assert_eq!(fx.controller.playback.frame(), 900);
    }

    #[test]
    fn test_drag_commits_on_release() {
        let mut fx = Fixture::new();
        let drag = Drag { body: selection::ROOT_BODY, reference: Vec3::new(0.5, 0.0, 1.0) };
        assert_eq!(fx.drag(drag), DragOutcome::MovedRoot);
        assert_eq!(fx.controller.timeline.len(), 1);

        fx.controller.end_drag();
        assert_eq!(fx.controller.timeline.len(), 2);
        assert_eq!(&fx.controller.timeline.current().values()[..3], &[0.5, 0.0, 1.0]);

        // Releasing again without movement adds nothing
        fx.controller.end_drag();
        assert_eq!(fx.controller.timeline.len(), 2);
    }

    #[test]
    fn test_save_and_load_perturbation_keys() {
        let mut fx = Fixture::new();
        fx.controller.session.body_id = 3;
        fx.controller.session.grabbed_offset = Vec3::new(0.1, 0.2, 0.3);
        fx.key(Key::S, Modifiers::CONTROL);

        fx.controller.session = PerturbationSession::default();
        fx.key(Key::P, Modifiers::CONTROL);
        let _ = std::fs::remove_file(&fx.controller.record_path);

        assert_eq!(fx.controller.session.body_id, 3);
        assert_eq!(fx.controller.session.selection.id_last_non_node_select, 3);
        assert_eq!(fx.controller.timeline.len(), 2);
    }
}
