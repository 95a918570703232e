//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Configuration vector layout
pub mod qpos {
    /// Length of the full configuration vector (free-floating base + joints)
    pub const SIZE: usize = 35;

    /// Number of leading coordinates that place the root body in world space
    pub const ROOT_TRANSLATION: usize = 3;
}

/// Greedy pose solver tuning
pub mod solver {
    /// Leading coordinates the optimizer never touches (root/free-floating block)
    pub const FREE_PREFIX_LEN: usize = 15;

    /// Step size gain per unit of positional error
    pub const STEP_GAIN: f64 = 0.0193;

    /// Step size floor so progress never fully stalls
    pub const STEP_FLOOR: f64 = 0.0005;

    /// Iteration cap for one drag/solve pass
    pub const ITERATION_CAP: u32 = 100;
}

/// Reference serial chain used when no model is attached
pub mod chain {
    /// Length of every link, in meters
    pub const DEFAULT_LINK_LENGTH: f64 = 0.05;
}

/// Generic IK solver parameter block
pub mod ik {
    /// Accuracy cutoff of a freshly filled parameter block
    pub const DEFAULT_ACCURACY_CUTOFF: f64 = 1e-3;

    /// Stiffness of a freshly filled parameter block
    pub const DEFAULT_STIFFNESS: f64 = 1000.0;

    /// Damping of a freshly filled parameter block
    pub const DEFAULT_DAMPING: f64 = 3.0;

    /// Stiffness forced by every refine
    pub const REFINE_STIFFNESS: f64 = 10000.0;

    /// Damping forced by every refine
    pub const REFINE_DAMPING: f64 = 10.0;
}

/// Body selection constants
pub mod selection {
    /// Fixed world origin; frame of a root grab
    pub const WORLD_BODY: usize = 0;

    /// Body that moves the whole model when grabbed (pelvis)
    pub const ROOT_BODY: usize = 1;

    /// Smallest body id that triggers re-visualization on undo/redo
    pub const FIRST_TRACKED_BODY: i32 = 1;

    /// Largest body id that triggers re-visualization on undo/redo
    pub const LAST_TRACKED_BODY: i32 = 25;

    /// Initial number of visualization nodes
    pub const DEFAULT_NODE_COUNT: f64 = 50.0;

    /// Factor applied by grow/shrink selection radius
    pub const NODE_COUNT_FACTOR: f64 = 1.5;

    /// Initial node sigma
    pub const DEFAULT_NODE_SIGMA: f64 = 100.0;

    /// Initial node height
    pub const DEFAULT_NODE_HEIGHT: f64 = 0.1;
}

/// Playback scrubbing constants (microseconds)
pub mod playback {
    /// Frozen-time step for left/right arrows
    pub const FINE_SCRUB_US: i64 = 50_000;

    /// Frozen-time step for up/down arrows
    pub const COARSE_SCRUB_US: i64 = 500_000;

    /// Frames per second of the recorded trajectory
    pub const FRAMES_PER_SECOND: i64 = 2000;
}

/// Input event constants (from evdev)
pub mod input {
    /// Key press event value
    pub const KEY_PRESS: i32 = 1;

    /// Key repeat event value
    pub const KEY_REPEAT: i32 = 2;
}

/// Input device paths
pub mod paths {
    /// Directory holding evdev character devices
    pub const DEV_INPUT: &str = "/dev/input";
}

/// Permission hints for input device access
pub mod permissions {
    /// Group owning /dev/input/event*
    pub const INPUT_GROUP: &str = "input";

    /// Command that grants access
    pub const ADD_TO_INPUT_GROUP: &str = "sudo usermod -aG input $USER";
}

/// Configuration and session files
pub mod config {
    /// Directory under the user's config dir
    pub const APP_DIR: &str = "pose-timeline";

    /// Config file name
    pub const FILENAME: &str = "config.toml";

    /// Default perturbation record, relative to the working directory
    pub const RECORD_FILENAME: &str = "last.pert";

    /// Log level when neither LOG_LEVEL nor the config sets one
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// Env var overriding the record path
    pub const RECORD_PATH_ENV: &str = "POSE_RECORD_PATH";

    /// Env var overriding the drag iteration cap
    pub const ITERATION_CAP_ENV: &str = "POSE_ITERATION_CAP";
}

/// Validation bounds for config values
pub mod validation {
    /// Smallest accepted iteration cap
    pub const MIN_ITERATIONS: u32 = 1;

    /// Largest accepted iteration cap
    pub const MAX_ITERATIONS: u32 = 10_000;

    /// Smallest accepted history depth (root + one edit)
    pub const MIN_HISTORY_DEPTH: usize = 2;
}
