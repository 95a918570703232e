use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::constants::{self, chain, solver};
use crate::ik::SolverParams;
use crate::optimizer::{CoordinateLayout, PoseOptimizer, StepGains};
use crate::session::LoadPolicy;

/// Settings persisted to config.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// trace, debug, info, warn or error (LOG_LEVEL env var wins)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub solver: SolverSettings,

    /// Parameter block for loaded perturbations and the first refine
    #[serde(default)]
    pub ik: SolverParams,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub chain: ChainSettings,
}

/// Greedy pose solver used while dragging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_iteration_cap")]
    pub iteration_cap: u32,

    #[serde(default = "default_step_gain")]
    pub step_gain: f64,

    #[serde(default = "default_step_floor")]
    pub step_floor: f64,

    /// Leading coordinates the solver never touches
    #[serde(default = "default_free_prefix_len")]
    pub free_prefix_len: usize,

    #[serde(default = "default_coordinate_count")]
    pub coordinate_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Snapshots kept in the timeline (0 = unlimited)
    #[serde(default)]
    pub max_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_record_path")]
    pub record_path: PathBuf,

    #[serde(default)]
    pub load_policy: LoadPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    #[serde(default = "default_link_length")]
    pub link_length: f64,
}

fn default_log_level() -> String {
    constants::config::DEFAULT_LOG_LEVEL.to_string()
}

fn default_iteration_cap() -> u32 {
    solver::ITERATION_CAP
}

fn default_step_gain() -> f64 {
    solver::STEP_GAIN
}

fn default_step_floor() -> f64 {
    solver::STEP_FLOOR
}

fn default_free_prefix_len() -> usize {
    solver::FREE_PREFIX_LEN
}

fn default_coordinate_count() -> usize {
    constants::qpos::SIZE
}

fn default_record_path() -> PathBuf {
    PathBuf::from(constants::config::RECORD_FILENAME)
}

fn default_link_length() -> f64 {
    chain::DEFAULT_LINK_LENGTH
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            iteration_cap: default_iteration_cap(),
            step_gain: default_step_gain(),
            step_floor: default_step_floor(),
            free_prefix_len: default_free_prefix_len(),
            coordinate_count: default_coordinate_count(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { record_path: default_record_path(), load_policy: LoadPolicy::default() }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self { link_length: default_link_length() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            solver: SolverSettings::default(),
            ik: SolverParams::default(),
            history: HistorySettings::default(),
            session: SessionSettings::default(),
            chain: ChainSettings::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(constants::config::APP_DIR);
        path.push(constants::config::FILENAME);
        path
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load `path`, or write a default config there if it doesn't exist yet.
    /// A file that fails to parse is left alone and reported as an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let config = Self::default();
            match config.save_to(path) {
                Ok(()) => info!(path = %path.display(), "Generated config file for user to edit (env vars still override)"),
                Err(e) => error!(error = ?e, "Failed to save default config"),
            }
            config
        };

        config.apply_env_overrides();
        config.validate_and_clamp();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(path, contents).with_context(|| format!("Failed to write config file to {}", path.display()))?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    /// Apply overrides looked up through `var`
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(constants::config::RECORD_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.session.record_path = PathBuf::from(path.trim());
        }
        if let Some(raw) = var(constants::config::ITERATION_CAP_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(cap) => self.solver.iteration_cap = cap,
                Err(e) => error!(var = constants::config::ITERATION_CAP_ENV, value = %raw, error = %e, "failed to parse env var"),
            }
        }
    }

    /// Validate and clamp config values to safe ranges
    /// Called after loading TOML and applying env overrides
    fn validate_and_clamp(&mut self) {
        use crate::constants::validation::*;

        if !matches!(self.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            warn!(log_level = %self.log_level, using = constants::config::DEFAULT_LOG_LEVEL, "Unknown log_level, using default");
            self.log_level = default_log_level();
        }

        let cap = self.solver.iteration_cap.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
        if cap != self.solver.iteration_cap {
            warn!(iteration_cap = self.solver.iteration_cap, clamped = cap, "iteration_cap out of range, clamping");
            self.solver.iteration_cap = cap;
        }

        let max_iterations = self.ik.max_iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
        if max_iterations != self.ik.max_iterations {
            warn!(max_iterations = self.ik.max_iterations, clamped = max_iterations, "ik.max_iterations out of range, clamping");
            self.ik.max_iterations = max_iterations;
        }

        if !(self.solver.step_gain.is_finite() && self.solver.step_gain > 0.0) {
            warn!(step_gain = self.solver.step_gain, using = solver::STEP_GAIN, "step_gain must be positive, using default");
            self.solver.step_gain = solver::STEP_GAIN;
        }

        if !(self.solver.step_floor.is_finite() && self.solver.step_floor >= 0.0) {
            warn!(step_floor = self.solver.step_floor, using = solver::STEP_FLOOR, "step_floor must not be negative, using default");
            self.solver.step_floor = solver::STEP_FLOOR;
        }

        if self.solver.coordinate_count == 0 {
            warn!(using = constants::qpos::SIZE, "coordinate_count is zero, using default");
            self.solver.coordinate_count = constants::qpos::SIZE;
        }

        if self.solver.free_prefix_len > self.solver.coordinate_count {
            warn!(
                free_prefix_len = self.solver.free_prefix_len,
                max = self.solver.coordinate_count,
                "free_prefix_len exceeds coordinate_count, clamping"
            );
            self.solver.free_prefix_len = self.solver.coordinate_count;
        }

        if self.history.max_depth != 0 && self.history.max_depth < MIN_HISTORY_DEPTH {
            warn!(max_depth = self.history.max_depth, min = MIN_HISTORY_DEPTH, "history max_depth below minimum, clamping");
            self.history.max_depth = MIN_HISTORY_DEPTH;
        }

        if !(self.ik.accuracy_cutoff.is_finite() && self.ik.accuracy_cutoff > 0.0) {
            warn!(
                accuracy_cutoff = self.ik.accuracy_cutoff,
                using = constants::ik::DEFAULT_ACCURACY_CUTOFF,
                "accuracy_cutoff must be positive, using default"
            );
            self.ik.accuracy_cutoff = constants::ik::DEFAULT_ACCURACY_CUTOFF;
        }

        if !(self.chain.link_length.is_finite() && self.chain.link_length > 0.0) {
            warn!(link_length = self.chain.link_length, using = chain::DEFAULT_LINK_LENGTH, "link_length must be positive, using default");
            self.chain.link_length = chain::DEFAULT_LINK_LENGTH;
        }
    }

    pub fn optimizer(&self) -> PoseOptimizer {
        PoseOptimizer::new(
            CoordinateLayout::new(self.solver.free_prefix_len, self.solver.coordinate_count),
            StepGains { gain: self.solver.step_gain, floor: self.solver.step_floor },
        )
    }

    /// Timeline depth bound, if any
    pub fn history_depth(&self) -> Option<usize> {
        (self.history.max_depth > 0).then_some(self.history.max_depth)
    }
}
