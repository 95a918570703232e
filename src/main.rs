#![forbid(unsafe_code)]

mod config;
mod constants;
mod controller;
mod hotkeys;
mod ik;
mod kinematics;
mod optimizer;
mod record;
mod session;
mod snapshot;
mod timeline;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{Level as TraceLevel, error, info};
use tracing_subscriber::FmtSubscriber;

use config::Config;
use controller::{Collaborators, InputController, LogVisualizer};
use hotkeys::InputEvent;
use ik::CoordinateDescentIk;
use kinematics::{ForwardKinematics, SerialChain};
use session::PerturbationSession;
use snapshot::ConfigurationSnapshot;

#[derive(Debug, Parser)]
#[command(name = "pose-timeline", about = "Interactive pose editor with undo/redo history", version)]
struct Cli {
    /// Config file (default: <config dir>/pose-timeline/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Perturbation record to load and save
    #[arg(long)]
    record: Option<PathBuf>,

    /// Read commands from this file instead of the keyboard
    #[arg(long)]
    script: Option<PathBuf>,

    /// Don't listen on keyboard devices; read commands from stdin
    #[arg(long)]
    no_hotkeys: bool,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn parse_level(level: &str) -> TraceLevel {
    match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(record) = &cli.record {
        config.session.record_path = record.clone();
    }
    Ok(config)
}

/// Start the input sources; all of them feed `sender`
fn spawn_inputs(cli: &Cli, sender: mpsc::Sender<InputEvent>) -> Result<()> {
    if let Some(path) = &cli.script {
        let file = File::open(path).with_context(|| format!("Failed to open script {}", path.display()))?;
        info!(path = %path.display(), "Reading commands from script");
        hotkeys::spawn_script_reader(BufReader::new(file), sender);
        return Ok(());
    }

    if !cli.no_hotkeys {
        if hotkeys::check_permissions() {
            match hotkeys::spawn_listener(sender.clone()) {
                Ok(handles) => {
                    info!(devices = handles.len(), "Hotkey support enabled");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Failed to start hotkey listener");
                    hotkeys::print_permission_error();
                }
            }
        } else {
            hotkeys::print_permission_error();
        }
    }

    info!("Reading commands from stdin");
    hotkeys::spawn_script_reader(BufReader::new(std::io::stdin()), sender);
    Ok(())
}

fn handle_event(controller: &mut InputController, event: InputEvent, collab: &mut Collaborators<'_>) -> Result<()> {
    match event {
        InputEvent::Key { key, mods } => {
            controller.handle_key(key, mods, collab)?;
        }
        InputEvent::Command(command) => controller.execute(command, collab)?,
        InputEvent::Drag(drag) => {
            let outcome = controller.drag(drag, collab);
            info!(body = drag.body, outcome = ?outcome, "Drag");
        }
        InputEvent::Release => controller.end_drag(),
        InputEvent::Quit => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config warnings go through a bootstrap subscriber until the final level is known
    let bootstrap = FmtSubscriber::builder().with_max_level(TraceLevel::INFO).finish();
    let config = tracing::subscriber::with_default(bootstrap, || load_config(&cli))?;

    if cli.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let log_level = parse_level(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| config.log_level.clone()));
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let coordinate_count = config.solver.coordinate_count;
    let mut engine = SerialChain::reference(config.solver.free_prefix_len, coordinate_count, config.chain.link_length);
    let mut ik = CoordinateDescentIk::new(engine.clone(), config.optimizer());
    let mut view = LogVisualizer;
    info!(
        coordinates = engine.coordinate_count(),
        bodies = engine.body_count(),
        tip = engine.tip(),
        record = %config.session.record_path.display(),
        "Editor ready"
    );

    let mut controller = InputController::new(
        ConfigurationSnapshot::new(vec![0.0; coordinate_count]),
        PerturbationSession::new(config.ik, config.session.load_policy),
        config.optimizer(),
        config.solver.iteration_cap,
        config.session.record_path.clone(),
        config.history_depth(),
    );

    let (input_tx, input_rx) = mpsc::channel();
    spawn_inputs(&cli, input_tx)?;

    let mut collab = Collaborators { ik: &mut ik, engine: &mut engine, view: &mut view };
    for event in input_rx {
        if event == InputEvent::Quit {
            info!("Quit requested");
            break;
        }
        if let Err(e) = handle_event(&mut controller, event, &mut collab) {
            error!(error = ?e, event = ?event, "Failed to handle input event");
        }
    }

    info!(
        history = controller.timeline.len(),
        undo = controller.timeline.undo_depth(),
        redo = controller.timeline.redo_depth(),
        "Shutting down"
    );
    Ok(())
}
