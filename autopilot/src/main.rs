//! `autopilot` command-line driver.
//!
//! Loads the engine configuration and workflow, wires the file-backed tracker,
//! the command-line LLM client and the process runner into an
//! [`Engine`], and runs one of the scheduling entry points.

use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use autopilot::engine::Engine;
use autopilot::exit_codes;
use autopilot::io::config::load_config;
use autopilot::io::llm::CommandLlm;
use autopilot::io::process::ProcessRunner;
use autopilot::io::tracker::LocalTracker;
use autopilot::io::workflow_store::load_workflow;
use autopilot::logging;
use autopilot::looping::{
    CycleOutcome, LoopOptions, propagate_triggers_once, run_loop, run_once, setup,
};

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Continuous-delivery scheduler for AI coding agents"
)]
struct Cli {
    /// Engine configuration file.
    #[arg(long, global = true, default_value = ".autopilot/config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration and workflow.
    Validate,
    /// Provision tracker statuses and check project checkouts.
    Setup,
    /// Run a single scheduling cycle (exit code 2 when idle).
    RunOnce,
    /// Propagate triggers and run cycles with idle backoff.
    Loop {
        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Apply triggers for the newest status change once.
    PropagateTriggers,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let workflow = load_workflow(&config.workflow)?;

    if matches!(cli.command, Command::Validate) {
        println!(
            "ok: {} states, {} issue types, {} projects",
            workflow.states.len(),
            workflow.issue_types.len(),
            config.projects.len()
        );
        return Ok(exit_codes::OK);
    }

    let tracker = LocalTracker::open(&config.tracker)?;
    let runner = ProcessRunner::new(config.engine.output_limit_bytes);
    let workdir = std::env::current_dir().context("read current directory")?;
    let llm = CommandLlm::new(runner.clone(), &config.llm, workdir);
    let engine = Engine::new(config, workflow, &tracker, &llm, &runner);

    match cli.command {
        Command::Validate => Ok(exit_codes::OK),
        Command::Setup => {
            setup(&engine)?;
            println!("setup complete");
            Ok(exit_codes::OK)
        }
        Command::RunOnce => match run_once(&engine)? {
            CycleOutcome::Idle => {
                println!("idle");
                Ok(exit_codes::IDLE)
            }
            CycleOutcome::Waiting { ticket } => {
                println!("waiting: #{ticket}");
                Ok(exit_codes::OK)
            }
            CycleOutcome::Worked { ticket, success } => {
                let outcome = if success { "success" } else { "fail" };
                println!("worked: #{ticket} ({outcome})");
                Ok(exit_codes::OK)
            }
        },
        Command::Loop { max_cycles } => {
            let summary = run_loop(&engine, &LoopOptions { max_cycles }, thread::sleep)?;
            println!(
                "cycles: {}, worked: {}, errors: {}",
                summary.cycles, summary.worked, summary.errors
            );
            Ok(exit_codes::OK)
        }
        Command::PropagateTriggers => {
            let moved = propagate_triggers_once(&engine)?;
            println!("moved: {moved}");
            Ok(exit_codes::OK)
        }
    }
}
