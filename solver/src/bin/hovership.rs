//! Compute the viability kernel of a 1-D hovering ship and save it as an
//! artifact.
//!
//! The ship's height changes with `thrust - gravity(height)`, where gravity
//! weakens with altitude. It fails on touching the floor or the ceiling.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use viability::constants::DEFAULT_ARTIFACT_DIR;
use viability::env_config;
use viability::grid::linspace;
use viability::{
    back_map, compute_transition_map, compute_viable_set, par_compute_transition_map,
    project_mean, save_artifact, Grid, Grids, MapOptions, OracleError, StepOutcome,
    TransitionModel, ViabilityArtifact, ViabilityProblem, WorkerPool,
};

const SUBSTEPS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HoverParams {
    base_gravity: f64,
    gravity: f64,
    thrust: f64,
    max_thrust: f64,
    ceiling: f64,
    control_frequency: f64,
}

impl Default for HoverParams {
    fn default() -> Self {
        Self {
            base_gravity: 0.1,
            gravity: 1.0,
            thrust: 0.0,
            max_thrust: 0.8,
            ceiling: 2.0,
            control_frequency: 1.0,
        }
    }
}

struct Hovership;

impl TransitionModel for Hovership {
    type Params = HoverParams;

    fn encode(&self, state_action: &[f64], defaults: &HoverParams) -> (Vec<f64>, HoverParams) {
        let mut p = defaults.clone();
        p.thrust = state_action[1];
        (vec![state_action[0]], p)
    }

    fn step(&self, state: &[f64], p: &HoverParams) -> Result<StepOutcome, OracleError> {
        if p.control_frequency <= 0.0 {
            return Err(OracleError(format!(
                "control frequency must be positive, got {}",
                p.control_frequency
            )));
        }
        let dt = 1.0 / (p.control_frequency * SUBSTEPS as f64);
        let mut x = state[0];
        for _ in 0..SUBSTEPS {
            let gravity = p.base_gravity + p.gravity / (1.0 + x.exp());
            x += (p.thrust - gravity) * dt;
            if x < 0.0 || x > p.ceiling {
                return Ok(StepOutcome::failed(vec![x]));
            }
        }
        Ok(StepOutcome::ok(vec![x]))
    }

    fn decode(&self, state: &[f64], _: &HoverParams) -> Vec<f64> {
        state.to_vec()
    }
}

struct Args {
    output: PathBuf,
    threads: Option<usize>,
    sequential: bool,
    state_points: usize,
    action_points: usize,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        output: PathBuf::from(DEFAULT_ARTIFACT_DIR).join("hover_map.json"),
        threads: None,
        sequential: false,
        state_points: 201,
        action_points: 161,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--output" => {
                i += 1;
                if i < args.len() {
                    parsed.output = PathBuf::from(&args[i]);
                }
            }
            "--threads" => {
                i += 1;
                if i < args.len() {
                    parsed.threads = Some(parse_count("--threads", &args[i]));
                }
            }
            "--states" => {
                i += 1;
                if i < args.len() {
                    parsed.state_points = parse_count("--states", &args[i]);
                }
            }
            "--actions" => {
                i += 1;
                if i < args.len() {
                    parsed.action_points = parse_count("--actions", &args[i]);
                }
            }
            "--sequential" => {
                parsed.sequential = true;
            }
            "--help" | "-h" => {
                println!("Usage: hovership [--output PATH] [--threads N] [--states N] [--actions N] [--sequential]");
                println!();
                println!("Options:");
                println!("  --output PATH  Artifact path (default: {DEFAULT_ARTIFACT_DIR}/hover_map.json)");
                println!("  --threads N    Worker threads (default: VIBLY_NUM_THREADS or 8)");
                println!("  --states N     Height grid points (default: 201)");
                println!("  --actions N    Thrust grid points (default: 161)");
                println!("  --sequential   Build the transition map on the main thread");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }
    parsed
}

fn parse_count(flag: &str, raw: &str) -> usize {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            eprintln!("Invalid {} value: {}", flag, raw);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> viability::Result<()> {
    let defaults = HoverParams::default();
    let grids = Grids::new(
        Grid::new(vec![linspace(0.0, defaults.ceiling, args.state_points)])?,
        Grid::new(vec![linspace(0.0, defaults.max_thrust, args.action_points)])?,
    );
    let problem = ViabilityProblem::new(Hovership, defaults, vec![0.5], grids)?;
    let options = MapOptions::default().with_check_grid(true);

    let start = Instant::now();
    let table = if args.sequential {
        compute_transition_map(&problem, options)?
    } else {
        let pool = match args.threads {
            Some(n) => WorkerPool::new(n)?,
            None => WorkerPool::from_env()?,
        };
        println!("Using {} threads", pool.num_threads());
        par_compute_transition_map(&problem, options, &pool)?
    };

    let states = &problem.grids().states;
    let n_action_dims = problem.grids().actions.ndim();
    let viable = compute_viable_set(&table, states, None)?;
    let s_m = project_mean(&viable.q_v, n_action_dims)?;
    let q_m = back_map(&table, &s_m, states, &viable.q_v)?;

    println!(
        "Kernel: {}/{} states viable, {} viable pairs after {} iterations ({:.2}s)",
        viable.num_viable_states(),
        states.num_points(),
        viable.num_viable_pairs(),
        viable.iterations,
        start.elapsed().as_secs_f64()
    );

    let artifact = ViabilityArtifact::new(
        problem.grids().clone(),
        &table,
        &viable,
        s_m,
        q_m,
        problem.defaults().clone(),
        problem.initial_state().to_vec(),
    );
    save_artifact(&artifact, &args.output)?;
    println!("Saved {}", args.output.display());
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    env_config::init_base_path();
    let args = parse_args();

    println!("Hovership viability kernel");
    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
