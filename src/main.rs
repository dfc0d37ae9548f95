use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use material3d::io::write_result;
use material3d::job::{JobConfig, JobOutcome};

/// Effective thermal conductivity of voxelized materials.
#[derive(Parser, Debug)]
#[command(name = "material3d", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML job file
    #[arg(short, long)]
    config: PathBuf,
    /// Write a JSON result summary here
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Exit with an error if any linear solve did not converge
    #[arg(long)]
    strict: bool,
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the result is acceptable under `--strict`.
fn run(cli: &Cli) -> Result<bool> {
    let job = JobConfig::load(&cli.config)?;
    let base_dir = cli.config.parent().unwrap_or(Path::new("."));
    let outcome = job.run(base_dir)?;

    match &outcome {
        JobOutcome::Single(run) => {
            let [kx, ky, kz] = run.k_eff;
            let direction = run.direction.map_or("-".to_string(), |d| d.to_string());
            println!("Effective conductivity column (direction {direction}):");
            println!("[ {kx:.6} {ky:.6} {kz:.6} ]");
        }
        JobOutcome::Tensor(tensor) => println!("{tensor}"),
    }
    if !outcome.converged() {
        eprintln!("warning: at least one linear solve did not reach the tolerance");
    }

    if let Some(path) = &cli.output {
        write_result(path, &outcome.to_result_file())
            .with_context(|| format!("Failed to write result: {}", path.display()))?;
    }
    Ok(outcome.converged() || !cli.strict)
}
