//! Retainer - exercise the lifetime manager from the command line
//!
//! Usage:
//!   retainer scenario
//!   retainer stress --threads 8 --iterations 100000 --seed 42 --json
//!
//! Configuration is read from `--config`, then `$RETAINER_CONFIG`, then
//! `retainer.toml` in the working directory, falling back to defaults.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retainer::config::LifetimeConfig;
use retainer::core::Registry;
use retainer::simulation::{self, StressOptions};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "retainer", about = "Reference counting with deferred-release pools", version)]
struct Cli {
    /// Path to a TOML lifetime configuration.
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an object, defer its release, and sweep the pool.
    Scenario,

    /// Randomized retain/release traffic from several threads.
    Stress {
        /// Worker threads.
        #[arg(long, short = 't', default_value_t = 4, value_name = "N")]
        threads: usize,

        /// Operations per worker.
        #[arg(long, short = 'n', default_value_t = 10_000, value_name = "N")]
        iterations: usize,

        /// Shared objects.
        #[arg(long, default_value_t = 8, value_name = "N")]
        objects: usize,

        /// Base seed for the workers' generators.
        #[arg(long, default_value_t = 0, value_name = "SEED")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    info!(target: "retainer", policy = %config.misuse_policy, "configuration loaded");
    let registry = Registry::new(config);

    match cli.command {
        Command::Scenario => {
            let report = simulation::run_scenario(&registry).context("scenario failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("count after create:  {}", report.count_after_create);
                println!("count after defer:   {}", report.count_after_defer);
                println!("usable after defer:  {}", report.usable_after_defer);
                println!("hook invocations:    {}", report.hook_invocations);
                println!("count after sweep:   {}", report.count_after_sweep);
            }
        }
        Command::Stress {
            threads,
            iterations,
            objects,
            seed,
        } => {
            let options = StressOptions {
                threads,
                iterations,
                objects,
                seed,
            };
            let report = match simulation::run_stress(&registry, options) {
                Ok(report) => report,
                Err(err) => {
                    error!(target: "retainer", error = %err, "stress run failed");
                    return Err(err).context("stress run failed");
                }
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("threads:       {}", options.threads);
                println!("iterations:    {}", options.iterations);
                println!("retains:       {}", report.retains);
                println!("releases:      {}", report.releases);
                println!("deferred:      {}", report.deferred);
                println!("pools pushed:  {}", report.pools_pushed);
                println!("created:       {}", report.stats.created);
                println!("finalized:     {}", report.stats.finalized);
                println!("live:          {}", report.stats.live);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<LifetimeConfig> {
    match path {
        Some(path) => LifetimeConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => LifetimeConfig::load_default().context("failed to load default configuration"),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,retainer=info"));
    let _ = fmt().with_env_filter(env_filter).try_init();
}
