//! Tenor CLI - configuration checks, scenario replay and simulation
//!
//! Runs the lending engine in memory: validate a market configuration,
//! replay a scripted JSON scenario against it, or drive it with a random
//! collateral price path and a liquidator agent.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod report;
mod scenario;
mod simulate;

use simulate::PriceProcess;

#[derive(Parser)]
#[command(name = "tenor")]
#[command(about = "Tenor - fixed-maturity lending ledger tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Market configuration (TOML); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// List the maturities open for deposits and borrows
    Pools {
        /// Unix timestamp to list from (defaults to now)
        #[arg(long)]
        at: Option<u64>,
    },

    /// Replay a JSON scenario script
    Scenario {
        /// Scenario file
        path: PathBuf,

        /// Print the final market state as JSON
        #[arg(long)]
        dump: bool,
    },

    /// Drive a market with a mean-reverting collateral price path
    Simulate {
        /// Number of price steps
        #[arg(long, default_value = "2500")]
        steps: usize,

        /// Seconds between steps
        #[arg(long, default_value = "3600")]
        step_seconds: u64,

        /// RNG seed
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Number of borrowing accounts
        #[arg(long, default_value = "8")]
        borrowers: usize,

        /// Initial collateral price
        #[arg(long, default_value = "1.0")]
        initial_price: f64,

        /// Long-run mean of the price
        #[arg(long, default_value = "1.0")]
        mean: f64,

        /// Volatility
        #[arg(long, default_value = "0.01")]
        std_dev: f64,

        /// Mean-reversion speed
        #[arg(long, default_value = "3.0")]
        theta: f64,

        /// Length of the path in process time units
        #[arg(long, default_value = "100.0")]
        horizon: f64,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate a configuration file
    Check {
        /// Configuration file
        path: PathBuf,
    },

    /// Print the default configuration as TOML
    Show,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Check { path } => config::check_config(&path)?,
            ConfigCommands::Show => config::show_default()?,
        },
        Commands::Pools { at } => {
            let market_config = config::load_config(cli.config.as_deref())?;
            report::print_open_pools(&market_config.params()?, at)?;
        }
        Commands::Scenario { path, dump } => {
            let market_config = config::load_config(cli.config.as_deref())?;
            scenario::run_scenario(&market_config, &path, dump, cli.verbose)?;
        }
        Commands::Simulate {
            steps,
            step_seconds,
            seed,
            borrowers,
            initial_price,
            mean,
            std_dev,
            theta,
            horizon,
        } => {
            let market_config = config::load_config(cli.config.as_deref())?;
            let process = PriceProcess {
                initial_price,
                mean,
                std_dev,
                theta,
                horizon,
                steps,
            };
            simulate::run_simulation(&market_config, process, step_seconds, seed, borrowers, cli.verbose)?;
        }
    }

    Ok(())
}
