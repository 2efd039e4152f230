//! asyncdomain - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use asyncdomain::demo::{run_demo, Scenario};
use asyncdomain::util::config::{load_config, EngineConfig};
use asyncdomain::util::logger::{self, LogLevel};
use asyncdomain::{NAME, VERSION};

/// Error domains for single-threaded asynchronous code
#[derive(Parser, Debug)]
#[command(name = "asyncdomain")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sample domains
    Demo {
        /// Scenario to run
        #[arg(short, long, value_enum, default_value_t = Scenario::All)]
        scenario: Scenario,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.logging.log_level()?
    };
    logger::init_with_level(level);

    if args.verbose {
        eprintln!("asyncdomain version: {}", VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    match args.command {
        Commands::Demo { scenario } => {
            let transcript = run_demo(scenario, &config).context("Demo failed")?;
            for line in transcript.lines() {
                println!("{}", line);
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
