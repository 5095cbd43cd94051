//! Data Switch Simulator
//!
//! Replays a TOML scenario of phone state changes against the decision
//! engine on a simulated clock and prints every directive it issues.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dataswitch::sim::{Scenario, ScenarioRunner};
use dataswitch::SwitchConfig;
use tracing_subscriber::EnvFilter;

/// Replay an auto data switch scenario.
#[derive(Parser, Debug)]
#[command(name = "dataswitch-sim", about = "Auto data switch scenario simulator")]
struct Cli {
    /// Scenario file (TOML).
    scenario: PathBuf,

    /// Carrier config file overriding the scenario's `[config]` table.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the engine dump (JSON) after the run.
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    dataswitch::init();

    let text = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading {}", cli.scenario.display()))?;
    let scenario = Scenario::from_toml_str(&text)
        .with_context(|| format!("parsing {}", cli.scenario.display()))?;

    let mut runner = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = SwitchConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            ScenarioRunner::with_config(scenario, config)
        }
        None => ScenarioRunner::new(scenario)?,
    };

    tracing::info!(scenario = %cli.scenario.display(), "running scenario");
    for directive in runner.run() {
        println!("{}", serde_json::to_string(directive)?);
    }

    if cli.dump {
        println!("{}", runner.engine().dump_json()?);
    }
    Ok(())
}
