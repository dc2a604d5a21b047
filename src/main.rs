//! Tick Arena entry point
//!
//! Runs one match headless and prints the result as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tick_arena::loader::FsLoader;
use tick_arena::{Engine, MatchSettings};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Stage name, relative to the stages directory
    stage: String,
    /// Ship script names, one team each
    #[arg(required = true)]
    ships: Vec<String>,
    #[arg(long, default_value = "stages")]
    stages_dir: PathBuf,
    #[arg(long, default_value = "ships")]
    ships_dir: PathBuf,
    /// JSON match settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    max_ticks: Option<u64>,
    #[arg(long)]
    team_size: Option<usize>,
    /// Only log warnings and errors
    #[arg(long, short)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut settings = match &cli.config {
        Some(path) => {
            MatchSettings::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => MatchSettings::default(),
    };
    if let Some(seed) = cli.seed {
        settings.seed = seed;
    }
    if let Some(max_ticks) = cli.max_ticks {
        settings.max_ticks = max_ticks;
    }
    if let Some(team_size) = cli.team_size {
        settings.team_size = team_size;
    }
    log::info!("Tick Arena starting (seed {})", settings.seed);

    let mut engine = Engine::new(settings, Box::new(FsLoader)).context("starting engine")?;
    engine
        .init_stage(&cli.stages_dir, &cli.stage)
        .with_context(|| format!("stage {}", cli.stage))?;
    engine.init_ships(&cli.ships_dir, &cli.ships).context("loading ships")?;
    let result = engine.run_to_completion().context("running match")?;
    engine.close();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
