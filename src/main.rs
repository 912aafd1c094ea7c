//! skirmish - run an automated encounter from a scenario file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use skirmish::scenario::{describe_outcome, run_encounter, Scenario};
use skirmish::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "skirmish", about = "Turn-based d20 combat resolver")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario to fight out
    #[arg(short, long)]
    scenario: PathBuf,

    /// RNG seed; overrides the configured one
    #[arg(long)]
    seed: Option<u64>,

    /// Round cap; overrides the configured one
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for the report
    let (plain, json) = if args.log_json {
        let layer = tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        (Some(layer), None)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skirmish=info".into()),
        )
        .with(plain)
        .with(json)
        .init();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if args.seed.is_some() {
        config.combat.seed = args.seed;
    }
    if let Some(max_rounds) = args.max_rounds {
        config.combat.max_rounds = max_rounds;
    }

    let rules = config.ruleset().context("failed to load combat catalogs")?;
    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;

    let mut rng = match config.combat.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let report = run_encounter(&scenario, &rules, &mut rng, config.combat.max_rounds)?;
    info!(status = %report.status, rounds = report.rounds, "encounter finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut round = 0;
    for outcome in &report.outcomes {
        if outcome.round != round {
            round = outcome.round;
            println!("-- Round {} --", round);
        }
        for line in describe_outcome(&report.session, outcome) {
            println!("  {}", line);
        }
    }
    println!("Result: {} after {} round(s)", report.status, report.rounds);
    if !report.session.loot.is_empty() {
        let gold: u32 = report.session.loot.iter().map(|l| l.gold).sum();
        let experience: u32 = report.session.loot.iter().map(|l| l.experience).sum();
        println!("Loot: {} gold, {} experience", gold, experience);
    }
    Ok(())
}
