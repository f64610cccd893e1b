use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pacer::config::EngineConfig;
use pacer::{Engine, Preset};

/// Pacer: rate limit and retry orchestration
#[derive(Parser, Debug)]
#[command(name = "pacer")]
#[command(version)]
#[command(about = "Inspect and exercise rate limiters and retry policies", long_about = None)]
struct Args {
    /// Engine configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every preset definition
    Presets,
    /// Issue admission checks against a limiter
    Check {
        /// Limiter id or preset name
        limiter: String,

        /// Number of checks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Run concurrent no-op executions through a limiter
    Burst {
        /// Limiter id or preset name
        limiter: String,

        /// Number of executions
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        /// Fail refused executions instead of waiting for admission
        #[arg(long)]
        no_wait: bool,
    },
    /// Print stats for every registered limiter
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Commands::Burst { no_wait: true, .. } = args.command {
        config.wait_on_limit = false;
    }

    let engine = Engine::from_config(config).context("invalid engine configuration")?;
    info!(limiters = engine.limiter_ids().len(), "Engine ready");

    match args.command {
        Commands::Presets => print_presets()?,
        Commands::Check { limiter, count } => {
            let id = resolve_limiter(&engine, &limiter)?;
            for _ in 0..count {
                print_json(&engine.check_limit(&id))?;
            }
            print_json(&engine.get_stats(&id))?;
        }
        Commands::Burst { limiter, count, .. } => {
            let id = resolve_limiter(&engine, &limiter)?;
            run_burst(&engine, &id, count).await;
            print_json(&engine.get_stats(&id))?;
            print_json(&engine.get_status())?;
        }
        Commands::Status => {
            print_json(&engine.list_stats())?;
            print_json(&engine.get_status())?;
        }
    }

    engine.close();
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Look a limiter up by id, falling back to creating it from a preset.
fn resolve_limiter(engine: &Engine, name: &str) -> Result<String> {
    if engine.definition(name).is_some() {
        return Ok(name.to_string());
    }

    let preset: Preset = match name.parse() {
        Ok(preset) => preset,
        Err(_) => bail!("no limiter or preset named '{}'", name),
    };
    let id = engine.create_limiter(preset.definition(preset.name()).with_id(name))?;
    info!(limiter_id = %id, preset = %preset, "Created limiter from preset");
    Ok(id)
}

async fn run_burst(engine: &Engine, id: &str, count: u32) {
    let runs = (0..count).map(|_| {
        engine.execute_with_limit(id, || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, anyhow::Error>(())
        })
    });

    let mut refused = 0;
    for result in futures::future::join_all(runs).await {
        if let Err(e) = result {
            refused += 1;
            warn!(limiter_id = %id, error = %e, "Execution failed");
        }
    }
    info!(limiter_id = %id, executed = count - refused, refused = refused, "Burst finished");
}

fn print_presets() -> Result<()> {
    let presets: Vec<_> = Preset::all()
        .iter()
        .map(|preset| {
            json!({
                "name": preset.name(),
                "rate_limit": preset.rate_limit(),
                "retry": preset.retry(),
            })
        })
        .collect();
    print_json(&presets)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
