//! Energy market CLI binary
//!
//! This is the main entry point for the energy market. It provides commands
//! for initializing and validating configuration, and for replaying a script
//! of market transactions through the engine.

use anyhow::{Context, Result};
use auction::{
    ChannelEmitter, InMemoryRegistry, MarketEngine, MarketEvent, MarketSettings, Receipt,
    Registry, Transaction,
};
use cli::{Cli, Commands};
use common::GameId;
use config::{
    generate_default_config, load_config, save_config, validate_config, LoggingConfig,
    MasterConfig,
};
use observability::{init_logging_with_level, init_metrics, LogFormat};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Placeholder a script uses for the most recently published game
const CURRENT_GAME: &str = "@current";

/// A transaction script
#[derive(Debug, Deserialize)]
struct Script {
    steps: Vec<Transaction>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Logging follows the config file when the command has one
    let logging = match &cli.command {
        Commands::Simulate { config, .. } | Commands::Validate { config } => load_config(config)
            .map(|c| c.logging)
            .unwrap_or_default(),
        Commands::Init { .. } => LoggingConfig::default(),
    };
    let format = cli
        .log_format
        .map(|f| f.as_str().to_string())
        .unwrap_or(logging.format);
    init_logging_with_level(
        "emarket",
        LogFormat::parse(&format).unwrap_or_default(),
        &logging.level,
    )?;

    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        Commands::Simulate {
            config,
            script,
            events,
        } => {
            info!("Executing 'simulate' command");
            simulate_command(config, script, events).await
        }
        Commands::Validate { config } => {
            info!("Executing 'validate' command");
            validate_command(config).await
        }
        Commands::Init { output } => {
            info!("Executing 'init' command");
            init_command(output).await
        }
    }
}

/// Load and validate a config, failing on validation errors
fn load_valid_config<P: AsRef<Path>>(config_path: P) -> Result<MasterConfig> {
    let config = load_config(config_path)?;
    let report = validate_config(&config);

    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot run market due to configuration errors");
    }

    Ok(config)
}

async fn simulate_command<P: AsRef<Path>>(
    config_path: P,
    script_path: P,
    print_events: bool,
) -> Result<()> {
    let config = load_valid_config(&config_path)?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let settings = MarketSettings::from_config(&config.market)
        .context("Invalid market settings")?;

    let script_path = script_path.as_ref();
    let content = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script: {:?}", script_path))?;
    let script: Script = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse script: {:?}", script_path))?;
    info!(steps = script.steps.len(), market = %config.market.name, "Script loaded");

    let registry = Arc::new(InMemoryRegistry::new());
    let (emitter, mut events) = ChannelEmitter::new();
    let engine = MarketEngine::new(registry.clone(), Arc::new(emitter), settings);

    println!("\n=== {} ===\n", config.market.name);

    let mut current_game: Option<GameId> = None;
    let mut rejected = 0usize;

    for (step, mut tx) in script.steps.into_iter().enumerate() {
        let step = step + 1;

        if let Some(game) = tx.game_mut() {
            if game.as_str() == CURRENT_GAME {
                let current = current_game
                    .clone()
                    .with_context(|| format!("Step {} refers to {} before any game", step, CURRENT_GAME))?;
                *game = current;
            }
        }

        let kind = tx.kind();
        match engine.submit(tx).await {
            Ok(receipt) => {
                if let Receipt::GamePublished { game } = &receipt {
                    current_game = Some(game.clone());
                }
                println!("[{:>3}] {:<24} ok       {}", step, kind, serde_json::to_string(&receipt)?);
            }
            Err(err) if err.is_fatal() => {
                println!("[{:>3}] {:<24} FAILED   {}", step, kind, err);
                return Err(err).with_context(|| format!("Step {} broke a market invariant", step));
            }
            Err(err) => {
                rejected += 1;
                println!("[{:>3}] {:<24} rejected {}", step, kind, err);
            }
        }

        if print_events {
            print_pending_events(&mut events)?;
        }
    }

    print_balances(registry.as_ref()).await?;
    println!("\n{} step(s) rejected", rejected);

    Ok(())
}

fn print_pending_events(events: &mut UnboundedReceiver<MarketEvent>) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        println!("      event {}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn print_balances(registry: &dyn Registry) -> Result<()> {
    let prosumers = registry
        .list_prosumers()
        .await
        .context("Failed to list prosumers")?;

    println!("\n=== Final Balances ===\n");
    println!(
        "{:<16} {:>14} {:>14} {:>12} {:>12} {:>10}",
        "prosumer", "balance", "frozen", "produced", "consumed", "metric"
    );
    for p in prosumers {
        println!(
            "{:<16} {:>14.4} {:>14.4} {:>12.3} {:>12.3} {:>10.4}",
            p.id, p.account_balance, p.frozen_funds, p.total_production, p.total_consumption,
            p.contribution_metric
        );
    }
    Ok(())
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    // Print summary
    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Market: {}", config.market.name);
    println!(
        "Grid prices: buy {} / sell {}",
        config.market.grid_buy_price, config.market.grid_sell_price
    );
    println!(
        "Transmission cost per hop: {}",
        config.market.transmission_cost_per_hop
    );
    println!(
        "Registration window: {} ms",
        config.market.registration_duration_ms
    );

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Adjust prices and the registration window");
    println!("  2. Run: emarket validate --config {:?}", output_path);
    println!(
        "  3. Run: emarket simulate --config {:?} --script <script.yaml>",
        output_path
    );

    Ok(())
}
