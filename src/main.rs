use clap::Parser;
use courtside::cli::{self, Cli, Commands};
use courtside::config::AppConfig;
use courtside::error::{CourtsideError, Result};
use courtside::hub::HubEvent;
use courtside::services::{MaintenanceConfig, MaintenanceService};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod main_runtime;
use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::ValidateConfig => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config)?;
            match config.validate() {
                Ok(()) => {
                    println!(
                        "\x1b[32m✓ configuration valid\x1b[0m ({} sources)",
                        config.sources.len()
                    );
                }
                Err(errors) => {
                    for e in &errors {
                        println!("\x1b[31m✗ {}\x1b[0m", e);
                    }
                    return Err(CourtsideError::Validation(format!(
                        "{} configuration errors",
                        errors.len()
                    )));
                }
            }
        }
        Commands::Models => {
            init_logging_simple();
            let config = cli::load_config(&cli.config)?;
            let predictor = cli::build_predictor(&config);
            cli::print_models(&predictor.get_all_models().await);
        }
        Commands::Predict { input } => {
            let config = cli::load_config(&cli.config)?;
            init_logging(&config.logging);
            let predictor = cli::build_predictor(&config);
            let requests = cli::read_requests(input)?;
            let total = requests.len();
            let decisions = cli::run_predictions(&predictor, requests).await;
            info!("{} of {} requests produced a decision", decisions.len(), total);
        }
        Commands::Retrain { model, feedback } => {
            let config = cli::load_config(&cli.config)?;
            init_logging(&config.logging);
            run_retrain(&config, model.as_deref(), feedback).await?;
        }
        Commands::Sync { watch, interval_ms } => {
            let config = cli::load_config(&cli.config)?;
            init_logging(&config.logging);
            run_sync(&config, *watch || config.hub.real_time, *interval_ms).await?;
        }
    }

    Ok(())
}

async fn run_retrain(
    config: &AppConfig,
    model: Option<&str>,
    feedback: &std::path::Path,
) -> Result<()> {
    let predictor = cli::build_predictor(config);
    let entries = cli::read_feedback(feedback)?;
    info!("replaying {} resolved decisions", entries.len());

    for entry in entries {
        let label = format!("{}/{}", entry.request.entity_id, entry.request.market);
        // cached decisions would collapse repeated entities into one sample
        predictor.clear_cache();
        match predictor.generate_prediction(entry.request).await {
            Ok(decision) => predictor.record_outcome(decision.id, entry.won).await?,
            Err(e) => warn!(request = %label, "skipping feedback entry: {}", e),
        }
    }

    let report = predictor.retrain(model).await?;
    println!(
        "\x1b[32m✓ retrained {} model(s) on {} outcomes\x1b[0m",
        report.updated.len(),
        report.samples
    );
    cli::print_models(&predictor.get_all_models().await);
    Ok(())
}

async fn run_sync(config: &AppConfig, watch: bool, interval_ms: Option<u64>) -> Result<()> {
    let hub = cli::build_hub(config).await?;
    if let Some(ms) = interval_ms {
        hub.set_sync_interval(ms)?;
    }

    if !watch {
        let snapshot = hub.sync_once().await;
        cli::print_snapshot(&snapshot);
        let mut metrics: Vec<_> = hub.get_source_metrics().await.into_values().collect();
        metrics.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        cli::print_source_metrics(&metrics);
        return Ok(());
    }

    let sweeper = MaintenanceService::new(hub.clone(), MaintenanceConfig::from_hub(&config.hub));
    sweeper.start();

    let mut events = hub.events();
    let mut snapshots = hub.subscribe();
    hub.start_real_time_sync();
    info!(
        "Real-time sync running every {}ms (Ctrl+C to stop)",
        hub.sync_interval().as_millis()
    );

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = Arc::clone(&snapshots.borrow_and_update());
                cli::print_snapshot(&snapshot);
            }
            event = events.recv() => {
                match event {
                    Ok(HubEvent::SourceFailed { source_id, error }) => {
                        println!("\x1b[33m! {}: {}\x1b[0m", source_id, error);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event stream lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    hub.stop_real_time_sync();
    sweeper.stop();
    hub.join_sync_loop().await;

    let mut metrics: Vec<_> = hub.get_source_metrics().await.into_values().collect();
    metrics.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    cli::print_source_metrics(&metrics);

    if let Some(last) = hub.recent_errors().await.last() {
        error!(source = %last.source_id, "last source error: {}", last.error);
    }
    Ok(())
}
