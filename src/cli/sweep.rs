use super::config::StarboardConfig;
use starboard::{ExpirySweeper, SweepReport};
use std::sync::Arc;

/// Run one sweep cycle against the configured database
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let report = sweep(config_path).await?;

    println!("Sweep complete");
    println!("  Scanned: {}", report.scanned);
    println!("  Deleted: {}", report.deleted);
    if report.failed > 0 {
        println!("  Failed:  {} (retried on the next sweep)", report.failed);
    }
    Ok(())
}

async fn sweep(config_path: Option<String>) -> Result<SweepReport, Box<dyn std::error::Error>> {
    let (_, config) = StarboardConfig::load_or_create(config_path)?;
    super::init_logging(&config.logging.level);

    let database = config.open_database().await?;
    let sweeper = Arc::new(ExpirySweeper::new(
        database.ledger(),
        config.sweeper_config(),
    ));
    let report = sweeper.sweep_once().await?;
    database.close().await;
    Ok(report)
}
