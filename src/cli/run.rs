use super::config::StarboardConfig;
use starboard::ExpirySweeper;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Run the expiry sweeper until Ctrl-C
///
/// Configuration is loaded from `--config` or the default path; a commented
/// default file is generated if it does not exist. The database is created
/// and migrated on first start.
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    run_until(config_path, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
    .await
}

/// Run until `shutdown` resolves, then stop the sweeper between cycles
pub async fn run_until<F>(
    config_path: Option<String>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let (config_path, config) = StarboardConfig::load_or_create(config_path)?;
    super::init_logging(&config.logging.level);

    info!(
        config = %config_path.display(),
        database = %config.database.path.display(),
        "Starting starboard"
    );

    let database = config.open_database().await?;
    let sweeper = Arc::new(ExpirySweeper::new(
        database.ledger(),
        config.sweeper_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = sweeper.spawn(shutdown_rx);

    shutdown.await;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    handle.await?;
    database.close().await;

    info!("Starboard stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::test_support::write_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir);

        let result = run_until(Some(config_path), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        })
        .await;

        assert!(result.is_ok());
        assert!(temp_dir.path().join("starboard.db").exists());
    }

    #[tokio::test]
    async fn test_run_creates_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let result = run_until(Some(config_path.to_string_lossy().to_string()), async {}).await;

        assert!(result.is_ok());
        assert!(config_path.exists());
        assert!(temp_dir.path().join("starboard.db").exists());
    }

    #[tokio::test]
    async fn test_run_with_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "not valid toml [[[").unwrap();

        let result = run_until(Some(config_path.to_string_lossy().to_string()), async {}).await;
        assert!(result.is_err());
    }
}
