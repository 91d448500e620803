use super::config::StarboardConfig;
use starboard::store::{CommunityStore, Ledger, LedgerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    communities: u64,
    ledger: LedgerStats,
}

/// Show how many communities and tracked messages the database holds
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, config) = StarboardConfig::load_or_create(config_path)?;
    let status = collect(&config).await?;

    println!("Starboard Status");
    println!();
    println!("  Config:   {}", config_path.display());
    println!("  Database: {}", config.database.path.display());
    println!();
    println!("  Communities:      {}", status.communities);
    println!("  Tracked messages: {}", status.ledger.tracked);
    println!("  Relayed messages: {}", status.ledger.sent);
    println!("  Stars recorded:   {}", status.ledger.total_stars);
    println!(
        "  Retention:        {} (swept every {})",
        humantime::format_duration(config.retention()),
        humantime::format_duration(config.sweeper_config().interval)
    );
    Ok(())
}

async fn collect(config: &StarboardConfig) -> Result<Status, Box<dyn std::error::Error>> {
    let database = config.open_database().await?;
    let communities = database.communities().count().await?;
    let ledger = database.ledger().stats().await?;
    database.close().await;
    Ok(Status {
        communities,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::test_support::write_config;
    use starboard::store::{RelayTarget, StarredMessage};
    use starboard::{CommunityId, MessageId, UserId};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_counts() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = write_config(&temp_dir);
        let (_, config) = StarboardConfig::load_or_create(Some(config_path.clone())).unwrap();

        let database = config.open_database().await.unwrap();
        database
            .communities()
            .authorize(CommunityId(1), RelayTarget::new("1", "s"))
            .await
            .unwrap();
        let ledger = database.ledger();
        let mut entry = StarredMessage::new(MessageId(5), UserId(1));
        entry.star_users.insert(UserId(2));
        ledger.insert(entry).await.unwrap();
        ledger.mark_sent(MessageId(5)).await.unwrap();
        ledger
            .insert(StarredMessage::new(MessageId(6), UserId(1)))
            .await
            .unwrap();
        database.close().await;

        let status = collect(&config).await.unwrap();
        assert_eq!(status.communities, 1);
        assert_eq!(
            status.ledger,
            LedgerStats {
                tracked: 2,
                sent: 1,
                total_stars: 3
            }
        );

        assert!(execute(Some(config_path)).await.is_ok());
    }
}
