use super::config::StarboardConfig;
use starboard::store::{AuthorizeOutcome, RelayTarget};
use starboard::CommunityId;

/// Register a community's relay webhook, or replace the current one
///
/// Re-authorizing keeps the community's settings; only the webhook changes.
pub async fn execute(
    community: CommunityId,
    relay_id: String,
    relay_secret: String,
    config_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = StarboardConfig::load_or_create(config_path)?;
    super::init_logging(&config.logging.level);

    let (database, service) = super::open_service(&config).await?;
    let outcome = service
        .authorize(community, RelayTarget::new(relay_id, relay_secret))
        .await;
    database.close().await;

    match outcome? {
        AuthorizeOutcome::Created => {
            println!("Community {} authorized with default settings", community);
        }
        AuthorizeOutcome::Updated => {
            println!("Community {} relay webhook replaced", community);
            println!("The previous webhook is no longer used and can be deleted");
        }
    }
    Ok(())
}
