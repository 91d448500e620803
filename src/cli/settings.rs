use super::config::StarboardConfig;
use starboard::store::{CommunityConfig, SettingsChange};
use starboard::CommunityId;

/// Show a community's settings, applying any given changes first
pub async fn execute(
    community: CommunityId,
    stars: Option<u32>,
    allow_self_stars: Option<bool>,
    delete_origin: Option<bool>,
    config_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let change = SettingsChange {
        community_id: community,
        star_threshold: stars,
        allow_self_star: allow_self_stars,
        delete_origin_after_relay: delete_origin,
    };
    let settings = apply(change, config_path).await?;
    print_settings(&settings);
    Ok(())
}

async fn apply(
    change: SettingsChange,
    config_path: Option<String>,
) -> Result<CommunityConfig, Box<dyn std::error::Error>> {
    let (_, config) = StarboardConfig::load_or_create(config_path)?;
    super::init_logging(&config.logging.level);

    let (database, service) = super::open_service(&config).await?;
    let result = service.update_settings(&change).await;
    database.close().await;
    Ok(result?)
}

fn print_settings(settings: &CommunityConfig) {
    println!("Community {}", settings.community_id);
    println!("  Relay webhook:        {}", settings.relay_target.id);
    println!("  Required stars:       {}", settings.star_threshold);
    println!("  Self stars allowed:   {}", settings.allow_self_star);
    println!("  Delete star prompt:   {}", settings.delete_origin_after_relay);
}
