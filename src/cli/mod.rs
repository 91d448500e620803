use clap::{Parser, Subcommand};
use starboard::relay::WebhookRelay;
use starboard::store::{Database, SqliteCommunityStore, SqliteLedger};
use starboard::{CommunityId, StarboardService};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub mod authorize;
pub mod config;
pub mod run;
pub mod settings;
pub mod status;
pub mod sweep;
pub mod version;

use config::StarboardConfig;

#[derive(Parser)]
#[command(name = "starboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the starboard relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the expiry sweeper until interrupted
    Run {
        /// Path to config file (default: ~/.local/share/starboard/config.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Run a single sweep cycle and print what was purged
    Sweep {
        #[arg(long)]
        config: Option<String>,
    },

    /// Register or replace a community's relay webhook
    Authorize {
        #[arg(long)]
        community: CommunityId,

        /// Webhook id
        #[arg(long)]
        relay_id: String,

        /// Webhook token
        #[arg(long)]
        relay_secret: String,

        #[arg(long)]
        config: Option<String>,
    },

    /// Show or change a community's starboard settings
    Settings {
        #[arg(long)]
        community: CommunityId,

        /// Stars required before a message is relayed (at least 2)
        #[arg(long)]
        stars: Option<u32>,

        /// Whether authors may star their own messages
        #[arg(long)]
        allow_self_stars: Option<bool>,

        /// Whether to delete the star prompt once the message is relayed
        #[arg(long)]
        delete_origin: Option<bool>,

        #[arg(long)]
        config: Option<String>,
    },

    /// Show ledger and community counts
    Status {
        #[arg(long)]
        config: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config } => run::execute(config).await,
        Commands::Sweep { config } => sweep::execute(config).await,
        Commands::Authorize {
            community,
            relay_id,
            relay_secret,
            config,
        } => authorize::execute(community, relay_id, relay_secret, config).await,
        Commands::Settings {
            community,
            stars,
            allow_self_stars,
            delete_origin,
            config,
        } => settings::execute(community, stars, allow_self_stars, delete_origin, config).await,
        Commands::Status { config } => status::execute(config).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub type OperatorService = StarboardService<SqliteCommunityStore, SqliteLedger, WebhookRelay>;

/// Open the database and wire a service on top of it
pub async fn open_service(
    config: &StarboardConfig,
) -> Result<(Database, OperatorService), Box<dyn std::error::Error>> {
    let database = config.open_database().await?;
    let relay = WebhookRelay::new(
        config.relay.base_url.clone(),
        Duration::from_secs(config.relay.timeout_secs),
    )?;
    let service = StarboardService::new(
        database.communities(),
        database.ledger(),
        Arc::new(relay),
        config.service_config(),
    );
    Ok((database, service))
}
