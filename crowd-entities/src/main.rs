//! crowd-entities - Entity Affiliation & Merge Service
//!
//! Resolves which organization a member represented when an activity happened and
//! runs resumable, reversible merges of duplicate members and organizations.

use anyhow::Result;
use clap::Parser;
use crowd_common::config::ServiceConfig;
use crowd_common::events::EventBus;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowd_entities::AppState;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "crowd-entities", version, about = "Entity affiliation and merge service")]
struct Args {
    /// Config file (overrides CROWD_ENTITIES_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(args.config.as_deref())?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting crowd-entities");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("CROWD_GIT_HASH"),
        built = env!("CROWD_BUILD_TIMESTAMP"),
        profile = env!("CROWD_BUILD_PROFILE"),
        "Build info"
    );

    info!("Database: {}", config.database_path.display());
    let db_pool = crowd_entities::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(config.event_bus_capacity);
    let bind_address = config.bind_address.clone();
    let state = AppState::new(db_pool, event_bus, config);
    let app = crowd_entities::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
