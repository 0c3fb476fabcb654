mod auth;
mod chat;
mod config;
mod db;
mod identity;
mod presence;
mod rooms;
mod routes;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Pulse realtime server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir).
    // Token issuance lives in the main application's auth service; both
    // sides share this key so sockets accept the same bearer tokens.
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // In-memory realtime state: presence registry, room router, typing
    // relay. All of it dies with the process; durable truth stays in SQLite.
    let presence = Arc::new(presence::PresenceRegistry::new());
    let rooms = Arc::new(rooms::RoomRouter::new());
    let typing = Arc::new(chat::typing::TypingRelay::new(Duration::from_secs(
        config.typing_idle_secs,
    )));

    // Fan presence mutations out to every connected session as getOnlineUsers.
    presence::spawn_presence_broadcaster(presence.clone());

    // Build application state
    let app_state = state::AppState {
        db,
        jwt_secret,
        presence,
        rooms,
        typing,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
