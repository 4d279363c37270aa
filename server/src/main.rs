use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use kadori_server::config::{generate_config_template, Config};
use kadori_server::routes;
use kadori_server::session::Session;
use kadori_server::state::AppState;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kadori_server=info"))
}

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
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("KADORI server v{} starting", env!("CARGO_PKG_VERSION"));

    match config.reply_timeout() {
        Some(limit) => tracing::info!(timeout_ms = limit.as_millis() as u64, "Reply timeout enabled"),
        None => tracing::warn!("Reply timeout disabled, a silent singer can stall the rotation"),
    }

    let session = Session::new(config.reply_timeout());
    let app = routes::build_router(AppState::new(session));

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
