use axum::serve;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ollama_chat_adapter::config::AdapterConfig;
use ollama_chat_adapter::proxy::{router, AdapterState, CHAT_COMPLETION_ROUTES};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Configuration from environment variables
    let config = match AdapterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Ollama Chat Adapter");
    config.log_summary();
    info!("Routes: POST {}", CHAT_COMPLETION_ROUTES.join(", POST "));

    let state = match AdapterState::new(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let app = router(state);

    // Start server
    let bind_addr = config.bind_addr();
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    info!("Ollama Chat Adapter is ready");

    if let Err(e) = serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
