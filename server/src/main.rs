use peerhost::config::RelayConfig;
use peerhost::relay;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid relay configuration");
            std::process::exit(2);
        }
    };

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port = config.port, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let app = relay::app(relay::RelayState::new(&config));
    tracing::info!(port = config.port, capacity = config.channel_capacity, "peerhost relay listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "relay server failed");
        std::process::exit(1);
    }
}
