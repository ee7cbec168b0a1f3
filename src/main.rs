use tracing::info;
use tracing_subscriber::EnvFilter;

use sheetsmith::api;
use sheetsmith::{AppConfig, AppError, AppState};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(config.listen_port);

    let state = AppState::from_config(&config)?;
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, provider = %config.ai_provider, "sheetsmith server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
