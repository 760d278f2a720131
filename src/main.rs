use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ride_booking::api;
use ride_booking::config::{Config, LogFormat};
use ride_booking::engine::otp::run_challenge_reaper;
use ride_booking::error::AppError;
use ride_booking::state::{AppState, Collaborators};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set; signing sessions with the development secret");
    }

    let collaborators = Collaborators::from_config(&config)?;
    let shared_state = Arc::new(AppState::new(&config, collaborators));

    if let Some(interval) = config.otp_reaper_interval {
        tokio::spawn(run_challenge_reaper(
            shared_state.challenges.clone(),
            shared_state.clock.clone(),
            interval,
        ));
    }

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
