mod bootstrap;
mod crm;
mod dispatcher;
mod health;
mod model;
mod watchdog;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bookline_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use bookline_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    // Sessions left mid-booking by the previous process are resolved before
    // any new traffic is accepted.
    app.watchdog.recover_interrupted(chrono::Utc::now()).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut workers = Vec::new();
    for dispatcher in app.dispatchers {
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { dispatcher.run(rx).await }));
    }
    let watchdog = Arc::clone(&app.watchdog);
    let rx = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { watchdog.run(rx).await }));

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        app.runtime.health(),
    )
    .await?;

    let webhook_address =
        format!("{}:{}", app.config.server.bind_address, app.config.server.webhook_port);
    let listener = tokio::net::TcpListener::bind(&webhook_address).await?;
    tracing::info!(
        event_name = "server_started",
        bind_address = %webhook_address,
        "bookline-server started"
    );

    axum::serve(listener, webhooks::router(app.gateway))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(event_name = "server_stopping", "bookline-server stopping");
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        for worker in workers {
            let _ = worker.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "shutdown_grace_expired",
            "background workers did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
