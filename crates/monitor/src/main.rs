use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adwatch_generation::GenerationApi;
use adwatch_monitor::config::MonitorConfig;
use adwatch_monitor::monitor::{build_notifiers, Monitor};
use adwatch_monitor::router::build_app_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "adwatch_monitor=info,adwatch_events=info,tower_http=info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = MonitorConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        brief_dir = %config.brief_dir.display(),
        state_dir = %config.state_dir.display(),
        generation_api_url = %config.generation_api_url,
        "Loaded monitor configuration"
    );

    // --- Collaborators ---
    let service = Arc::new(GenerationApi::new(config.generation_api_url.clone()));
    let notifiers = build_notifiers(&config).context("Failed to build notifiers")?;
    tracing::info!(
        primary = %config.notify_primary_channel,
        alternate = config.notify_alternate_channel.as_deref(),
        "Notification channels configured"
    );

    // --- Monitor ---
    let monitor = Monitor::build(config, service, notifiers)
        .await
        .context("Failed to build monitor")?;
    let handles = monitor.start();

    // --- Start server ---
    let config = Arc::clone(&monitor.config);
    let app = build_app_router(monitor.app_state());
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting status server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let cancel = monitor.cancel_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping monitor tasks");
    monitor
        .shutdown(handles, Duration::from_secs(config.shutdown_timeout_secs))
        .await
        .context("Shutdown did not complete cleanly")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
