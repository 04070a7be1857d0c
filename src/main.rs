use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_relay::metrics::MetricsWindow;
use media_relay::proxy::HopMetricsPuller;
use media_relay::settings::Settings;
use media_relay::{server, AppState};

#[derive(Debug, Parser)]
#[command(version, about = "Chained streaming media relay with live quality metrics")]
struct AppArgs {
    /// Config file (TOML, YAML or JSON); env vars `MEDIA_RELAY__*` override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AppArgs::parse();
    let mut settings = Settings::new(args.config.as_ref()).context("loading settings")?;
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }

    // ── 1. Logging ───────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── 2. Shared state ──────────────────────────────────────────
    let client = settings.http_client().context("building upstream client")?;
    let metrics = Arc::new(MetricsWindow::new(settings.metrics.window_size));
    let state = Arc::new(AppState::from_settings(&settings, client.clone(), metrics.clone()));

    // ── 3. Hop metrics puller ────────────────────────────────────
    let puller = HopMetricsPuller::new(metrics, settings.proxy_chain.clone(), client)
        .with_interval(settings.poll_interval())
        .with_request_timeout(settings.hop_request_timeout())
        .with_thresholds(settings.slow_hop_thresholds())
        .spawn();

    // ── 4. Bind & serve ──────────────────────────────────────────
    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;

    info!(
        listen = %settings.listen,
        hops = settings.proxy_chain.len(),
        auth = settings.auth_token.is_some(),
        window = settings.metrics.window_size,
        "media relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    puller.shutdown().await;
    info!("media relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
