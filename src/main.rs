use anyhow::{Context, Result};
use sensorlog::{
    api::{routes::routes, Sites},
    config::Config,
};
use std::{env, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    // ─── 2) load config & sites ──────────────────────────────────────
    let config = Config::from_env().context("loading configuration")?;
    let sites = Arc::new(Sites::new(config.resolve()?));
    for site in sites.summaries() {
        info!(site = %site.name, "serving site");
    }

    // ─── 3) serve ────────────────────────────────────────────────────
    let (addr, server) = warp::serve(routes(sites))
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.port), async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .with_context(|| format!("binding port {}", config.port))?;

    info!("Server listening on {}", addr);
    info!("Health check: http://localhost:{}/health", addr.port());
    server.await;
    info!("stopped");
    Ok(())
}
