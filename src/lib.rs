pub mod cli;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;

/// Prepares the cache, starts the optional metrics endpoint and serves proxy traffic.
pub async fn run(settings: Settings) -> Result<()> {
    let app = build_app(settings).await?;
    if let Some(addr) = app.settings.metrics_listen {
        let path = "/metrics".to_string();
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr, path).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }
    proxy::run(app).await
}

/// Builds the shared state sessions run against.
pub async fn build_app(settings: Settings) -> Result<proxy::AppContext> {
    let settings = Arc::new(settings);
    let cache = Arc::new(
        proxy::cache::CellCache::new(settings.cache_capacity, settings.cache_dir.clone()).await?,
    );
    Ok(proxy::AppContext::new(settings, cache))
}
