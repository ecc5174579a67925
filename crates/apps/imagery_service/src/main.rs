use std::env;
use std::sync::Arc;
use std::time::Duration;

use imagery_service::{HttpCatalog, ImageryService, OffsetService, ServiceConfig};
use streaming::Mercator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Loads one view against the live catalog and reports what came back.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env();
    let center = [
        env_var_f64("OSC_VIEW_LON", 13.4),
        env_var_f64("OSC_VIEW_LAT", 52.52),
    ];
    let zoom = env_var_f64("OSC_VIEW_ZOOM", 16.0);
    let size = [
        env_var_f64("OSC_VIEW_WIDTH", 1024.0),
        env_var_f64("OSC_VIEW_HEIGHT", 768.0),
    ];
    let timeout = Duration::from_secs(env_var_u64("OSC_TIMEOUT_SECS", 60));

    let catalog = Arc::new(HttpCatalog::new(&config.api_base));
    info!("querying {} around {center:?} at z{zoom}", catalog.endpoint());
    let offsets = OffsetService::new(config.offsets_url.clone());
    let service = ImageryService::new(config, catalog);

    let view = Mercator::centered(center, zoom, size);
    let planned = service.load_images(&view);
    info!("{} pages scheduled", planned.scheduled.len());

    if tokio::time::timeout(timeout, service.wait_idle()).await.is_err() {
        warn!("gave up waiting after {timeout:?}");
        service.reset();
    }

    let images = service.images(&view);
    let sequences = service.sequences(&view);
    info!("{} images sampled, {} sequences in view", images.len(), sequences.len());
    if let Some(metrics) = service.with_cache(|cache| cache.metrics().to_string()) {
        info!("metrics: {metrics}");
    }
    for record in images.iter().take(5) {
        info!(
            "{} seq {}#{} {}",
            record.key,
            record.sequence_id,
            record.sequence_index,
            service.image_url(record)
        );
    }

    match offsets.search(center).await {
        Ok(found) => info!("{} imagery offsets near the view center", found.len()),
        Err(err) => warn!("offset lookup failed: {err}"),
    }
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
