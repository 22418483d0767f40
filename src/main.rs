//! SWR Cache demo
//!
//! Builds the cache stack from environment variables and runs a few
//! pull-through reads against a simulated slow origin.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swr_cache::metrics::StatsSink;
use swr_cache::{BackgroundTasks, CacheBuilder, Config};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Profile {
    id: String,
    display_name: String,
}

swr_cache::namespace!(Profiles, "profiles", Profile);

/// Pretends to be a database that takes a while to answer.
async fn load_profile(id: String) -> anyhow::Result<Profile> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(Profile {
        display_name: format!("user-{}", id),
        id,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swr_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: fresh={}ms, stale={}ms, edge={}, encrypted={}",
        config.fresh_ms,
        config.stale_ms,
        config.edge.is_some(),
        config.encryption_key.is_some()
    );

    let stats = Arc::new(StatsSink::new());
    let background = Arc::new(BackgroundTasks::new());
    let cache = CacheBuilder::new(config)
        .metrics(stats.clone())
        .build(background.clone())?;
    let profiles = cache.namespace::<Profiles>()?;

    for round in 1..=3 {
        let started = Instant::now();
        match profiles.swr("42", load_profile).await {
            Ok(profile) => info!(
                round,
                elapsed_ms = started.elapsed().as_millis() as u64,
                name = %profile.display_name,
                "profile served"
            ),
            Err(err) => error!(round, error = %err, "profile lookup failed"),
        }
        // Let the write-behind land before the next round.
        background.drain().await;
    }

    let snapshot = stats.snapshot();
    info!(
        "Stats: hits={}, misses={}, writes={}, hit_rate={:.2}",
        snapshot.hits,
        snapshot.misses,
        snapshot.writes,
        snapshot.hit_rate()
    );

    background.drain().await;
    info!("Background work drained, exiting");
    Ok(())
}
