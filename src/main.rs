//! Simple Cache - demo and load harness
//!
//! Drives a `MemoryCache<String>` from many concurrent callers and reports
//! what the cache observed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simple_cache::cache::CacheStats;
use simple_cache::{CacheConfig, MemoryCache, SyncAddOutcome};

/// Number of concurrent callers racing on one missing key.
const CALLERS: usize = 256;

/// Number of keys stored before waiting for the sweep.
const FILL_KEYS: usize = 1000;

#[derive(Debug, Serialize)]
struct Report {
    config: CacheConfig,
    factory_calls: usize,
    created: usize,
    cached: usize,
    timed_out: usize,
    expired_notifications: usize,
    stats: CacheStats,
}

/// Main entry point for the demo harness.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Race concurrent callers on one key through `get_or_sync_add`
/// 4. Fill the cache and wait for the background sweep to evict it
/// 5. Print a JSON report, stopping early on Ctrl+C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simple_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::try_from_env().context("invalid cache configuration")?;
    info!(
        "Configuration loaded: expiration={:?}, maintenance_step={:?}, ignore_null_values={}",
        config.expiration, config.maintenance_step, config.ignore_null_values
    );

    let cache: MemoryCache<String> = MemoryCache::with_config(config.clone());
    let expired = Arc::new(AtomicUsize::new(0));
    let expired_counter = Arc::clone(&expired);
    cache.on_expiration(move |_, _| {
        expired_counter.fetch_add(1, Ordering::Relaxed);
    });

    let factory_calls = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();
    let outcomes = race_single_key(&cache, &factory_calls).await?;
    info!(
        "{} callers resolved in {:?} with {} factory call(s)",
        CALLERS,
        started.elapsed(),
        factory_calls.load(Ordering::SeqCst)
    );

    for i in 0..FILL_KEYS {
        cache.set(&format!("item_{i}"), i.to_string())?;
    }
    info!("Stored {} entries, waiting for the sweep", FILL_KEYS);

    let wait = config.expiration + config.maintenance_step * 2;
    tokio::select! {
        _ = wait_until_empty(&cache, wait) => {}
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, reporting early");
        }
    }

    let report = Report {
        config,
        factory_calls: factory_calls.load(Ordering::SeqCst),
        created: count(&outcomes, |o| matches!(o, SyncAddOutcome::Created(_))),
        cached: count(&outcomes, |o| matches!(o, SyncAddOutcome::Cached(_))),
        timed_out: count(&outcomes, SyncAddOutcome::is_timed_out),
        expired_notifications: expired.load(Ordering::Relaxed),
        stats: cache.stats(),
    };
    cache.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Runs `CALLERS` blocking callers against the same missing key.
async fn race_single_key(
    cache: &MemoryCache<String>,
    factory_calls: &Arc<AtomicUsize>,
) -> anyhow::Result<Vec<SyncAddOutcome<String>>> {
    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let factory_calls = Arc::clone(factory_calls);
            tokio::task::spawn_blocking(move || {
                cache.get_or_sync_add(
                    "report",
                    |key| {
                        let call = factory_calls.fetch_add(1, Ordering::SeqCst) + 1;
                        std::thread::sleep(Duration::from_millis(50));
                        format!("{key}-{call}")
                    },
                    Duration::from_secs(30),
                )
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(tasks.len());
    for task in tasks {
        outcomes.push(task.await.context("caller task failed")??);
    }
    Ok(outcomes)
}

async fn wait_until_empty(cache: &MemoryCache<String>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !cache.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn count<T>(outcomes: &[SyncAddOutcome<T>], predicate: impl Fn(&SyncAddOutcome<T>) -> bool) -> usize {
    outcomes.iter().filter(|outcome| predicate(*outcome)).count()
}
