mod config;
mod dispatcher;
mod error;
mod languages;
mod pool;
mod retry;
mod runner;
mod server;
mod store;
mod verdict;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::languages::LanguageRegistry;
use crate::pool::SandboxPool;
use crate::retry::BackoffPolicy;
use crate::runner::{ProcessRunner, RunLimits, Runner};
use crate::store::{MemoryResultStore, ResultStore};
use crate::worker::ExecutionWorker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env();
    info!(
        pool_size = config.max_pool_size,
        timeout_ms = config.timeout_ms,
        memory_mb = config.memory_limit_mb,
        pooling = config.pooling_enabled,
        "Starting grading engine"
    );

    let registry = Arc::new(LanguageRegistry::from_embedded()?);
    info!(
        "Loaded {} language runtime identifiers",
        registry.supported().len()
    );

    let pool = Arc::new(SandboxPool::new(
        config.max_pool_size,
        config.lease_ttl,
        config.pooling_enabled,
    ));
    let _reclaimer = pool.spawn_reclaimer(config.reclaim_interval);

    let runner: Arc<dyn Runner> = Arc::new(ProcessRunner::new());
    let backoff = BackoffPolicy {
        max_attempts: config.retry_max_attempts,
        base_delay: config.retry_base_delay,
        max_delay: config.retry_max_delay,
    };
    let worker = ExecutionWorker::new(
        runner,
        pool.clone(),
        config.acquire_timeout,
        backoff,
        RunLimits::new(config.compile_time_limit_ms, config.compile_memory_limit_mb),
    );

    let store: Arc<dyn ResultStore> = Arc::new(MemoryResultStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        worker,
        pool,
        store,
        config.clone(),
    ));

    let app = server::router(dispatcher);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
