//! Video generation worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_providers::{LumaAdapter, ProviderAdapter, ProviderRegistry, RunwayAdapter};
use vgen_queue::{MetricsSink, QueueConfig, RedisJobQueue, SystemClock};
use vgen_storage::R2Uploader;
use vgen_worker::{Janitor, JobExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let clock = Arc::new(SystemClock);

    // Queue with the metrics sink attached. Deployments that persist job
    // history additionally wire a RepositorySink here.
    let queue_config = QueueConfig::from_env();
    let queue = match RedisJobQueue::new(
        queue_config.clone(),
        clock.clone(),
        vec![Arc::new(MetricsSink)],
    ) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {e}");
        std::process::exit(1);
    }
    let queue = Arc::new(queue);

    // Provider adapters: a missing key disables that provider.
    let mut adapters = ProviderRegistry::new();
    match RunwayAdapter::from_env() {
        Ok(adapter) => {
            if let Err(e) = adapter.validate_credentials().await {
                warn!("Runway credential validation failed: {e}");
            }
            adapters = adapters.register(Arc::new(adapter));
        }
        Err(e) => warn!("Runway adapter disabled: {e}"),
    }
    match LumaAdapter::from_env() {
        Ok(adapter) => {
            if let Err(e) = adapter.validate_credentials().await {
                warn!("Luma credential validation failed: {e}");
            }
            adapters = adapters.register(Arc::new(adapter));
        }
        Err(e) => warn!("Luma adapter disabled: {e}"),
    }
    if adapters.is_empty() {
        error!("No provider adapters configured, refusing to start");
        std::process::exit(1);
    }

    let uploader = match R2Uploader::from_env() {
        Ok(u) => Arc::new(u),
        Err(e) => {
            error!("Failed to create storage uploader: {e}");
            std::process::exit(1);
        }
    };

    let http = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create HTTP client: {e}");
            std::process::exit(1);
        }
    };

    // Retention janitor
    let janitor = Janitor::new(
        queue.clone(),
        config.janitor_interval,
        queue_config.retain_completed,
        queue_config.retain_failed,
        queue_config.clean_batch_limit,
    );
    tokio::spawn(async move {
        janitor.run().await;
    });

    let ctx = WorkerContext {
        queue,
        adapters,
        uploader,
        clock,
        http,
        config,
    };

    let executor = match JobExecutor::new(ctx) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!("Failed to create job executor: {e}");
            std::process::exit(1);
        }
    };

    // Graceful shutdown on ctrl-c
    let shutdown_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {e}");
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
