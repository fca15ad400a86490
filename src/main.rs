//! Image Region Streamer - renders regions of multi-dimensional images.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_region_streamer::{
    config::Config,
    dispatch::Dispatcher,
    meta::DirectoryMetadataSource,
    resolver::PixelBufferResolver,
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    info!("  Metadata directory: {}", config.metadata_dir.display());
    if !config.metadata_dir.is_dir() {
        warn!("  Metadata directory does not exist yet; every request will 404");
    }
    info!("  Workers: {}", config.workers);
    info!("  Idle buffer handles: {}", config.max_idle_handles);
    info!(
        "  Locked data retry: {}ms initial, {}ms max, {}ms total",
        config.backoff_initial_ms, config.backoff_max_ms, config.memoizer_wait_ms
    );
    info!("  Default JPEG quality: {}", config.jpeg_quality);

    let metadata = Arc::new(DirectoryMetadataSource::new(config.metadata_dir.clone()));
    let resolver = PixelBufferResolver::new(config.max_idle_handles, config.backoff_policy());
    info!(
        "  Backend chain: {}",
        resolver
            .chain()
            .iter()
            .map(|kind| kind.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let dispatcher = Dispatcher::new(metadata, resolver.clone(), config.workers)
        .with_default_quality(config.jpeg_quality);

    let router = create_router(dispatcher, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!(
        "    curl 'http://{}/webgateway/render_image_region/<image_id>/0/0?c=1&m=c'",
        addr
    );
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    resolver.shutdown();

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("┌──────────────────────────────────────┐");
    info!("│        Image Region Streamer         │");
    info!("└──────────────────────────────────────┘");
    info!("                                v{}", version);
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "image_region_streamer=debug,tower_http=debug"
    } else {
        "image_region_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}
