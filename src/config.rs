//! Configuration management.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `REGION_` prefix:
//!
//! - `REGION_HOST` - Server bind address (default: 0.0.0.0)
//! - `REGION_PORT` - Server port (default: 4080)
//! - `REGION_METADATA_DIR` - Directory of `<image_id>.json` metadata documents (required)
//! - `REGION_WORKERS` - Renders allowed to run at once (default: 8)
//! - `REGION_MAX_IDLE_HANDLES` - Unreferenced pixel buffers kept open (default: 64)
//! - `REGION_BACKOFF_INITIAL_MS` - First retry delay for locked data (default: 50)
//! - `REGION_BACKOFF_MAX_MS` - Ceiling on a single retry delay (default: 2000)
//! - `REGION_MEMOIZER_WAIT_MS` - Total wait for locked data before timing out (default: 10000)
//! - `REGION_JPEG_QUALITY` - JPEG quality when a request gives none (default: 90)
//! - `REGION_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `REGION_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::dispatch::DEFAULT_WORKERS;
use crate::render::{is_valid_quality, DEFAULT_JPEG_QUALITY};
use crate::resolver::{
    BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_IDLE_HANDLES,
    DEFAULT_MAX_WAIT,
};
use crate::server::DEFAULT_CACHE_MAX_AGE;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 4080;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Image Region Streamer - renders regions of multi-dimensional images.
///
/// Reads pixels from legacy raw planes or Zarr arrays and serves composited
/// JPEG or PNG regions over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-region-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "REGION_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "REGION_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory holding one `<image_id>.json` metadata document per image.
    #[arg(long, env = "REGION_METADATA_DIR")]
    pub metadata_dir: PathBuf,

    // =========================================================================
    // Rendering Configuration
    // =========================================================================
    /// Maximum number of renders running at once.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "REGION_WORKERS")]
    pub workers: usize,

    /// Number of unreferenced pixel buffers kept open.
    #[arg(long, default_value_t = DEFAULT_MAX_IDLE_HANDLES, env = "REGION_MAX_IDLE_HANDLES")]
    pub max_idle_handles: usize,

    /// JPEG quality used when a request gives none (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "REGION_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Retry Configuration
    // =========================================================================
    /// Delay before the first retry of a locked buffer, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_INITIAL_DELAY.as_millis() as u64,
        env = "REGION_BACKOFF_INITIAL_MS"
    )]
    pub backoff_initial_ms: u64,

    /// Ceiling on a single retry delay, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_DELAY.as_millis() as u64,
        env = "REGION_BACKOFF_MAX_MS"
    )]
    pub backoff_max_ms: u64,

    /// Total time to wait for a locked buffer, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_WAIT.as_millis() as u64,
        env = "REGION_MEMOIZER_WAIT_MS"
    )]
    pub memoizer_wait_ms: u64,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "REGION_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "REGION_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.metadata_dir.as_os_str().is_empty() {
            return Err(
                "Metadata directory is required. Set --metadata-dir or REGION_METADATA_DIR"
                    .to_string(),
            );
        }

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.backoff_initial_ms == 0 {
            return Err("backoff_initial_ms must be greater than 0".to_string());
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err("backoff_max_ms must not be below backoff_initial_ms".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Retry policy for locked pixel data.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
            Duration::from_millis(self.memoizer_wait_ms),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
