//! # Image Region Streamer
//!
//! An HTTP microservice that renders rectangular regions of 5-D
//! (X, Y, Z, C, T) microscopy images to JPEG or PNG.
//!
//! Each request names an image, a plane, a region and a set of channels
//! with display windows and colors. The service reads the raw samples from
//! whichever storage backend holds the image, composites the channels into
//! an RGBA raster, optionally flips it and encodes the result.
//!
//! ## Features
//!
//! - **Backend fallback**: Zarr arrays are preferred, the legacy raw pixel
//!   repository is the fallback, and metadata can force either
//! - **Handle reuse**: opened pixel buffers are shared and reference
//!   counted, and concurrent opens of the same fileset are coalesced
//! - **Locked data retry**: buffers still being written are retried with
//!   exponential backoff up to a wait budget
//! - **Bounded rendering**: a fixed worker pool caps concurrent renders
//!
//! ## Architecture
//!
//! - [`request`] - Request parameter parsing and validation
//! - [`meta`] - Image metadata and its lookup service
//! - [`buffer`] - Pixel buffer trait and storage backends
//! - [`resolver`] - Backend selection, handle cache and retry policy
//! - [`render`] - Channel compositing, flipping and encoding
//! - [`dispatch`] - Request pipeline and worker pool
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use image_region_streamer::{
//!     create_router, BackoffPolicy, DirectoryMetadataSource, Dispatcher, PixelBufferResolver,
//!     RouterConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let metadata = Arc::new(DirectoryMetadataSource::new("/data/meta"));
//!     let resolver = PixelBufferResolver::new(64, BackoffPolicy::default());
//!     let dispatcher = Dispatcher::new(metadata, resolver, 8);
//!
//!     let router = create_router(dispatcher, RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:4080").await?;
//!     axum::serve(listener, router).await
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod meta;
pub mod render;
pub mod request;
pub mod resolver;
pub mod server;

// Re-export commonly used types
pub use buffer::{
    BackendFactory, BackendKind, Dimensions, LegacyFactory, PixelBuffer, PixelData, Region, Tile,
    ZarrFactory,
};
pub use config::Config;
pub use dispatch::{Dispatcher, RenderedImage, DEFAULT_WORKERS};
pub use error::{
    AcquireError, DispatchError, EncodeError, MetadataError, OpenError, ReadError, RenderError,
    Status, ValidationError,
};
pub use meta::{DirectoryMetadataSource, ImageMeta, MetadataSource, PixelType, StorageLocator};
pub use render::{
    ImageRasterEncoder, RasterEncoder, RenderedRaster, RenderingEngine, DEFAULT_JPEG_QUALITY,
};
pub use request::{ChannelSpec, OutputFormat, RawParams, RenderModel, RenderRequest, Window};
pub use resolver::{BackoffPolicy, BufferLease, CacheKey, PixelBufferResolver, ResolverBuilder};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
