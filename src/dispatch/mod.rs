//! Request dispatch.
//!
//! The [`Dispatcher`] runs one render request end to end:
//!
//! 1. Parse the raw parameters
//! 2. Wait for a worker slot
//! 3. Look up image metadata and resolve the request against it
//! 4. Acquire a pixel buffer lease
//! 5. On a blocking thread: read one tile per channel, composite, encode
//!
//! The worker slot and the lease both move into the blocking task, so they
//! are released when the work actually ends, whichever way it ends.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::buffer::Region;
use crate::error::{DispatchError, ReadError};
use crate::meta::MetadataSource;
use crate::render::{clamp_quality, ImageRasterEncoder, RasterEncoder, RenderingEngine};
use crate::request::{OutputFormat, RawParams, RenderRequest, RequestDefaults};
use crate::resolver::{BufferLease, PixelBufferResolver};

/// Default number of renders allowed to run at once.
pub const DEFAULT_WORKERS: usize = 8;

/// An encoded render result.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub data: Bytes,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Runs render requests on a bounded pool of blocking workers.
#[derive(Clone)]
pub struct Dispatcher {
    metadata: Arc<dyn MetadataSource>,
    resolver: PixelBufferResolver,
    engine: RenderingEngine,
    encoder: Arc<dyn RasterEncoder>,
    defaults: RequestDefaults,
    workers: Arc<Semaphore>,
    worker_count: usize,
}

impl Dispatcher {
    /// Create a dispatcher running at most `workers` renders at once.
    ///
    /// A `workers` of zero is treated as one.
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        resolver: PixelBufferResolver,
        workers: usize,
    ) -> Self {
        let worker_count = workers.max(1);
        Self {
            metadata,
            resolver,
            engine: RenderingEngine::new(),
            encoder: Arc::new(ImageRasterEncoder::new()),
            defaults: RequestDefaults::default(),
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
        }
    }

    /// Replace the raster encoder.
    pub fn with_encoder(mut self, encoder: Arc<dyn RasterEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Quality used when a request does not give one.
    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.defaults.quality = clamp_quality(quality);
        self
    }

    pub fn resolver(&self) -> &PixelBufferResolver {
        &self.resolver
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Worker slots not currently in use.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Parse `params` and render the request.
    pub async fn handle(&self, params: &RawParams) -> Result<RenderedImage, DispatchError> {
        let request = RenderRequest::parse_with(params, &self.defaults)?;
        self.render(request).await
    }

    /// Render an already parsed request.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderedImage, DispatchError> {
        let started = Instant::now();
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Worker("worker pool closed".to_string()))?;

        let meta = self.metadata.get_image_meta(request.image_id).await?;
        let request = request.resolve_against(&meta)?;
        let lease = self.resolver.acquire(&meta).await?;

        let engine = self.engine;
        let encoder = self.encoder.clone();
        let image_id = request.image_id;
        let rendered = tokio::task::spawn_blocking(move || {
            render_blocking(permit, lease, &request, engine, encoder.as_ref())
        })
        .await
        .map_err(|e| DispatchError::Worker(e.to_string()))??;

        debug!(
            image_id,
            width = rendered.width,
            height = rendered.height,
            bytes = rendered.data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendered region"
        );
        Ok(rendered)
    }
}

fn render_blocking(
    _permit: OwnedSemaphorePermit,
    lease: BufferLease,
    request: &RenderRequest,
    engine: RenderingEngine,
    encoder: &dyn RasterEncoder,
) -> Result<RenderedImage, DispatchError> {
    let region = request.region.unwrap_or_else(|| {
        let dims = lease.dimensions();
        Region::full(dims.size_x, dims.size_y)
    });

    let mut tiles = Vec::with_capacity(request.channels.len());
    for spec in &request.channels {
        match lease.read_tile(region, request.z, request.t, spec.index) {
            Ok(tile) => tiles.push(tile),
            Err(err @ ReadError::Corrupt(_)) => {
                lease.invalidate();
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }
    }
    drop(lease);

    let raster = engine.render(
        &tiles,
        &request.channels,
        request.flip_horizontal,
        request.flip_vertical,
    )?;
    let data = encoder.encode(&raster, request.format, request.quality)?;

    Ok(RenderedImage {
        data,
        format: request.format,
        width: raster.width,
        height: raster.height,
    })
}
