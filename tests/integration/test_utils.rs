//! Test utilities for integration tests.
//!
//! Builds on-disk fixtures in a scratch directory: legacy raw pixel files,
//! uncompressed Zarr v2 arrays and the JSON metadata documents that point at
//! them. Sample values come from a closure over `[x, y, z, c, t]` so tests
//! can predict every rendered pixel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use image_region_streamer::buffer::{encode_sample, ByteOrder, ZarrFactory, LOCK_SUFFIX};
use image_region_streamer::{
    create_router, BackendKind, BackoffPolicy, DirectoryMetadataSource, Dispatcher, ImageMeta,
    PixelBufferResolver, PixelType, RouterConfig, StorageLocator,
};

// =============================================================================
// Scratch Directories
// =============================================================================

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "irs-it-{}-{}-{}",
        label,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Extents of a test image as `[x, y, z, c, t]`.
pub type Extents = [u32; 5];

/// Backoff that gives up quickly so lock tests stay fast.
pub fn fast_backoff(max_wait_ms: u64) -> BackoffPolicy {
    BackoffPolicy::new(
        Duration::from_millis(5),
        Duration::from_millis(20),
        Duration::from_millis(max_wait_ms),
    )
}

// =============================================================================
// Fixture
// =============================================================================

/// A metadata directory plus the pixel data it describes.
pub struct Fixture {
    root: PathBuf,
}

impl Fixture {
    pub fn new(label: &str) -> Self {
        Self {
            root: scratch_dir(label),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata with the given extents and no storage attached yet.
    pub fn meta(&self, image_id: u64, extents: Extents, pixel_type: PixelType) -> ImageMeta {
        let [size_x, size_y, size_z, size_c, size_t] = extents;
        ImageMeta {
            image_id,
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
            pixel_type,
            backend: None,
            storage: StorageLocator::default(),
        }
    }

    /// Write a legacy pixels file for `meta` and point its locator at it.
    pub fn add_legacy(&self, meta: &mut ImageMeta, sample: impl Fn([u32; 5]) -> f64) {
        let dir = self.root.join("pixels");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(meta.image_id.to_string());

        let mut bytes = Vec::new();
        for t in 0..meta.size_t {
            for c in 0..meta.size_c {
                for z in 0..meta.size_z {
                    for y in 0..meta.size_y {
                        for x in 0..meta.size_x {
                            bytes.extend(encode_sample(
                                meta.pixel_type,
                                sample([x, y, z, c, t]),
                                ByteOrder::Big,
                            ));
                        }
                    }
                }
            }
        }
        std::fs::write(&path, bytes).unwrap();
        meta.storage.pixels_path = Some(path);
    }

    /// Write an uncompressed Zarr array for `meta` inside fileset
    /// `fileset_id` and point its locator at it.
    ///
    /// `chunks` is in `[t, c, z, y, x]` order like the array shape.
    pub fn add_zarr(
        &self,
        meta: &mut ImageMeta,
        fileset_id: u64,
        chunks: [u32; 5],
        sample: impl Fn([u32; 5]) -> f64,
    ) {
        meta.storage.ngff_root = Some(self.root.join("ngff"));
        meta.storage.fileset_id = Some(fileset_id);

        let array_dir = ZarrFactory::array_dir(meta).unwrap();
        std::fs::create_dir_all(&array_dir).unwrap();

        let shape = [meta.size_t, meta.size_c, meta.size_z, meta.size_y, meta.size_x];
        let zarray = serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": zarr_dtype(meta.pixel_type),
            "compressor": null,
            "fill_value": 0,
            "order": "C",
            "filters": null,
        });
        std::fs::write(
            array_dir.join(".zarray"),
            serde_json::to_vec(&zarray).unwrap(),
        )
        .unwrap();

        let grid: Vec<u32> = shape
            .iter()
            .zip(chunks.iter())
            .map(|(size, chunk)| size.div_ceil(*chunk))
            .collect();

        for ct in 0..grid[0] {
            for cc in 0..grid[1] {
                for cz in 0..grid[2] {
                    for cy in 0..grid[3] {
                        for cx in 0..grid[4] {
                            let index = [ct, cc, cz, cy, cx];
                            let bytes = zarr_chunk(meta, shape, chunks, index, &sample);
                            let name = index
                                .iter()
                                .map(|i| i.to_string())
                                .collect::<Vec<_>>()
                                .join(".");
                            std::fs::write(array_dir.join(name), bytes).unwrap();
                        }
                    }
                }
            }
        }
    }

    /// Store `meta` as `<image_id>.json`.
    pub fn write_meta(&self, meta: &ImageMeta) {
        std::fs::write(
            self.root.join(format!("{}.json", meta.image_id)),
            serde_json::to_vec_pretty(meta).unwrap(),
        )
        .unwrap();
    }

    /// Place a writer lock next to the legacy pixels file of `meta`.
    pub fn lock_legacy(&self, meta: &ImageMeta) -> PathBuf {
        let lock = legacy_lock_path(meta);
        std::fs::write(&lock, b"").unwrap();
        lock
    }

    pub fn metadata_source(&self) -> Arc<DirectoryMetadataSource> {
        Arc::new(DirectoryMetadataSource::new(self.root.clone()))
    }

    /// Dispatcher over this fixture with the default backend chain.
    pub fn dispatcher(&self, backoff: BackoffPolicy, workers: usize) -> Dispatcher {
        let resolver = PixelBufferResolver::new(4, backoff);
        Dispatcher::new(self.metadata_source(), resolver, workers)
    }

    /// Router over this fixture with tracing off.
    pub fn router(&self) -> Router {
        self.router_with(self.dispatcher(fast_backoff(200), 4))
    }

    pub fn router_with(&self, dispatcher: Dispatcher) -> Router {
        create_router(dispatcher, RouterConfig::new().with_tracing(false))
    }
}

pub fn legacy_lock_path(meta: &ImageMeta) -> PathBuf {
    let mut name = meta
        .storage
        .pixels_path
        .clone()
        .unwrap()
        .into_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Force the backend `kind` for `meta`.
pub fn force_backend(meta: &mut ImageMeta, kind: BackendKind) {
    meta.backend = Some(kind);
}

fn zarr_dtype(pixel_type: PixelType) -> &'static str {
    match pixel_type {
        PixelType::Int8 => "|i1",
        PixelType::Uint8 => "|u1",
        PixelType::Int16 => "<i2",
        PixelType::Uint16 => "<u2",
        PixelType::Int32 => "<i4",
        PixelType::Uint32 => "<u4",
        PixelType::Float => "<f4",
        PixelType::Double => "<f8",
    }
}

/// Bytes of one full chunk; samples past the array edge are zero.
fn zarr_chunk(
    meta: &ImageMeta,
    shape: [u32; 5],
    chunks: [u32; 5],
    index: [u32; 5],
    sample: &impl Fn([u32; 5]) -> f64,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    for it in 0..chunks[0] {
        for ic in 0..chunks[1] {
            for iz in 0..chunks[2] {
                for iy in 0..chunks[3] {
                    for ix in 0..chunks[4] {
                        let pos = [
                            index[0] * chunks[0] + it,
                            index[1] * chunks[1] + ic,
                            index[2] * chunks[2] + iz,
                            index[3] * chunks[3] + iy,
                            index[4] * chunks[4] + ix,
                        ];
                        let inside = pos.iter().zip(shape.iter()).all(|(p, s)| p < s);
                        let value = if inside {
                            let [t, c, z, y, x] = pos;
                            sample([x, y, z, c, t])
                        } else {
                            0.0
                        };
                        bytes.extend(encode_sample(meta.pixel_type, value, ByteOrder::Little));
                    }
                }
            }
        }
    }
    bytes
}

// =============================================================================
// HTTP Helpers
// =============================================================================

/// Issue a GET against `router` and collect the whole response.
pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

/// Decode an encoded response body into RGBA pixels.
pub fn decode(bytes: &[u8]) -> image::RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

/// Parse a JSON error body.
pub fn error_body(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}
