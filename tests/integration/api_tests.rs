//! API integration tests for region rendering and error handling.
//!
//! Tests verify:
//! - Rendering from legacy and Zarr storage through the HTTP router
//! - Region, tile, flip, channel and model parameters
//! - Error cases and their status codes
//! - Locked data retry and timeout

use std::time::Duration;

use axum::http::StatusCode;

use image_region_streamer::{BackendKind, HealthResponse, PixelType};

use super::test_utils::{decode, error_body, fast_backoff, force_backend, get, Fixture};

const RENDER: &str = "/webgateway/render_image_region";

/// 4x3 single-channel uint8 plane whose value is `x * 60 + y * 10`.
fn gradient_fixture(label: &str) -> Fixture {
    let fixture = Fixture::new(label);
    let mut meta = fixture.meta(1, [4, 3, 1, 1, 1], PixelType::Uint8);
    fixture.add_legacy(&mut meta, |[x, y, ..]| (x * 60 + y * 10) as f64);
    fixture.write_meta(&meta);
    fixture
}

fn gradient(x: u32, y: u32) -> u8 {
    (x * 60 + y * 10) as u8
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let fixture = Fixture::new("health");
    let (status, _, body) = get(&fixture.router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Basic Rendering
// =============================================================================

#[tokio::test]
async fn test_render_full_plane_png() {
    let fixture = gradient_fixture("full-plane");
    let uri = format!("{}/1/0/0?c=1%7C0:255$FFFFFF&format=png", RENDER);

    let (status, headers, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");

    let image = decode(&body);
    assert_eq!(image.dimensions(), (4, 3));
    for y in 0..3 {
        for x in 0..4 {
            let v = gradient(x, y);
            assert_eq!(image.get_pixel(x, y).0, [v, v, v, 255], "pixel ({}, {})", x, y);
        }
    }
}

#[tokio::test]
async fn test_render_defaults_to_jpeg_with_cache_headers() {
    let fixture = gradient_fixture("jpeg-default");
    let uri = format!("{}/1/0/0?c=1", RENDER);

    let (status, headers, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    assert_eq!(decode(&body).dimensions(), (4, 3));
}

#[tokio::test]
async fn test_render_region_with_flip() {
    let fixture = gradient_fixture("region-flip");
    let uri = format!(
        "{}/1/0/0?c=1%7C0:255$FFFFFF&region=1,1,2,2&flip=h&format=png",
        RENDER
    );

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    assert_eq!(image.dimensions(), (2, 2));
    // Output column 0 holds source column 2 after the horizontal flip
    assert_eq!(image.get_pixel(0, 0).0[0], gradient(2, 1));
    assert_eq!(image.get_pixel(1, 0).0[0], gradient(1, 1));
    assert_eq!(image.get_pixel(0, 1).0[0], gradient(2, 2));
}

#[tokio::test]
async fn test_render_tile() {
    let fixture = gradient_fixture("tile");
    let uri = format!("{}/1/0/0?c=1%7C0:255$FFFFFF&tile=0,1,0,2,2&format=png", RENDER);

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    assert_eq!(image.dimensions(), (2, 2));
    assert_eq!(image.get_pixel(0, 0).0[0], gradient(2, 0));
    assert_eq!(image.get_pixel(1, 1).0[0], gradient(3, 1));
}

#[tokio::test]
async fn test_trailing_path_segments_are_ignored() {
    let fixture = gradient_fixture("trailing-path");
    let router = fixture.router();

    for path in ["1/0/0/", "1/0/0/extra", "1/0/0/extra/more"] {
        let uri = format!("{}/{}?c=1%7C0:255$FFFFFF&region=1,1,2,1&format=png", RENDER, path);
        let (status, _, body) = get(&router, &uri).await;
        assert_eq!(status, StatusCode::OK, "{}", path);

        let image = decode(&body);
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0[0], gradient(1, 1));
        assert_eq!(image.get_pixel(1, 0).0[0], gradient(2, 1));
    }
}

#[tokio::test]
async fn test_region_clipped_to_plane() {
    let fixture = gradient_fixture("clip");
    let uri = format!("{}/1/0/0?c=1&region=2,1,100,100&format=png", RENDER);

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode(&body).dimensions(), (2, 2));
}

// =============================================================================
// Channels and Models
// =============================================================================

fn two_channel_fixture(label: &str) -> Fixture {
    let fixture = Fixture::new(label);
    let mut meta = fixture.meta(2, [3, 2, 1, 2, 1], PixelType::Uint8);
    fixture.add_legacy(&mut meta, |[x, y, _, c, _]| {
        if c == 0 {
            (x * 60) as f64
        } else {
            (y * 100) as f64
        }
    });
    fixture.write_meta(&meta);
    fixture
}

#[tokio::test]
async fn test_channels_blend_additively() {
    let fixture = two_channel_fixture("blend");
    let uri = format!(
        "{}/2/0/0?c=1%7C0:255$FF0000,2%7C0:255$00FF00&format=png",
        RENDER
    );

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    for y in 0..2 {
        for x in 0..3 {
            assert_eq!(
                image.get_pixel(x, y).0,
                [(x * 60) as u8, (y * 100) as u8, 0, 255]
            );
        }
    }
}

#[tokio::test]
async fn test_inactive_channel_is_skipped() {
    let fixture = two_channel_fixture("inactive");
    let uri = format!(
        "{}/2/0/0?c=1%7C0:255$FF0000,-2%7C0:255$00FF00&format=png",
        RENDER
    );

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode(&body).get_pixel(2, 1).0, [120, 0, 0, 255]);
}

#[tokio::test]
async fn test_greyscale_uses_first_active_channel() {
    let fixture = two_channel_fixture("greyscale");
    let uri = format!("{}/2/0/0?c=-1,2$FF0000&m=g&format=png", RENDER);

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    assert_eq!(image.get_pixel(0, 1).0, [100, 100, 100, 255]);
    assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
}

#[tokio::test]
async fn test_window_stretches_levels() {
    let fixture = gradient_fixture("window");
    let uri = format!("{}/1/0/0?c=1%7C60:120$FFFFFF&format=png", RENDER);

    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    assert_eq!(image.get_pixel(0, 0).0[0], 0);
    assert_eq!(image.get_pixel(1, 0).0[0], 0);
    assert_eq!(image.get_pixel(1, 2).0[0], 85);
    assert_eq!(image.get_pixel(2, 0).0[0], 255);
}

// =============================================================================
// Storage Backends
// =============================================================================

#[tokio::test]
async fn test_zarr_preferred_over_legacy() {
    let fixture = Fixture::new("zarr-preferred");
    let mut meta = fixture.meta(3, [5, 4, 1, 1, 1], PixelType::Uint16);
    fixture.add_legacy(&mut meta, |_| 1000.0);
    fixture.add_zarr(&mut meta, 30, [1, 1, 1, 3, 3], |[x, y, ..]| (x * 1000 + y) as f64);
    fixture.write_meta(&meta);

    let uri = format!("{}/3/0/0?c=1%7C0:4000$FFFFFF&format=png", RENDER);
    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let image = decode(&body);
    assert_eq!(image.dimensions(), (5, 4));
    assert_eq!(image.get_pixel(0, 0).0[0], 0);
    assert_eq!(image.get_pixel(4, 3).0[0], 255);
}

#[tokio::test]
async fn test_forced_legacy_backend() {
    let fixture = Fixture::new("forced-legacy");
    let mut meta = fixture.meta(4, [2, 2, 1, 1, 1], PixelType::Uint8);
    fixture.add_legacy(&mut meta, |_| 50.0);
    fixture.add_zarr(&mut meta, 40, [1, 1, 1, 2, 2], |_| 200.0);
    force_backend(&mut meta, BackendKind::Legacy);
    fixture.write_meta(&meta);

    let uri = format!("{}/4/0/0?c=1&format=png", RENDER);
    let (status, _, body) = get(&fixture.router(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode(&body).get_pixel(1, 1).0, [50, 50, 50, 255]);
}

#[tokio::test]
async fn test_image_without_storage_is_not_found() {
    let fixture = Fixture::new("no-storage");
    let meta = fixture.meta(5, [2, 2, 1, 1, 1], PixelType::Uint8);
    fixture.write_meta(&meta);

    let (status, _, body) = get(&fixture.router(), &format!("{}/5/0/0?c=1", RENDER)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_body(&body)["error"], "not_found");
}

// =============================================================================
// Locked Data
// =============================================================================

#[tokio::test]
async fn test_locked_data_times_out() {
    let fixture = gradient_fixture("locked-timeout");
    let mut meta = fixture.meta(1, [4, 3, 1, 1, 1], PixelType::Uint8);
    meta.storage.pixels_path = Some(fixture.root().join("pixels").join("1"));
    let lock = fixture.lock_legacy(&meta);

    let router = fixture.router_with(fixture.dispatcher(fast_backoff(60), 2));
    let uri = format!("{}/1/0/0?c=1", RENDER);

    let (status, _, body) = get(&router, &uri).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_body(&body)["error"], "timeout");

    // The failure is not cached
    std::fs::remove_file(lock).unwrap();
    let (status, _, _) = get(&router, &uri).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_lock_released_while_waiting() {
    let fixture = gradient_fixture("locked-release");
    let mut meta = fixture.meta(1, [4, 3, 1, 1, 1], PixelType::Uint8);
    meta.storage.pixels_path = Some(fixture.root().join("pixels").join("1"));
    let lock = fixture.lock_legacy(&meta);

    let router = fixture.router_with(fixture.dispatcher(fast_backoff(5_000), 2));
    let unlock = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::remove_file(lock).unwrap();
    });

    let (status, _, _) = get(&router, &format!("{}/1/0/0?c=1&format=png", RENDER)).await;
    unlock.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_image_returns_404() {
    let fixture = Fixture::new("missing");
    let (status, _, body) = get(&fixture.router(), &format!("{}/999/0/0?c=1", RENDER)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = error_body(&body);
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_bad_requests_return_400() {
    let fixture = gradient_fixture("bad-requests");
    let router = fixture.router();

    let cases = [
        "abc/0/0?c=1",
        "-1/0/0?c=1",
        "1/5/0?c=1",
        "1/0/3?c=1",
        "1/0/0?c=0",
        "1/0/0?c=2",
        "1/0/0?c=-1",
        "1/0/0?c=1$GG0000",
        "1/0/0?c=1&region=10,10,2,2",
        "1/0/0?c=1&region=0,0,0,2",
        "1/0/0?c=1&tile=1,0,0",
        "1/0/0?c=1&q=0",
        "1/0/0?c=1&q=1.5",
        "1/0/0?c=1&format=gif",
    ];

    for case in cases {
        let (status, _, body) = get(&router, &format!("{}/{}", RENDER, case)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {}", case);
        assert_eq!(error_body(&body)["error"], "bad_request", "case {}", case);
    }
}

#[tokio::test]
async fn test_corrupt_pixels_file_returns_500() {
    let fixture = gradient_fixture("corrupt");
    let pixels = fixture.root().join("pixels").join("1");
    std::fs::write(&pixels, [0u8; 5]).unwrap();

    let (status, _, body) = get(&fixture.router(), &format!("{}/1/0/0?c=1", RENDER)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(&body)["error"], "buffer_error");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let fixture = Fixture::new("unknown-route");
    let (status, _, _) = get(&fixture.router(), "/webgateway/render_image/1/0/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_handle() {
    let fixture = gradient_fixture("concurrent");
    let dispatcher = fixture.dispatcher(fast_backoff(200), 2);
    let router = fixture.router_with(dispatcher.clone());

    let mut handles = Vec::new();
    for i in 0..12u32 {
        let router = router.clone();
        let uri = format!("{}/1/0/0?c=1&region={},0,1,1&format=png", RENDER, i % 4);
        handles.push(tokio::spawn(async move { get(&router, &uri).await.0 }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(dispatcher.available_workers(), 2);
    assert_eq!(dispatcher.resolver().open_handles(), 1);
    assert_eq!(dispatcher.resolver().idle_handles(), 1);
}
