//! HTTP request handlers for the region rendering API.
//!
//! # Endpoints
//!
//! - `GET /webgateway/render_image_region/{image_id}/{z}/{t}` - Render a region
//! - `GET /health` - Health check endpoint

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;
use crate::error::DispatchError;
use crate::request::RawParams;

/// Default cache control max-age in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,

    /// Cache control max-age in seconds for rendered images
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
        }
    }

    pub fn with_cache_max_age(dispatcher: Dispatcher, cache_max_age: u32) -> Self {
        Self {
            dispatcher,
            cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters of a render request.
///
/// Kept as strings so malformed values are reported by the request parser
/// like any other bad parameter.
#[derive(Debug, Deserialize)]
pub struct RegionPathParams {
    pub image_id: String,
    pub z: String,
    pub t: String,
}

impl RegionPathParams {
    /// Merge with the query string; path values win.
    pub fn into_raw_params(self, query: HashMap<String, String>) -> RawParams {
        let mut params = query;
        params.insert("imageId".to_string(), self.image_id);
        params.insert("theZ".to_string(), self.z);
        params.insert("theT".to_string(), self.t);
        params
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "bad_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert a dispatch failure to an HTTP response.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other 4xx at WARN.
impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status().code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let error_type = self.kind();
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Render a region of one plane.
///
/// # Endpoint
///
/// `GET /webgateway/render_image_region/{image_id}/{z}/{t}`
///
/// # Query Parameters
///
/// - `c`: channels, e.g. `1|0:255$FF0000FF,-2|0:255$00FF00FF`
/// - `region`: `x,y,width,height` or `tile`: `level,x,y[,width,height]`
/// - `m`: `c` (color, default) or `g` (greyscale)
/// - `flip`: `h`, `v` or both
/// - `format`: `jpeg` (default) or `png`
/// - `q`: JPEG quality in `(0, 1]`
///
/// # Response
///
/// `200 OK` with the encoded image, or a JSON [`ErrorResponse`].
pub async fn render_region_handler(
    State(state): State<AppState>,
    Path(path): Path<RegionPathParams>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, DispatchError> {
    let params = path.into_raw_params(query);
    let image = state.dispatcher.handle(&params).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, image.format.content_type().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
        ],
        image.data,
    )
        .into_response())
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
