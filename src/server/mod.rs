//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /webgateway/render_image_region/{image_id}/{z}/{t}        │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (params → Dispatcher,    │  │  (router, CORS, tracing)    │  │
//! │  │  errors → JSON)          │  │                             │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, render_region_handler, AppState, ErrorResponse, HealthResponse,
    RegionPathParams, DEFAULT_CACHE_MAX_AGE,
};
pub use routes::{create_router, RouterConfig, RENDER_REGION_ROUTE};
