//! Pixel buffer resolution.
//!
//! This module turns image metadata into open, shareable pixel buffers:
//!
//! - [`PixelBufferResolver`] picks a backend through an ordered fallback
//!   chain and caches open handles with reference counts
//! - [`BufferLease`] is the caller's counted reference; dropping it releases
//! - [`BackoffPolicy`] paces retries while pixel data is locked by a writer

mod backoff;
mod registry;

pub use backoff::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_WAIT};
pub use registry::{
    BufferLease, CacheKey, PixelBufferResolver, ResolverBuilder, DEFAULT_MAX_IDLE_HANDLES,
};
