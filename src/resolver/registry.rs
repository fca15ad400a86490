//! Reference-counted cache of open pixel buffers.
//!
//! The resolver provides:
//! - Backend selection through an ordered chain of factories
//! - Singleflight opens: at most one open runs per cache key
//! - Retry with backoff while the pixel data is locked
//! - Idle handle caching with LRU eviction
//!
//! All bookkeeping lives in one [`ResolverState`] behind one mutex. Opens run
//! in a spawned task, so a caller that stops waiting never strands the others.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use lru::LruCache;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::buffer::{BackendFactory, BackendKind, LegacyFactory, PixelBuffer, ZarrFactory};
use crate::error::{AcquireError, OpenError};
use crate::meta::ImageMeta;

use super::backoff::BackoffPolicy;

// =============================================================================
// Configuration
// =============================================================================

/// Default number of unreferenced handles kept open.
pub const DEFAULT_MAX_IDLE_HANDLES: usize = 64;

// =============================================================================
// Cache Key
// =============================================================================

/// Identity of one physical dataset.
///
/// Images of the same fileset and series share a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Fileset { fileset_id: u64, series: u32 },
    Image(u64),
}

impl CacheKey {
    pub fn for_meta(meta: &ImageMeta) -> Self {
        match meta.storage.fileset_id {
            Some(fileset_id) => CacheKey::Fileset {
                fileset_id,
                series: meta.storage.series,
            },
            None => CacheKey::Image(meta.image_id),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Fileset { fileset_id, series } => {
                write!(f, "fileset:{}/{}", fileset_id, series)
            }
            CacheKey::Image(id) => write!(f, "image:{}", id),
        }
    }
}

// =============================================================================
// Resolver State
// =============================================================================

/// Result of an open, published to every waiter of the slot.
type OpenOutcome = Option<Result<(), AcquireError>>;

enum Slot {
    /// An open task is running; `waiters` callers will hold a reference
    /// when it succeeds.
    Opening {
        generation: u64,
        waiters: usize,
        outcome: watch::Receiver<OpenOutcome>,
    },
    /// The handle of `generation` serves this key.
    Open(u64),
}

struct Entry {
    key: CacheKey,
    buffer: Arc<dyn PixelBuffer>,
    refs: usize,
    /// No longer reachable by key; closed once unreferenced.
    retired: bool,
}

struct ResolverState {
    slots: HashMap<CacheKey, Slot>,
    entries: HashMap<u64, Entry>,
    /// Generations with zero references, least recently released first.
    idle: LruCache<u64, ()>,
    next_generation: u64,
    shutting_down: bool,
}

impl ResolverState {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            entries: HashMap::new(),
            idle: LruCache::unbounded(),
            next_generation: 0,
            shutting_down: false,
        }
    }

    /// Drop one reference to `generation`, returning buffers to close.
    fn release(&mut self, generation: u64, max_idle: usize) -> Vec<Arc<dyn PixelBuffer>> {
        let mut to_close = Vec::new();
        let Some(entry) = self.entries.get_mut(&generation) else {
            return to_close;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return to_close;
        }

        if entry.retired {
            if let Some(entry) = self.entries.remove(&generation) {
                to_close.push(entry.buffer);
            }
            return to_close;
        }

        self.idle.put(generation, ());
        while self.idle.len() > max_idle {
            let Some((evicted, ())) = self.idle.pop_lru() else {
                break;
            };
            if let Some(entry) = self.remove_entry(evicted) {
                debug!(key = %entry.key, "Evicting idle pixel buffer");
                to_close.push(entry.buffer);
            }
        }
        to_close
    }

    /// Remove an entry and the slot that points at it.
    fn remove_entry(&mut self, generation: u64) -> Option<Entry> {
        let entry = self.entries.remove(&generation)?;
        self.idle.pop(&generation);
        if matches!(self.slots.get(&entry.key), Some(Slot::Open(g)) if *g == generation) {
            self.slots.remove(&entry.key);
        }
        Some(entry)
    }

    /// Make `generation` unreachable by key, returning it if already idle.
    fn retire(&mut self, generation: u64) -> Option<Arc<dyn PixelBuffer>> {
        let entry = self.entries.get_mut(&generation)?;
        entry.retired = true;
        let key = entry.key;
        if matches!(self.slots.get(&key), Some(Slot::Open(g)) if *g == generation) {
            self.slots.remove(&key);
        }
        if self.idle.pop(&generation).is_some() {
            return self.entries.remove(&generation).map(|e| e.buffer);
        }
        None
    }
}

fn close_all(buffers: Vec<Arc<dyn PixelBuffer>>) {
    for buffer in buffers {
        buffer.close();
    }
}

// =============================================================================
// PixelBufferResolver
// =============================================================================

struct Inner {
    factories: Vec<Arc<dyn BackendFactory>>,
    backoff: BackoffPolicy,
    max_idle_handles: usize,
    state: Mutex<ResolverState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, generation: u64) {
        let to_close = self.state().release(generation, self.max_idle_handles);
        close_all(to_close);
    }

    /// Pick the first factory that accepts `meta` and open with it.
    fn open_once(&self, meta: &ImageMeta) -> Result<Arc<dyn PixelBuffer>, OpenError> {
        let factory = self
            .factories
            .iter()
            .filter(|f| meta.backend.map_or(true, |kind| f.kind() == kind))
            .find(|f| f.probe(meta))
            .ok_or_else(|| match meta.backend {
                Some(kind) => OpenError::NotFound(format!("{} backend does not hold this image", kind)),
                None => OpenError::NotFound("no backend holds this image".to_string()),
            })?;

        debug!(image_id = meta.image_id, backend = %factory.kind(), "Opening pixel buffer");
        factory.open(meta)
    }
}

/// Resolves images to open pixel buffers.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct PixelBufferResolver {
    inner: Arc<Inner>,
}

impl PixelBufferResolver {
    /// Create a resolver with the built-in chain: Zarr, then legacy.
    pub fn new(max_idle_handles: usize, backoff: BackoffPolicy) -> Self {
        Self::builder()
            .backend(ZarrFactory::new())
            .backend(LegacyFactory::new())
            .max_idle_handles(max_idle_handles)
            .backoff(backoff)
            .build()
    }

    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// Backend kinds in the order they are tried.
    pub fn chain(&self) -> Vec<BackendKind> {
        self.inner.factories.iter().map(|f| f.kind()).collect()
    }

    /// Acquire a buffer for `meta`, opening it if no handle is cached.
    ///
    /// Concurrent calls for the same dataset share one open. Lock contention
    /// is retried with the configured backoff.
    pub async fn acquire(&self, meta: &ImageMeta) -> Result<BufferLease, AcquireError> {
        let key = CacheKey::for_meta(meta);

        let (generation, mut outcome) = {
            let mut guard = self.inner.state();
            let state = &mut *guard;
            if state.shutting_down {
                return Err(AcquireError::ShuttingDown);
            }

            match state.slots.get_mut(&key) {
                Some(Slot::Open(generation)) => {
                    let generation = *generation;
                    state.idle.pop(&generation);
                    if let Some(entry) = state.entries.get_mut(&generation) {
                        entry.refs += 1;
                        return Ok(BufferLease::new(
                            self.inner.clone(),
                            key,
                            generation,
                            entry.buffer.clone(),
                        ));
                    }
                    // Slot without entry cannot be served; replace it below
                    state.slots.remove(&key);
                    self.start_open(state, key, meta)
                }
                Some(Slot::Opening {
                    generation,
                    waiters,
                    outcome,
                }) => {
                    *waiters += 1;
                    (*generation, outcome.clone())
                }
                None => self.start_open(state, key, meta),
            }
        };

        let mut pending = PendingLease {
            inner: self.inner.clone(),
            key,
            generation,
            armed: true,
        };

        let result = match outcome.wait_for(|o| o.is_some()).await {
            Ok(published) => published.clone().unwrap_or(Err(AcquireError::ShuttingDown)),
            Err(_) => Err(AcquireError::ShuttingDown),
        };
        result?;

        let buffer = {
            let state = self.inner.state();
            state.entries.get(&generation).map(|e| e.buffer.clone())
        };
        match buffer {
            Some(buffer) => {
                pending.armed = false;
                Ok(BufferLease::new(self.inner.clone(), key, generation, buffer))
            }
            None => Err(AcquireError::ShuttingDown),
        }
    }

    /// Register an `Opening` slot and spawn the task that fills it.
    fn start_open(
        &self,
        state: &mut ResolverState,
        key: CacheKey,
        meta: &ImageMeta,
    ) -> (u64, watch::Receiver<OpenOutcome>) {
        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = watch::channel(None);
        state.slots.insert(
            key,
            Slot::Opening {
                generation,
                waiters: 1,
                outcome: rx.clone(),
            },
        );

        let inner = self.inner.clone();
        let meta = meta.clone();
        tokio::spawn(async move {
            let result = open_with_retry(&inner, &meta).await;
            let outcome = complete_open(&inner, key, generation, result);
            let _ = tx.send(Some(outcome));
        });

        (generation, rx)
    }

    /// Forget the handle cached for `key`.
    ///
    /// Outstanding leases keep working; the handle closes when the last one
    /// is released. An open already in flight is unaffected.
    pub fn invalidate(&self, key: CacheKey) {
        let to_close = {
            let mut state = self.inner.state();
            match state.slots.get(&key) {
                Some(Slot::Open(generation)) => {
                    let generation = *generation;
                    state.retire(generation)
                }
                _ => None,
            }
        };
        if let Some(buffer) = to_close {
            debug!(key = %key, "Closing invalidated pixel buffer");
            buffer.close();
        }
    }

    /// Stop handing out buffers.
    ///
    /// Idle handles are closed now; leased handles close on release. Opens in
    /// flight finish by closing what they opened.
    pub fn shutdown(&self) {
        let to_close: Vec<_> = {
            let mut state = self.inner.state();
            state.shutting_down = true;
            let generations: Vec<u64> = state.entries.keys().copied().collect();
            generations
                .into_iter()
                .filter_map(|g| state.retire(g))
                .collect()
        };
        info!(closed = to_close.len(), "Pixel buffer resolver shut down");
        close_all(to_close);
    }

    /// Number of handles currently open, leased or idle.
    pub fn open_handles(&self) -> usize {
        self.inner.state().entries.len()
    }

    /// Number of open handles with no outstanding lease.
    pub fn idle_handles(&self) -> usize {
        self.inner.state().idle.len()
    }
}

/// Open `meta`, retrying while the data is locked.
async fn open_with_retry(
    inner: &Arc<Inner>,
    meta: &ImageMeta,
) -> Result<Arc<dyn PixelBuffer>, AcquireError> {
    let image_id = meta.image_id;
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let task_inner = inner.clone();
        let task_meta = meta.clone();
        let result = tokio::task::spawn_blocking(move || task_inner.open_once(&task_meta))
            .await
            .unwrap_or_else(|e| Err(OpenError::Io(format!("open task failed: {}", e))));
        attempt += 1;

        let reason = match result {
            Ok(buffer) => return Ok(buffer),
            Err(OpenError::Locked(reason)) => reason,
            Err(OpenError::NotFound(reason)) => {
                return Err(AcquireError::NotFound { image_id, reason })
            }
            Err(OpenError::Corrupt(reason)) => {
                return Err(AcquireError::Corrupt { image_id, reason })
            }
            Err(OpenError::Io(reason)) => return Err(AcquireError::Io { image_id, reason }),
        };

        let elapsed = started.elapsed();
        if inner.backoff.should_give_up(attempt, elapsed) {
            warn!(image_id, attempts = attempt, %reason, "Gave up waiting for locked pixel data");
            return Err(AcquireError::Timeout {
                image_id,
                attempts: attempt,
            });
        }

        let delay = inner
            .backoff
            .next_delay(attempt - 1)
            .min(inner.backoff.max_wait.saturating_sub(elapsed));
        debug!(image_id, attempt, ?delay, %reason, "Pixel data locked, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Settle the `Opening` slot of `generation` with the open's result.
fn complete_open(
    inner: &Inner,
    key: CacheKey,
    generation: u64,
    result: Result<Arc<dyn PixelBuffer>, AcquireError>,
) -> Result<(), AcquireError> {
    let mut state = inner.state();

    let waiters = match state.slots.get(&key) {
        Some(Slot::Opening {
            generation: g,
            waiters,
            ..
        }) if *g == generation => *waiters,
        _ => 0,
    };

    let buffer = match result {
        Ok(buffer) => buffer,
        Err(e) => {
            state.slots.remove(&key);
            return Err(e);
        }
    };

    if state.shutting_down {
        state.slots.remove(&key);
        drop(state);
        buffer.close();
        return Err(AcquireError::ShuttingDown);
    }

    info!(key = %key, backend = %buffer.kind(), waiters, "Opened pixel buffer");
    state.slots.insert(key, Slot::Open(generation));
    state.entries.insert(
        generation,
        Entry {
            key,
            buffer,
            refs: waiters + 1,
            retired: false,
        },
    );
    // The extra reference is dropped here so an abandoned open lands in the
    // idle cache like any other release.
    let to_close = state.release(generation, inner.max_idle_handles);
    drop(state);
    close_all(to_close);
    Ok(())
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`PixelBufferResolver`].
pub struct ResolverBuilder {
    factories: Vec<Arc<dyn BackendFactory>>,
    backoff: BackoffPolicy,
    max_idle_handles: usize,
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self {
            factories: Vec::new(),
            backoff: BackoffPolicy::default(),
            max_idle_handles: DEFAULT_MAX_IDLE_HANDLES,
        }
    }
}

impl ResolverBuilder {
    /// Append a factory to the end of the chain.
    pub fn backend<F: BackendFactory + 'static>(mut self, factory: F) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Put an array-storage-engine factory at the front of the chain.
    pub fn array_engine<F: BackendFactory + 'static>(mut self, factory: F) -> Self {
        self.factories.insert(0, Arc::new(factory));
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_idle_handles(mut self, max_idle_handles: usize) -> Self {
        self.max_idle_handles = max_idle_handles;
        self
    }

    pub fn build(self) -> PixelBufferResolver {
        PixelBufferResolver {
            inner: Arc::new(Inner {
                factories: self.factories,
                backoff: self.backoff,
                max_idle_handles: self.max_idle_handles,
                state: Mutex::new(ResolverState::new()),
            }),
        }
    }
}

// =============================================================================
// Leases
// =============================================================================

/// A counted reference to an open pixel buffer.
///
/// Dropping the lease releases the reference.
pub struct BufferLease {
    inner: Arc<Inner>,
    key: CacheKey,
    generation: u64,
    buffer: Arc<dyn PixelBuffer>,
}

impl BufferLease {
    fn new(
        inner: Arc<Inner>,
        key: CacheKey,
        generation: u64,
        buffer: Arc<dyn PixelBuffer>,
    ) -> Self {
        Self {
            inner,
            key,
            generation,
            buffer,
        }
    }

    pub fn buffer(&self) -> &Arc<dyn PixelBuffer> {
        &self.buffer
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Release the reference now.
    pub fn release(self) {}

    /// Release the reference and stop serving this handle.
    ///
    /// Used when reads report corruption; the next acquire reopens.
    pub fn invalidate(self) {
        let to_close = self.inner.state().retire(self.generation);
        if let Some(buffer) = to_close {
            buffer.close();
        }
        warn!(key = %self.key, "Pixel buffer invalidated");
    }
}

impl Deref for BufferLease {
    type Target = dyn PixelBuffer;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.inner.release(self.generation);
    }
}

impl fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLease")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("backend", &self.buffer.kind())
            .finish()
    }
}

/// A caller counted as a waiter on an `Opening` slot.
///
/// If the caller goes away before turning this into a lease, the reference
/// it was promised is given back.
struct PendingLease {
    inner: Arc<Inner>,
    key: CacheKey,
    generation: u64,
    armed: bool,
}

impl Drop for PendingLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state();
        if state.entries.contains_key(&self.generation) {
            let to_close = state.release(self.generation, self.inner.max_idle_handles);
            drop(state);
            close_all(to_close);
            return;
        }
        if let Some(Slot::Opening {
            generation,
            waiters,
            ..
        }) = state.slots.get_mut(&self.key)
        {
            if *generation == self.generation {
                *waiters = waiters.saturating_sub(1);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
