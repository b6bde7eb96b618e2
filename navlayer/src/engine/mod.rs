//! Map engine orchestration.
//!
//! The [`Engine`] owns the one active [`MapSource`] and the current
//! viewport. A viewport change runs the cycle Idle →
//! ComputingVisibleContainers → RequestingMissing → Idle: the intersecting
//! container set comes from the source's spatial index, already-loaded
//! containers are returned immediately for rendering, and missing ones are
//! enqueued for background fetch without blocking the caller. Fetch results
//! arrive on a completion channel drained by
//! [`Engine::process_completions`] on the coordination path.
//!
//! Switching the active source cancels all outstanding fetches of the
//! previous source (their results are silently discarded) and discards its
//! index.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::TileCache;
use crate::container::{ContainerId, ContainerKey, PixelBuffer, TileState};
use crate::download::FetchPriority;
use crate::geo::GeoArea;
use crate::source::{MapSource, SourceError};
use crate::telemetry::Metrics;

/// Coordination-path state of the engine, visible for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing to do.
    Idle,
    /// Intersecting the viewport with the spatial index.
    ComputingVisibleContainers,
    /// Dispatching fetches for missing containers.
    RequestingMissing,
}

/// The geographic area and zoom level currently requested by the rendering
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Geographic area on screen.
    pub area: GeoArea,
    /// Requested zoom level.
    pub zoom: u8,
}

struct Completion {
    generation: u64,
    key: ContainerKey,
    result: Result<Bytes, SourceError>,
}

/// Orchestrator owning the active source and current viewport.
///
/// All methods run on the single coordination path; they never block on
/// I/O — fetches are spawned onto the runtime and their completions drained
/// by [`Engine::process_completions`].
pub struct Engine {
    source: Arc<dyn MapSource>,
    cache: Arc<TileCache>,
    viewport: Option<Viewport>,
    state: EngineState,
    generation: u64,
    cancel: CancellationToken,
    pending: HashSet<ContainerKey>,
    pinned: Vec<String>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    metrics: Arc<Metrics>,
}

impl Engine {
    /// Creates an engine with its initial active source and cache.
    pub fn new(source: Arc<dyn MapSource>, cache: Arc<TileCache>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let metrics = cache.metrics();
        Self {
            source,
            cache,
            viewport: None,
            state: EngineState::Idle,
            generation: 0,
            cancel: CancellationToken::new(),
            pending: HashSet::new(),
            pinned: Vec::new(),
            completions_tx,
            completions_rx,
            metrics,
        }
    }

    /// The active source.
    pub fn source(&self) -> &Arc<dyn MapSource> {
        &self.source
    }

    /// The current viewport, if one has been set.
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Current coordination-path state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Number of fetches dispatched but not yet completed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pipeline metrics for this engine.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Sets the viewport and returns the containers that are already loaded
    /// so rendering can proceed with partial data.
    ///
    /// Missing containers are enqueued for background fetch; failed ones are
    /// skipped. Never blocks on I/O.
    #[instrument(skip(self), fields(zoom = viewport.zoom))]
    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<Vec<ContainerId>, SourceError> {
        self.state = EngineState::ComputingVisibleContainers;
        let ids = match self.source.containers_for(&viewport.area, viewport.zoom) {
            Ok(ids) => ids,
            Err(error) => {
                self.state = EngineState::Idle;
                return Err(error);
            }
        };
        self.viewport = Some(viewport);

        // Re-pin the cache entries backing the new viewport.
        let keys: Vec<String> = {
            let store = self.source.store().read();
            ids.iter()
                .filter_map(|id| store.get(*id).map(|c| c.key().cache_key()))
                .collect()
        };
        for key in &keys {
            self.cache.pin(key);
        }
        for old in std::mem::replace(&mut self.pinned, keys) {
            self.cache.unpin(&old);
        }

        self.state = EngineState::RequestingMissing;
        let mut loaded = Vec::new();
        let mut to_fetch = Vec::new();
        {
            let mut store = self.source.store().write();
            for id in ids {
                let Some(container) = store.get_mut(id) else {
                    continue;
                };
                match container.state() {
                    TileState::Loaded => loaded.push(id),
                    TileState::Failed => {}
                    TileState::Loading => {}
                    TileState::NotLoaded => {
                        let key = container.key();
                        if self.pending.contains(&key) {
                            continue;
                        }
                        for index in 0..container.tile_count() {
                            if let Some(tile) = container.tile_at_mut(index) {
                                tile.mark_loading();
                            }
                        }
                        to_fetch.push(key);
                    }
                }
            }
        }
        let requested = to_fetch.len();
        for key in to_fetch {
            self.dispatch_fetch(key, FetchPriority::Viewport);
        }
        debug!(
            loaded = loaded.len(),
            requested,
            pending = self.pending.len(),
            "viewport updated"
        );
        self.state = EngineState::Idle;
        Ok(loaded)
    }

    /// Spawns a background fetch for a container key.
    fn dispatch_fetch(&mut self, key: ContainerKey, priority: FetchPriority) {
        self.pending.insert(key);
        let source = Arc::clone(&self.source);
        let tx = self.completions_tx.clone();
        let token = self.cancel.child_token();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = source.fetch_payload(&key, priority, token).await;
            // The engine may be gone; nothing to do then.
            let _ = tx.send(Completion {
                generation,
                key,
                result,
            });
        });
    }

    /// Drains completed fetches, installing payloads into their containers.
    /// Returns the number of containers that became loaded.
    ///
    /// Call this from the coordination path, typically once per frame.
    pub fn process_completions(&mut self) -> usize {
        let mut newly_loaded = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if completion.generation != self.generation {
                // A fetch from a discarded source; its token was cancelled
                // and its result must not touch the current source.
                continue;
            }
            self.pending.remove(&completion.key);
            match completion.result {
                Ok(payload) => {
                    self.install_payload(&completion.key, payload);
                    newly_loaded += 1;
                }
                Err(SourceError::Download(crate::download::DownloadError::Cancelled)) => {
                    // Not a failure; the tile may be requested again later.
                    self.revert_to_not_loaded(&completion.key);
                }
                Err(error) => {
                    warn!(key = %completion.key, %error, "container load failed");
                    self.mark_failed(&completion.key);
                }
            }
        }
        newly_loaded
    }

    /// Installs a fetched payload into every tile of its container.
    ///
    /// The payload is one opaque encoded blob for the whole container; the
    /// tiles share it (cheap reference clones) and the rendering
    /// collaborator decodes and slices it.
    fn install_payload(&self, key: &ContainerKey, payload: Bytes) {
        let format = self.source.pixel_format();
        let mut store = self.source.store().write();
        let Some(id) = store.find(key) else {
            return;
        };
        let Some(container) = store.get_mut(id) else {
            return;
        };
        let (width, height) = (container.calibrator().width(), container.calibrator().height());
        for index in 0..container.tile_count() {
            if let Some(tile) = container.tile_at_mut(index) {
                tile.mark_loaded(PixelBuffer::new(width, height, format, payload.clone()));
            }
        }
        debug!(%key, bytes = payload.len(), "container loaded");
    }

    fn revert_to_not_loaded(&self, key: &ContainerKey) {
        let mut store = self.source.store().write();
        if let Some(id) = store.find(key) {
            if let Some(container) = store.get_mut(id) {
                container.invalidate();
            }
        }
    }

    fn mark_failed(&self, key: &ContainerKey) {
        let mut store = self.source.store().write();
        if let Some(id) = store.find(key) {
            if let Some(container) = store.get_mut(id) {
                container.mark_failed();
            }
        }
    }

    /// Clears a container's failure mark so it can be fetched again.
    pub fn invalidate(&mut self, key: &ContainerKey) {
        self.source.invalidate(key);
    }

    /// Switches the active source.
    ///
    /// Outstanding fetches of the previous source are cancelled — workers
    /// discard their results before committing — and the previous source's
    /// index and pins are discarded. The viewport is cleared; the caller
    /// sets it again against the new source.
    #[instrument(skip_all, fields(source = source.name()))]
    pub fn switch_source(&mut self, source: Arc<dyn MapSource>, cache: Arc<TileCache>) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;
        for key in self.pinned.drain(..) {
            self.cache.unpin(&key);
        }
        self.pending.clear();
        // Stale completions are dropped by the generation guard; drain what
        // is already queued to keep the channel small.
        while self.completions_rx.try_recv().is_ok() {}
        self.source = source;
        self.cache = cache;
        self.metrics = self.cache.metrics();
        self.viewport = None;
        self.state = EngineState::Idle;
        debug!("source switched");
    }
}
