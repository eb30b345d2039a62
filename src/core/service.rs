//! Frame service: multi-entity front door over the interpolation engines
//!
//! One `InterpolationEngine` per loaded entity, all sharing one `FrameCache`
//! and one `CacheManager` epoch. Thread-safe: REST handlers and preload
//! workers call in concurrently while the tick loop owns the scheduler.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, info, trace};

use crate::core::event_bus::{EventBus, SubscriptionId};
use crate::core::frame_cache::{CacheKey, CacheStatsSnapshot, DEFAULT_PRELOAD_FRAMES, FrameCache};
use crate::core::orchestrator::{EngineStatistics, InterpolationEngine};
use crate::core::player_events::PlaybackEvent;
use crate::core::workers::Workers;
use crate::entities::{
    CacheValue, EntityId, FrameRecord, FrameSource, FrameVariant, FrameView, GapMap, LoadedTrack,
    VariantStore, ViewRequest,
};
use crate::error::{EngineError, EngineResult};

/// Engine plus the pipeline it reads from
struct EntitySession {
    engine: InterpolationEngine,
    source: Arc<dyn FrameSource>,
}

pub struct FrameService {
    sessions: RwLock<HashMap<EntityId, Arc<EntitySession>>>,
    cache: Arc<FrameCache>,
    variants: Option<Arc<dyn VariantStore>>,
    workers: Option<Workers>,
    preload_frames: usize,
}

impl std::fmt::Debug for FrameService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameService")
            .field("entities", &self.entity_count())
            .field("cache_len", &self.cache.len())
            .field("workers", &self.workers)
            .field("preload_frames", &self.preload_frames)
            .finish()
    }
}

impl FrameService {
    pub fn new(cache: Arc<FrameCache>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cache,
            variants: None,
            workers: None,
            preload_frames: DEFAULT_PRELOAD_FRAMES,
        }
    }

    pub fn with_variant_store(mut self, store: Arc<dyn VariantStore>) -> Self {
        self.variants = Some(store);
        self
    }

    /// Background pool for `preload_async`. Should share the cache manager's epoch.
    pub fn with_workers(mut self, workers: Workers) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_preload_frames(mut self, frames: usize) -> Self {
        self.preload_frames = frames;
        self
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn preload_frames(&self) -> usize {
        self.preload_frames
    }

    // === Entities ===

    /// Analyze `source_indices` and start serving `entity`. Replaces a
    /// previous registration, dropping its cached frames and any preloads
    /// still queued or running for it.
    pub fn register(
        &self,
        entity: EntityId,
        source: Arc<dyn FrameSource>,
        source_indices: &[i32],
        total_frames: i32,
        fps: f64,
    ) -> Arc<GapMap> {
        let mut engine = InterpolationEngine::new(entity, Arc::clone(&self.cache), fps);
        let map = engine.initialize(source_indices, total_frames);
        let session = Arc::new(EntitySession { engine, source });

        let previous = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity, session);
        if let Some(previous) = previous {
            let dropped = self.retire(&previous);
            debug!("Replaced entity {} ({} cached frames dropped)", entity, dropped);
        }
        map
    }

    /// Retire before clearing: once the cache lock has seen the flag, a
    /// worker still holding `session` can't write its frames back.
    fn retire(&self, session: &EntitySession) -> usize {
        session.engine.retire();
        self.cache.manager().increment_epoch();
        self.cache.clear_entity(session.engine.entity())
    }

    /// Register using whatever indices the source reports for `entity`.
    pub fn register_source(
        &self,
        entity: EntityId,
        source: Arc<dyn FrameSource>,
        total_frames: i32,
        fps: f64,
    ) -> Arc<GapMap> {
        let indices = source.available_frames(entity);
        self.register(entity, source, &indices, total_frames, fps)
    }

    /// Register a loaded pose track and warm the first frames.
    pub fn load_track(&self, track: &LoadedTrack) -> Arc<GapMap> {
        let source: Arc<dyn FrameSource> = track.source.clone();
        let map = self.register(track.entity, source, &track.source_indices, track.total_frames, track.fps);
        info!(
            "Loaded {}: {} frames, {} source, {} gaps",
            track.entity,
            map.total_frames,
            map.source_frame_count,
            map.gaps.len()
        );
        if let Err(e) = self.preload_async(track.entity, 0) {
            debug!("Initial preload for {} skipped: {}", track.entity, e);
        }
        map
    }

    /// Stop serving `entity`. Returns false if it was not loaded.
    pub fn unload(&self, entity: EntityId) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&entity);
        match removed {
            Some(session) => {
                let dropped = self.retire(&session);
                info!("Unloaded {} ({} cached frames dropped)", entity, dropped);
                true
            }
            None => false,
        }
    }

    pub fn entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn entity_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn session(&self, entity: EntityId) -> EngineResult<Arc<EntitySession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity)
            .cloned()
            .ok_or(EngineError::UnknownEntity(entity))
    }

    // === Frames ===

    pub fn get_frame(&self, entity: EntityId, frame_idx: i32) -> EngineResult<Option<Arc<FrameRecord>>> {
        let session = self.session(entity)?;
        session.engine.get_frame(frame_idx, session.source.as_ref())
    }

    /// Frames over `[start, end)`
    pub fn get_frame_range(&self, entity: EntityId, start: i32, end: i32) -> EngineResult<Vec<Arc<FrameRecord>>> {
        let session = self.session(entity)?;
        session.engine.get_frame_range(start, end, session.source.as_ref())
    }

    /// Original image plus whatever `request` asks for and exists.
    ///
    /// `Ok(None)` without an original image (no variant store, or the store
    /// has nothing for this frame). Missing overlay/mesh narrow the view.
    pub fn get_frame_view(
        &self,
        entity: EntityId,
        frame_idx: i32,
        request: ViewRequest,
    ) -> EngineResult<Option<FrameView>> {
        let session = self.session(entity)?;
        let total = session.engine.total_frames();
        if frame_idx < 0 || frame_idx >= total {
            return Err(EngineError::FrameOutOfRange { frame: frame_idx, total });
        }

        let Some(original) = self.variant_bytes(entity, frame_idx, FrameVariant::Original) else {
            trace!("No original image for {}:{}", entity, frame_idx);
            return Ok(None);
        };
        let overlay = if request.overlay {
            self.variant_bytes(entity, frame_idx, FrameVariant::Overlay)
        } else {
            None
        };
        let mesh = if request.mesh {
            session.engine.get_frame(frame_idx, session.source.as_ref())?
        } else {
            None
        };
        Ok(Some(FrameView::assemble(frame_idx, original, overlay, mesh)))
    }

    /// Image bytes through the cache, falling back to the variant store
    fn variant_bytes(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Option<Arc<[u8]>> {
        let key = CacheKey::new(entity, frame_idx, variant);
        if let Some(value) = self.cache.get(&key)
            && let Some(bytes) = value.as_bytes()
        {
            return Some(Arc::clone(bytes));
        }
        let bytes = self.variants.as_ref()?.read(entity, frame_idx, variant)?;
        self.cache.insert(key, CacheValue::Bytes(Arc::clone(&bytes)));
        Some(bytes)
    }

    // === Preload ===

    /// Warm the next `preload_frames` frames from `from` on this thread.
    pub fn preload(&self, entity: EntityId, from: i32) -> EngineResult<usize> {
        let session = self.session(entity)?;
        session.engine.preload(from, self.preload_frames, session.source.as_ref())
    }

    /// Warm the next frames on a worker. The job is dropped if a seek bumps
    /// the epoch before it runs. Runs inline when no pool is attached.
    pub fn preload_async(&self, entity: EntityId, from: i32) -> EngineResult<()> {
        let session = self.session(entity)?;
        let count = self.preload_frames;
        let Some(workers) = &self.workers else {
            session.engine.preload(from, count, session.source.as_ref())?;
            return Ok(());
        };

        let epoch = self.cache.manager().current_epoch();
        workers.execute_with_epoch(epoch, move || {
            match session.engine.preload(from, count, session.source.as_ref()) {
                Ok(written) => trace!("Preloaded {} frames of {} from {}", written, entity, from),
                Err(e) => debug!("Preload of {} from {} failed: {}", entity, from, e),
            }
        });
        Ok(())
    }

    /// Cancel queued preloads. Returns the new epoch.
    pub fn invalidate_preloads(&self) -> u64 {
        self.cache.manager().increment_epoch()
    }

    /// Cancel queued preloads whenever playback jumps.
    pub fn attach(&self, bus: &EventBus) -> SubscriptionId {
        let manager = Arc::clone(self.cache.manager());
        bus.subscribe(move |event: &PlaybackEvent| {
            if event.invalidates_preload() {
                let epoch = manager.increment_epoch();
                trace!("{} -> preload epoch {}", event.name(), epoch);
            }
        })
    }

    pub fn workers(&self) -> Option<&Workers> {
        self.workers.as_ref()
    }

    // === Stats ===

    pub fn gap_map(&self, entity: EntityId) -> EngineResult<Arc<GapMap>> {
        self.session(entity)?
            .engine
            .gap_map()
            .ok_or(EngineError::NotInitialized)
    }

    pub fn total_frames(&self, entity: EntityId) -> EngineResult<i32> {
        Ok(self.session(entity)?.engine.total_frames())
    }

    pub fn fps(&self, entity: EntityId) -> EngineResult<f64> {
        Ok(self.session(entity)?.engine.fps())
    }

    pub fn statistics(&self, entity: EntityId) -> EngineResult<EngineStatistics> {
        Ok(self.session(entity)?.engine.statistics())
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::CacheManager;
    use crate::entities::{Keypoint, MemoryFrameSource, MemoryVariantStore};
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;

    fn source_for(entity: EntityId, indices: &[i32]) -> Arc<MemoryFrameSource> {
        let source = Arc::new(MemoryFrameSource::new());
        for &i in indices {
            let kp = Keypoint::new(i as f32 * 10.0, 0.0, 1.0);
            source.insert(entity, FrameRecord::new(i, i as f64 * 100.0 / 3.0).with_keypoints(vec![kp]));
        }
        source
    }

    fn service() -> FrameService {
        FrameService::new(Arc::new(FrameCache::with_capacity(256)))
    }

    #[test]
    fn test_unknown_entity() {
        let svc = service();
        let err = svc.get_frame(EntityId::new(), 0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownEntity(_)));
    }

    #[test]
    fn test_serves_source_and_interpolated() {
        let svc = service();
        let entity = EntityId::new();
        let map = svc.register_source(entity, source_for(entity, &[0, 3, 7, 9]), 10, 30.0);
        assert_eq!(map.missing_frame_count, 6);

        let f0 = svc.get_frame(entity, 0).unwrap().unwrap();
        assert!(!f0.interpolated);
        let f1 = svc.get_frame(entity, 1).unwrap().unwrap();
        assert!(f1.interpolated);
        assert!((f1.keypoints[0].x - 10.0).abs() < 1e-4);

        let range = svc.get_frame_range(entity, 0, 10).unwrap();
        assert_eq!(range.len(), 10);
        assert!(svc.get_frame(entity, 10).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_entities_isolated() {
        let svc = service();
        let a = EntityId::new();
        let b = EntityId::new();
        svc.register_source(a, source_for(a, &[0, 4]), 5, 30.0);
        svc.register_source(b, source_for(b, &[1]), 3, 30.0);

        assert_eq!(svc.entity_count(), 2);
        assert_eq!(svc.total_frames(b).unwrap(), 3);
        svc.get_frame(a, 2).unwrap();
        svc.get_frame(b, 2).unwrap();

        assert!(svc.unload(a));
        assert!(!svc.unload(a));
        assert!(svc.get_frame(a, 0).is_err());
        assert!(svc.get_frame(b, 0).unwrap().is_some());
    }

    #[test]
    fn test_frame_view_shapes() {
        let store = Arc::new(MemoryVariantStore::new());
        let entity = EntityId::new();
        store.put(entity, 1, FrameVariant::Original, b"orig".to_vec());
        store.put(entity, 1, FrameVariant::Overlay, b"over".to_vec());
        store.put(entity, 2, FrameVariant::Original, b"orig2".to_vec());

        let svc = service().with_variant_store(store);
        svc.register_source(entity, source_for(entity, &[0, 3]), 4, 30.0);

        let full = svc.get_frame_view(entity, 1, ViewRequest::FULL).unwrap().unwrap();
        assert!(matches!(full, FrameView::Full { .. }));
        assert_eq!(full.overlay().unwrap().as_ref(), b"over".as_slice());
        assert!(full.mesh().unwrap().interpolated);

        // No overlay stored for frame 2: narrows to WithMesh
        let view = svc.get_frame_view(entity, 2, ViewRequest::FULL).unwrap().unwrap();
        assert!(matches!(view, FrameView::WithMesh { .. }));

        let plain = svc.get_frame_view(entity, 1, ViewRequest::ORIGINAL).unwrap().unwrap();
        assert!(matches!(plain, FrameView::OriginalOnly { .. }));

        // No original image at all
        assert!(svc.get_frame_view(entity, 0, ViewRequest::FULL).unwrap().is_none());
        assert!(svc.get_frame_view(entity, 4, ViewRequest::FULL).is_err());
    }

    #[test]
    fn test_variant_bytes_cached() {
        let store = Arc::new(MemoryVariantStore::new());
        let entity = EntityId::new();
        store.put(entity, 0, FrameVariant::Original, b"x".to_vec());
        let svc = service().with_variant_store(store);
        svc.register_source(entity, source_for(entity, &[0]), 1, 30.0);

        svc.get_frame_view(entity, 0, ViewRequest::ORIGINAL).unwrap();
        assert!(svc.cache().contains(&CacheKey::new(entity, 0, FrameVariant::Original)));
    }

    #[test]
    fn test_preload_gives_full_hit_rate() {
        let svc = service().with_preload_frames(10);
        let entity = EntityId::new();
        svc.register_source(entity, source_for(entity, &[0, 5, 10, 19]), 20, 30.0);

        assert_eq!(svc.preload(entity, 0).unwrap(), 10);
        for i in 0..10 {
            svc.get_frame(entity, i).unwrap();
        }
        assert_eq!(svc.statistics(entity).unwrap().cache_hit_rate, 1.0);
    }

    #[test]
    fn test_preload_async_on_workers() {
        let manager = Arc::new(CacheManager::unbounded());
        let cache = Arc::new(FrameCache::new(128, Duration::from_secs(60), Arc::clone(&manager)));
        let workers = Workers::new(2, manager.epoch_ref()).unwrap();
        let svc = FrameService::new(cache).with_workers(workers).with_preload_frames(5);
        let entity = EntityId::new();
        svc.register_source(entity, source_for(entity, &[0, 9]), 10, 30.0);

        svc.preload_async(entity, 8).unwrap();
        assert!(svc.workers().unwrap().wait_idle(Duration::from_secs(5)));
        // 8, 9, then wrap to 0, 1, 2
        for idx in [8, 9, 0, 1, 2] {
            let variant = if idx == 0 || idx == 9 {
                FrameVariant::SourceMesh
            } else {
                FrameVariant::InterpolatedMesh
            };
            assert!(svc.cache().contains(&CacheKey::new(entity, idx, variant)), "frame {}", idx);
        }
    }

    #[test]
    fn test_seek_cancels_queued_preload() {
        let manager = Arc::new(CacheManager::unbounded());
        let cache = Arc::new(FrameCache::new(128, Duration::from_secs(60), Arc::clone(&manager)));
        let bus = EventBus::new();
        let svc = FrameService::new(cache);
        svc.attach(&bus);

        let before = manager.current_epoch();
        bus.emit(PlaybackEvent::Play);
        assert_eq!(manager.current_epoch(), before);
        bus.emit(PlaybackEvent::Seek { time_ms: 0.0, frame_index: 0 });
        bus.emit(PlaybackEvent::Stop);
        assert_eq!(manager.current_epoch(), before + 2);
        assert_eq!(svc.invalidate_preloads(), before + 3);
    }

    #[test]
    fn test_reregister_drops_cached_frames() {
        let svc = service();
        let entity = EntityId::new();
        svc.register_source(entity, source_for(entity, &[0, 2]), 3, 30.0);
        svc.get_frame(entity, 1).unwrap();
        assert!(svc.cache().len() > 0);

        svc.register_source(entity, source_for(entity, &[0, 1, 2]), 3, 30.0);
        assert_eq!(svc.cache().len(), 0);
        assert_eq!(svc.gap_map(entity).unwrap().missing_frame_count, 0);
    }

    /// Source that parks the first fetch until the test lets it go
    struct GatedSource {
        inner: MemoryFrameSource,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl FrameSource for GatedSource {
        fn fetch(&self, entity: EntityId, frame_idx: i32) -> Option<Arc<FrameRecord>> {
            let first = self.entered.lock().unwrap().take();
            if let Some(entered) = first {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.fetch(entity, frame_idx)
        }

        fn available_frames(&self, entity: EntityId) -> Vec<i32> {
            self.inner.available_frames(entity)
        }
    }

    fn stamped(entity: EntityId, timestamp: f64) -> MemoryFrameSource {
        let source = MemoryFrameSource::new();
        source.extend(entity, (0..10).map(|i| FrameRecord::new(i, timestamp)));
        source
    }

    #[test]
    fn test_reload_during_preload_serves_new_frames() {
        let manager = Arc::new(CacheManager::unbounded());
        let cache = Arc::new(FrameCache::new(128, Duration::from_secs(60), Arc::clone(&manager)));
        let workers = Workers::new(1, manager.epoch_ref()).unwrap();
        let svc = FrameService::new(cache).with_workers(workers).with_preload_frames(5);
        let entity = EntityId::new();
        let indices: Vec<i32> = (0..10).collect();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let old = Arc::new(GatedSource {
            inner: stamped(entity, 1.0),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        svc.register(entity, old, &indices, 10, 30.0);
        svc.preload_async(entity, 0).unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The old job is mid-fetch while the entity is reloaded
        svc.register(entity, Arc::new(stamped(entity, 999.0)), &indices, 10, 30.0);
        release_tx.send(()).unwrap();
        assert!(svc.workers().unwrap().wait_idle(Duration::from_secs(5)));

        for idx in 0..5 {
            let frame = svc.get_frame(entity, idx).unwrap().unwrap();
            assert_eq!(frame.timestamp, 999.0, "frame {}", idx);
        }
    }

    #[test]
    fn test_unload_cancels_queued_preloads() {
        let svc = service();
        let entity = EntityId::new();
        svc.register_source(entity, source_for(entity, &[0, 4]), 5, 30.0);
        let before = svc.cache().manager().current_epoch();
        assert!(svc.unload(entity));
        assert_eq!(svc.cache().manager().current_epoch(), before + 1);
    }
}
