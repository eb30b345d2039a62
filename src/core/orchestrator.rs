//! Interpolation orchestrator
//!
//! Serves any frame index of one entity: source frames verbatim, missing
//! frames synthesized from their brackets. Every result is memoized in the
//! shared `FrameCache` under the entity's key space.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::core::frame_cache::{CacheKey, FrameCache};
use crate::core::gap_analyzer::{
    analyze, find_gap_for_frame, interpolation_factor, source_frames_for_interpolation,
};
use crate::core::interp_keypoints::{duplicate_keypoints, interpolate_frame};
use crate::core::interp_mesh::{duplicate_mesh, interpolate_mesh};
use crate::entities::{
    CacheValue, EntityId, FrameRecord, FrameSource, FrameVariant, GapMap, InterpolatedKeypoint,
};
use crate::error::{EngineError, EngineResult};

/// Summary of one entity's interpolation state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    pub entity: EntityId,
    pub total_frames: i32,
    pub source_frames: usize,
    pub interpolated_frames: usize,
    pub gap_count: usize,
    pub interpolation_percentage: f64,
    pub cache_hit_rate: f64,
    pub interpolations_computed: u64,
    pub average_interpolation_time_ms: f64,
}

#[derive(Debug)]
pub struct InterpolationEngine {
    entity: EntityId,
    cache: Arc<FrameCache>,
    fps: f64,
    gap_map: Option<Arc<GapMap>>,
    interp_nanos: AtomicU64,
    interp_count: AtomicU64,
    /// Set once a newer registration replaces this engine; blocks cache writes
    retired: AtomicBool,
}

impl InterpolationEngine {
    pub fn new(entity: EntityId, cache: Arc<FrameCache>, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            entity,
            cache,
            fps,
            gap_map: None,
            interp_nanos: AtomicU64::new(0),
            interp_count: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Analyze the source layout. Replaces any previous gap map.
    pub fn initialize(&mut self, source_indices: &[i32], total_frames: i32) -> Arc<GapMap> {
        if self.gap_map.is_some() {
            self.cache.clear_entity(self.entity);
        }
        let map = Arc::new(analyze(source_indices, total_frames));
        info!(
            "Interpolation engine {}: {} frames, {} source, {:.1}% interpolated",
            self.entity,
            map.total_frames,
            map.source_frame_count,
            map.interpolation_percentage()
        );
        self.gap_map = Some(Arc::clone(&map));
        map
    }

    /// Forget the gap map, cached frames and timings.
    pub fn reset(&mut self) {
        self.gap_map = None;
        self.cache.clear_entity(self.entity);
        self.interp_nanos.store(0, Ordering::Relaxed);
        self.interp_count.store(0, Ordering::Relaxed);
        debug!("Interpolation engine {} reset", self.entity);
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn is_initialized(&self) -> bool {
        self.gap_map.is_some()
    }

    pub fn gap_map(&self) -> Option<Arc<GapMap>> {
        self.gap_map.clone()
    }

    pub fn total_frames(&self) -> i32 {
        self.gap_map.as_ref().map_or(0, |m| m.total_frames)
    }

    /// Stop publishing into the shared cache. Frames are still built and
    /// returned, so in-flight readers finish, but nothing they produce can
    /// outlive the engine's replacement.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn map(&self) -> EngineResult<&Arc<GapMap>> {
        self.gap_map.as_ref().ok_or(EngineError::NotInitialized)
    }

    fn key_for(&self, map: &GapMap, frame_idx: i32) -> CacheKey {
        let variant = if map.is_source(frame_idx) {
            FrameVariant::SourceMesh
        } else {
            FrameVariant::InterpolatedMesh
        };
        CacheKey::new(self.entity, frame_idx, variant)
    }

    /// Frame at `frame_idx`, from cache or freshly built.
    ///
    /// `Ok(None)` when the frame has no usable brackets. Indices outside
    /// `[0, total_frames)` are an error, never clamped.
    pub fn get_frame(
        &self,
        frame_idx: i32,
        source: &dyn FrameSource,
    ) -> EngineResult<Option<Arc<FrameRecord>>> {
        let map = self.map()?;
        if !map.in_range(frame_idx) {
            return Err(EngineError::FrameOutOfRange {
                frame: frame_idx,
                total: map.total_frames,
            });
        }

        let key = self.key_for(map, frame_idx);
        if let Some(value) = self.cache.get(&key)
            && let Some(record) = value.as_record()
        {
            trace!("Frame {}:{} from cache", self.entity, frame_idx);
            return Ok(Some(Arc::clone(record)));
        }

        let Some(record) = self.produce(map, frame_idx, source) else {
            return Ok(None);
        };
        self.cache
            .insert_unless(key, CacheValue::Record(Arc::clone(&record)), &self.retired);
        Ok(Some(record))
    }

    /// Frames over `[start, end)`, skipping the ones that can't be built.
    ///
    /// Both bounds must lie in `[0, total_frames]`; an empty or inverted
    /// range yields no frames.
    pub fn get_frame_range(
        &self,
        start: i32,
        end: i32,
        source: &dyn FrameSource,
    ) -> EngineResult<Vec<Arc<FrameRecord>>> {
        let total = self.map()?.total_frames;
        for bound in [start, end] {
            if !(0..=total).contains(&bound) {
                return Err(EngineError::FrameOutOfRange { frame: bound, total });
            }
        }
        let mut out = Vec::with_capacity(end.saturating_sub(start).max(0) as usize);
        for idx in start..end {
            if let Some(record) = self.get_frame(idx, source)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Warm the cache for `count` frames from `from` onwards, wrapping at the end.
    ///
    /// Does not count towards hit/miss statistics. Returns frames written.
    pub fn preload(&self, from: i32, count: usize, source: &dyn FrameSource) -> EngineResult<usize> {
        let map = self.map()?;
        let total = map.total_frames;
        if total <= 0 || count == 0 {
            return Ok(0);
        }
        let count = count.min(total as usize) as i32;
        let keys: Vec<CacheKey> = (0..count)
            .map(|k| (from + k).rem_euclid(total))
            .map(|idx| self.key_for(map, idx))
            .collect();

        let written = self.cache.preload_unless(keys, &self.retired, |key| {
            self.produce(map, key.frame_idx, source).map(CacheValue::Record)
        });
        Ok(written)
    }

    /// Source record or synthesized record, uncached.
    fn produce(&self, map: &GapMap, frame_idx: i32, source: &dyn FrameSource) -> Option<Arc<FrameRecord>> {
        if map.is_source(frame_idx) {
            let Some(record) = source.fetch(self.entity, frame_idx) else {
                warn!("Source frame {}:{} missing from the pipeline", self.entity, frame_idx);
                return None;
            };
            if record.interpolated {
                let mut owned = (*record).clone();
                owned.interpolated = false;
                return Some(Arc::new(owned));
            }
            return Some(record);
        }
        self.synthesize(map, frame_idx, source).map(Arc::new)
    }

    fn synthesize(&self, map: &GapMap, frame_idx: i32, source: &dyn FrameSource) -> Option<FrameRecord> {
        let Some(bracket) = source_frames_for_interpolation(frame_idx, &map.gaps, &map.source_indices) else {
            warn!("No brackets for frame {}:{}", self.entity, frame_idx);
            return None;
        };
        let (Some(before), Some(after)) = (
            source.fetch(self.entity, bracket.before),
            source.fetch(self.entity, bracket.after),
        ) else {
            warn!(
                "Bracket frames {}/{} for {}:{} not available",
                bracket.before, bracket.after, self.entity, frame_idx
            );
            return None;
        };

        let started = Instant::now();
        let t = find_gap_for_frame(frame_idx, &map.gaps)
            .map(|gap| interpolation_factor(frame_idx, gap))
            .unwrap_or(0.0);

        let (keypoints, mesh) = if bracket.is_frozen() {
            (duplicate_keypoints(&before.keypoints, bracket.before), duplicate_mesh(&before))
        } else {
            (
                interpolate_frame(&before.keypoints, &after.keypoints, t, bracket.before, bracket.after),
                interpolate_mesh(&before, &after, t),
            )
        };

        let skeleton = if before.skeleton.is_empty() {
            after.skeleton.clone()
        } else {
            before.skeleton.clone()
        };

        let record = FrameRecord {
            frame_index: frame_idx,
            timestamp: frame_idx as f64 * 1000.0 / self.fps,
            keypoints: keypoints.into_iter().map(|k: InterpolatedKeypoint| k.keypoint).collect(),
            mesh_vertices: mesh.vertices,
            mesh_faces: mesh.faces,
            camera_translation: mesh.camera_translation,
            skeleton,
            interpolated: true,
            source_frames: Some([bracket.before, bracket.after]),
            interpolation_factor: Some(t),
        };

        let nanos = started.elapsed().as_nanos() as u64;
        self.interp_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.interp_count.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Interpolated {}:{} from {}..{} at t={:.3}",
            self.entity, frame_idx, bracket.before, bracket.after, t
        );
        Some(record)
    }

    pub fn statistics(&self) -> EngineStatistics {
        let count = self.interp_count.load(Ordering::Relaxed);
        let nanos = self.interp_nanos.load(Ordering::Relaxed);
        let average_interpolation_time_ms = if count == 0 {
            0.0
        } else {
            nanos as f64 / count as f64 / 1_000_000.0
        };
        let (total_frames, source_frames, interpolated_frames, gap_count, pct) = match &self.gap_map {
            Some(m) => (
                m.total_frames,
                m.source_frame_count,
                m.missing_frame_count,
                m.gaps.len(),
                m.interpolation_percentage(),
            ),
            None => (0, 0, 0, 0, 0.0),
        };
        EngineStatistics {
            entity: self.entity,
            total_frames,
            source_frames,
            interpolated_frames,
            gap_count,
            interpolation_percentage: pct,
            cache_hit_rate: self.cache.stats().hit_rate,
            interpolations_computed: count,
            average_interpolation_time_ms,
        }
    }

    /// Drop this entity's cached frames. The gap map stays.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear_entity(self.entity)
    }
}
