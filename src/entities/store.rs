//! In-memory and on-disk implementations of the collaborator traits.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, trace};

use super::frame::{FrameRecord, FrameVariant};
use super::ids::EntityId;
use super::traits::{FrameSource, VariantStore};

/// Frame source backed by a map. Used by the loader and in tests.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: RwLock<HashMap<EntityId, BTreeMap<i32, Arc<FrameRecord>>>>,
}

impl MemoryFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. The record's own index is the key.
    pub fn insert(&self, entity: EntityId, record: FrameRecord) {
        let idx = record.frame_index;
        self.frames
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(entity)
            .or_default()
            .insert(idx, Arc::new(record));
    }

    pub fn extend(&self, entity: EntityId, records: impl IntoIterator<Item = FrameRecord>) {
        let mut frames = self.frames.write().unwrap_or_else(|e| e.into_inner());
        let per_entity = frames.entry(entity).or_default();
        for record in records {
            per_entity.insert(record.frame_index, Arc::new(record));
        }
    }

    pub fn remove_entity(&self, entity: EntityId) {
        self.frames.write().unwrap_or_else(|e| e.into_inner()).remove(&entity);
    }

    pub fn frame_count(&self, entity: EntityId) -> usize {
        self.frames
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity)
            .map(|f| f.len())
            .unwrap_or(0)
    }
}

impl FrameSource for MemoryFrameSource {
    fn fetch(&self, entity: EntityId, frame_idx: i32) -> Option<Arc<FrameRecord>> {
        self.frames
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity)
            .and_then(|f| f.get(&frame_idx))
            .cloned()
    }

    fn available_frames(&self, entity: EntityId) -> Vec<i32> {
        self.frames
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entity)
            .map(|f| f.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Variant bytes held in memory
#[derive(Debug, Default)]
pub struct MemoryVariantStore {
    blobs: RwLock<HashMap<(EntityId, i32, FrameVariant), Arc<[u8]>>>,
}

impl MemoryVariantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant, bytes: Vec<u8>) {
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((entity, frame_idx, variant), bytes.into());
    }
}

impl VariantStore for MemoryVariantStore {
    fn read(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Option<Arc<[u8]>> {
        self.blobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(entity, frame_idx, variant))
            .cloned()
    }
}

/// Variant store over a directory tree:
/// `{root}/{entity}/{variant}/{frame:06}.{ext}`
#[derive(Debug, Clone)]
pub struct DirVariantStore {
    root: PathBuf,
    extension: String,
}

impl DirVariantStore {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frame_path(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> PathBuf {
        self.root
            .join(entity.to_string())
            .join(variant.as_str())
            .join(format!("{:06}.{}", frame_idx, self.extension))
    }
}

impl VariantStore for DirVariantStore {
    fn read(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Option<Arc<[u8]>> {
        if frame_idx < 0 {
            return None;
        }
        let path = self.frame_path(entity, frame_idx, variant);
        match std::fs::read(&path) {
            Ok(bytes) => {
                trace!("Read {} bytes from {}", bytes.len(), path.display());
                Some(bytes.into())
            }
            Err(e) => {
                debug!("Variant {} missing at {}: {}", variant.as_str(), path.display(), e);
                None
            }
        }
    }
}
