//! Abstract traits for the external collaborators.
//!
//! The pose pipeline and the image store live outside this crate. The engine
//! only sees them through these interfaces, so tests and the CLI can plug in
//! in-memory implementations (see `store.rs`).

use std::sync::Arc;

use super::frame::{FrameRecord, FrameVariant};
use super::ids::EntityId;

/// Sparse provider of ground-truth pose/mesh records.
///
/// Indices are in `[0, total_frames)` with holes wherever the detector
/// produced nothing.
pub trait FrameSource: Send + Sync {
    /// Record for `(entity, frame_idx)`, or None if the pipeline has none.
    fn fetch(&self, entity: EntityId, frame_idx: i32) -> Option<Arc<FrameRecord>>;

    /// All frame indices that have data for `entity`. Order is unspecified.
    fn available_frames(&self, entity: EntityId) -> Vec<i32>;
}

/// Byte-addressable store for original/overlay imagery.
pub trait VariantStore: Send + Sync {
    fn read(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Option<Arc<[u8]>>;
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn fetch(&self, entity: EntityId, frame_idx: i32) -> Option<Arc<FrameRecord>> {
        (**self).fetch(entity, frame_idx)
    }

    fn available_frames(&self, entity: EntityId) -> Vec<i32> {
        (**self).available_frames(entity)
    }
}

impl<T: VariantStore + ?Sized> VariantStore for Arc<T> {
    fn read(&self, entity: EntityId, frame_idx: i32, variant: FrameVariant) -> Option<Arc<[u8]>> {
        (**self).read(entity, frame_idx, variant)
    }
}
