//! Frame records, cache values and typed frame views.
//!
//! A `FrameRecord` is either taken verbatim from the pose pipeline or
//! synthesized by the interpolator. Both flavours share one struct; the
//! `interpolated` flag and the provenance fields tell them apart.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::keypoint::{Keypoint, Skeleton};

/// One logical frame of pose + mesh data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub frame_index: i32,
    /// Presentation time in milliseconds
    pub timestamp: f64,
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
    #[serde(default)]
    pub mesh_vertices: Vec<Vec3>,
    #[serde(default)]
    pub mesh_faces: Vec<[u32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_translation: Option<Vec3>,
    #[serde(default)]
    pub skeleton: Skeleton,
    #[serde(default)]
    pub interpolated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_frames: Option<[i32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation_factor: Option<f32>,
}

impl FrameRecord {
    /// Empty source record at the given index
    pub fn new(frame_index: i32, timestamp: f64) -> Self {
        Self {
            frame_index,
            timestamp,
            keypoints: Vec::new(),
            mesh_vertices: Vec::new(),
            mesh_faces: Vec::new(),
            camera_translation: None,
            skeleton: Skeleton::default(),
            interpolated: false,
            source_frames: None,
            interpolation_factor: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = keypoints;
        self
    }

    pub fn with_mesh(mut self, vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Self {
        self.mesh_vertices = vertices;
        self.mesh_faces = faces;
        self
    }

    pub fn with_camera(mut self, translation: Vec3) -> Self {
        self.camera_translation = Some(translation);
        self
    }

    pub fn with_skeleton(mut self, skeleton: Skeleton) -> Self {
        self.skeleton = skeleton;
        self
    }

    pub fn has_mesh(&self) -> bool {
        !self.mesh_vertices.is_empty()
    }

    /// Approximate heap footprint in bytes (cache memory accounting)
    pub fn mem(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.keypoints.len() * std::mem::size_of::<Keypoint>()
            + self
                .keypoints
                .iter()
                .map(|k| k.name.as_ref().map_or(0, |n| n.len()))
                .sum::<usize>()
            + self.mesh_vertices.len() * std::mem::size_of::<Vec3>()
            + self.mesh_faces.len() * std::mem::size_of::<[u32; 3]>()
            + self.skeleton.edges.len() * std::mem::size_of::<[u32; 2]>()
    }
}

/// What a cache entry holds for a given frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameVariant {
    /// Ground-truth pose/mesh record from the pipeline
    SourceMesh,
    /// Record synthesized to fill a gap
    InterpolatedMesh,
    /// Original video frame bytes
    Original,
    /// Rendered mesh-overlay frame bytes
    Overlay,
}

impl FrameVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceMesh => "source_mesh",
            Self::InterpolatedMesh => "interpolated_mesh",
            Self::Original => "original",
            Self::Overlay => "overlay",
        }
    }

    /// Byte variants live in the variant store, record variants in the orchestrator
    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Original | Self::Overlay)
    }
}

/// Value published into the frame cache. Cloning is cheap (Arc).
#[derive(Debug, Clone)]
pub enum CacheValue {
    Record(Arc<FrameRecord>),
    Bytes(Arc<[u8]>),
}

impl CacheValue {
    pub fn mem(&self) -> usize {
        match self {
            CacheValue::Record(r) => r.mem(),
            CacheValue::Bytes(b) => b.len(),
        }
    }

    pub fn as_record(&self) -> Option<&Arc<FrameRecord>> {
        match self {
            CacheValue::Record(r) => Some(r),
            CacheValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Arc<[u8]>> {
        match self {
            CacheValue::Bytes(b) => Some(b),
            CacheValue::Record(_) => None,
        }
    }
}

impl From<FrameRecord> for CacheValue {
    fn from(record: FrameRecord) -> Self {
        CacheValue::Record(Arc::new(record))
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(bytes.into())
    }
}

/// Which payloads a consumer wants alongside the original image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewRequest {
    pub overlay: bool,
    pub mesh: bool,
}

impl ViewRequest {
    pub const ORIGINAL: Self = Self { overlay: false, mesh: false };
    pub const FULL: Self = Self { overlay: true, mesh: true };
}

/// Frame as seen by a renderer. Each shape guarantees exactly its payloads.
#[derive(Debug, Clone)]
pub enum FrameView {
    OriginalOnly {
        frame_index: i32,
        original: Arc<[u8]>,
    },
    WithOverlay {
        frame_index: i32,
        original: Arc<[u8]>,
        overlay: Arc<[u8]>,
    },
    WithMesh {
        frame_index: i32,
        original: Arc<[u8]>,
        mesh: Arc<FrameRecord>,
    },
    Full {
        frame_index: i32,
        original: Arc<[u8]>,
        overlay: Arc<[u8]>,
        mesh: Arc<FrameRecord>,
    },
}

impl FrameView {
    /// Assemble the narrowest shape that holds what was found.
    pub fn assemble(
        frame_index: i32,
        original: Arc<[u8]>,
        overlay: Option<Arc<[u8]>>,
        mesh: Option<Arc<FrameRecord>>,
    ) -> Self {
        match (overlay, mesh) {
            (None, None) => FrameView::OriginalOnly { frame_index, original },
            (Some(overlay), None) => FrameView::WithOverlay { frame_index, original, overlay },
            (None, Some(mesh)) => FrameView::WithMesh { frame_index, original, mesh },
            (Some(overlay), Some(mesh)) => FrameView::Full { frame_index, original, overlay, mesh },
        }
    }

    /// camelCase name of the shape, for wire formats
    pub fn shape(&self) -> &'static str {
        match self {
            FrameView::OriginalOnly { .. } => "originalOnly",
            FrameView::WithOverlay { .. } => "withOverlay",
            FrameView::WithMesh { .. } => "withMesh",
            FrameView::Full { .. } => "full",
        }
    }

    pub fn frame_index(&self) -> i32 {
        match self {
            FrameView::OriginalOnly { frame_index, .. }
            | FrameView::WithOverlay { frame_index, .. }
            | FrameView::WithMesh { frame_index, .. }
            | FrameView::Full { frame_index, .. } => *frame_index,
        }
    }

    pub fn original(&self) -> &Arc<[u8]> {
        match self {
            FrameView::OriginalOnly { original, .. }
            | FrameView::WithOverlay { original, .. }
            | FrameView::WithMesh { original, .. }
            | FrameView::Full { original, .. } => original,
        }
    }

    pub fn overlay(&self) -> Option<&Arc<[u8]>> {
        match self {
            FrameView::WithOverlay { overlay, .. } | FrameView::Full { overlay, .. } => Some(overlay),
            _ => None,
        }
    }

    pub fn mesh(&self) -> Option<&Arc<FrameRecord>> {
        match self {
            FrameView::WithMesh { mesh, .. } | FrameView::Full { mesh, .. } => Some(mesh),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_uses_camel_case() {
        let rec = FrameRecord::new(4, 133.3)
            .with_mesh(vec![Vec3::new(1.0, 2.0, 3.0)], vec![[0, 0, 0]])
            .with_camera(Vec3::new(0.0, 0.5, 20.0));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["frameIndex"], 4);
        assert_eq!(json["meshVertices"][0][2], 3.0);
        assert_eq!(json["interpolated"], false);
        assert!(json.get("sourceFrames").is_none());

        let back: FrameRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_mem_grows_with_mesh() {
        let small = FrameRecord::new(0, 0.0);
        let big = FrameRecord::new(0, 0.0).with_mesh(vec![Vec3::ZERO; 6890], vec![[0, 1, 2]; 13776]);
        assert!(big.mem() > small.mem() + 6890 * 12);
        assert!(CacheValue::from(big).mem() > 0);
    }

    #[test]
    fn test_view_assembles_narrowest_shape() {
        let original: Arc<[u8]> = vec![1u8, 2, 3].into();
        let mesh = Arc::new(FrameRecord::new(2, 66.0));

        let view = FrameView::assemble(2, original.clone(), None, Some(mesh.clone()));
        assert!(matches!(view, FrameView::WithMesh { .. }));
        assert!(view.overlay().is_none());
        assert_eq!(view.mesh().unwrap().frame_index, 2);

        let view = FrameView::assemble(2, original.clone(), Some(original.clone()), Some(mesh));
        assert!(matches!(view, FrameView::Full { .. }));
        assert_eq!(view.original().len(), 3);

        let view = FrameView::assemble(7, original, None, None);
        assert!(matches!(view, FrameView::OriginalOnly { frame_index: 7, .. }));
    }

    #[test]
    fn test_variant_kinds() {
        assert!(FrameVariant::Original.is_bytes());
        assert!(FrameVariant::Overlay.is_bytes());
        assert!(!FrameVariant::SourceMesh.is_bytes());
        assert_eq!(FrameVariant::InterpolatedMesh.as_str(), "interpolated_mesh");
    }
}
