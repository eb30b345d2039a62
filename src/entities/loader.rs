//! Pose track ingestion.
//!
//! Reads the JSON document produced by the pose pipeline and turns it into a
//! sparse `MemoryFrameSource` plus the metadata the gap analyzer needs.
//!
//! Document layout (unknown fields are ignored):
//! ```json
//! { "frames": [ { "frameNumber": 0, "timestamp": 0.0,
//!                 "persons": [ { "personId": 0, "confidence": 0.9, "tracked": true,
//!                                "keypoints": [...], "meshVertices": [[x,y,z], ...],
//!                                "meshFaces": [[a,b,c], ...],
//!                                "camera": { "tx": 0, "ty": 0, "tz": 40, "focalLength": 5000 } } ] } ],
//!   "frameCount": 1, "totalFrames": 120, "fps": 30 }
//! ```
//! `timestamp` is in seconds. A person may carry `cropCamera` (`cam`, `boxCenter`,
//! `boxSize`, `imgSize`, optional `focalLength`) instead of `camera`.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use glam::{Vec2, Vec3};
use log::{debug, info, warn};
use serde::Deserialize;

use super::frame::FrameRecord;
use super::ids::EntityId;
use super::keypoint::{Keypoint, Skeleton};
use super::store::MemoryFrameSource;
use super::transform::{DEFAULT_FOCAL_LENGTH, cam_crop_to_full, flip_camera_x, flip_mesh_x180};
use crate::error::{EngineError, EngineResult};

/// Frame rate assumed when the document carries none
pub const DEFAULT_TRACK_FPS: f64 = 30.0;

/// Raw document. Frames stay untyped so one bad frame can't sink the load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseTrackDocument {
    #[serde(default)]
    pub frames: Vec<serde_json::Value>,
    #[serde(default)]
    pub frame_count: Option<usize>,
    #[serde(default)]
    pub total_frames: Option<i32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoseFrame {
    frame_number: i32,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    persons: Vec<PersonPose>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonPose {
    #[serde(default)]
    person_id: u32,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    tracked: bool,
    #[serde(default)]
    keypoints: Vec<Keypoint>,
    #[serde(default)]
    mesh_vertices: Vec<[f32; 3]>,
    #[serde(default)]
    mesh_faces: Vec<[u32; 3]>,
    #[serde(default)]
    camera: Option<CameraParams>,
    /// Weak-perspective camera on the detection crop, used when `camera` is absent
    #[serde(default)]
    crop_camera: Option<CropCamera>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraParams {
    tx: f32,
    ty: f32,
    tz: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropCamera {
    /// `[scale, tx, ty]` in crop space
    cam: [f32; 3],
    box_center: [f32; 2],
    box_size: f32,
    img_size: [f32; 2],
    #[serde(default)]
    focal_length: Option<f32>,
}

impl CropCamera {
    fn full_translation(&self) -> Vec3 {
        cam_crop_to_full(
            Vec3::from_array(self.cam),
            Vec2::from_array(self.box_center),
            self.box_size,
            Vec2::from_array(self.img_size),
            self.focal_length.unwrap_or(DEFAULT_FOCAL_LENGTH),
        )
    }
}

/// Ingestion knobs
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Person to follow; first person of each frame when None
    pub person_id: Option<u32>,
    /// Rotate mesh 180 degrees about X into a Y-up viewer space
    pub flip_mesh: bool,
    /// Mirror camera translation along X
    pub flip_camera: bool,
    /// Override the document's frame rate
    pub fps: Option<f64>,
    /// Frame rate when neither the override nor the document has one
    pub fallback_fps: Option<f64>,
    /// Override the document's frame count
    pub total_frames: Option<i32>,
}

/// Result of loading one pose track
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    pub entity: EntityId,
    pub total_frames: i32,
    pub fps: f64,
    pub source: Arc<MemoryFrameSource>,
    /// Ascending indices that carry ground truth
    pub source_indices: Vec<i32>,
    /// Frames dropped as malformed or without the selected person
    pub skipped_frames: usize,
}

impl PoseTrackDocument {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_reader(reader: impl Read) -> EngineResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let file = std::fs::File::open(path)?;
        let doc = Self::from_reader(std::io::BufReader::new(file))?;
        debug!("Read pose track {} ({} frames)", path.display(), doc.frames.len());
        Ok(doc)
    }

    /// Convert into a frame source under a fresh entity id.
    pub fn into_track(self, opts: &LoadOptions) -> EngineResult<LoadedTrack> {
        self.into_track_for(EntityId::new(), opts)
    }

    pub fn into_track_for(self, entity: EntityId, opts: &LoadOptions) -> EngineResult<LoadedTrack> {
        let fps = opts
            .fps
            .or(self.fps)
            .or(opts.fallback_fps)
            .unwrap_or(DEFAULT_TRACK_FPS);
        if !fps.is_finite() || fps <= 0.0 {
            return Err(EngineError::invalid_config(format!("fps must be positive, got {}", fps)));
        }

        let skeleton = Skeleton::coco17();
        let source = Arc::new(MemoryFrameSource::new());
        let mut records = Vec::with_capacity(self.frames.len());
        let mut skipped = 0usize;

        for (pos, raw) in self.frames.into_iter().enumerate() {
            let frame: PoseFrame = match serde_json::from_value(raw) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Skipping malformed frame at position {}: {}", pos, e);
                    skipped += 1;
                    continue;
                }
            };
            if frame.frame_number < 0 || frame.frame_number.checked_add(1).is_none() {
                warn!("Skipping frame with out-of-range index {}", frame.frame_number);
                skipped += 1;
                continue;
            }
            let person = match opts.person_id {
                Some(id) => frame.persons.iter().find(|p| p.person_id == id),
                None => frame.persons.first(),
            };
            let Some(person) = person else {
                debug!("Frame {} has no matching person", frame.frame_number);
                skipped += 1;
                continue;
            };
            records.push(to_record(&frame, person, fps, opts, &skeleton));
        }

        // Timestamps must be non-decreasing in index order
        records.sort_by_key(|r| r.frame_index);
        let source_indices: Vec<i32> = {
            let mut idx: Vec<i32> = records.iter().map(|r| r.frame_index).collect();
            idx.dedup();
            idx
        };

        let inferred = source_indices.last().map_or(0, |last| last + 1);
        let total_frames = match opts.total_frames.or(self.total_frames) {
            Some(declared) if declared < inferred => {
                warn!(
                    "Declared frame count {} is below last source frame {}, using {}",
                    declared,
                    inferred - 1,
                    inferred
                );
                inferred
            }
            Some(declared) => declared,
            None => inferred,
        };

        source.extend(entity, records);
        info!(
            "Loaded pose track {}: {} source frames of {} ({} skipped) @ {} fps",
            entity,
            source_indices.len(),
            total_frames,
            skipped,
            fps
        );

        Ok(LoadedTrack {
            entity,
            total_frames,
            fps,
            source,
            source_indices,
            skipped_frames: skipped,
        })
    }
}

fn to_record(
    frame: &PoseFrame,
    person: &PersonPose,
    fps: f64,
    opts: &LoadOptions,
    skeleton: &Skeleton,
) -> FrameRecord {
    let timestamp_ms = match frame.timestamp {
        Some(secs) if secs.is_finite() => secs * 1000.0,
        _ => frame.frame_number as f64 * 1000.0 / fps,
    };

    let mut vertices: Vec<Vec3> = person.mesh_vertices.iter().map(|&v| Vec3::from_array(v)).collect();
    if opts.flip_mesh {
        flip_mesh_x180(&mut vertices);
    }

    let mut record = FrameRecord::new(frame.frame_number, timestamp_ms)
        .with_keypoints(person.keypoints.clone())
        .with_mesh(vertices, person.mesh_faces.clone())
        .with_skeleton(skeleton.clone());

    let translation = person
        .camera
        .map(|cam| Vec3::new(cam.tx, cam.ty, cam.tz))
        .or_else(|| person.crop_camera.map(|crop| crop.full_translation()));
    if let Some(t) = translation {
        record = record.with_camera(if opts.flip_camera { flip_camera_x(t) } else { t });
    }
    if !person.tracked && person.confidence > 0.0 {
        debug!(
            "Frame {} person {} untracked (conf {:.2})",
            frame.frame_number, person.person_id, person.confidence
        );
    }
    record
}

/// Read and convert a pose track file in one go.
pub fn load_track(path: &Path, opts: &LoadOptions) -> EngineResult<LoadedTrack> {
    PoseTrackDocument::load(path)?.into_track(opts)
}
