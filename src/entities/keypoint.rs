//! Body keypoints and skeleton topology.
//!
//! Upstream detectors emit COCO-17 ordered keypoints. Names are carried
//! through as strings when the detector provides them, indices otherwise.

use serde::{Deserialize, Serialize};

/// COCO-17 keypoint order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointName {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointName {
    pub const COUNT: usize = 17;

    const ALL: [KeypointName; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// Single detected keypoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keypoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    /// Detector confidence (0.0..=1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            name: None,
            index: None,
            x,
            y,
            z: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Keypoint tagged with its COCO name and index
    pub fn named(name: KeypointName, x: f32, y: f32, confidence: f32) -> Self {
        Self {
            name: Some(name.as_str().to_string()),
            index: Some(name as u32),
            ..Self::new(x, y, confidence)
        }
    }

    pub fn with_z(mut self, z: f32) -> Self {
        self.z = Some(z);
        self
    }

    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// Keypoint produced by the interpolator, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolatedKeypoint {
    #[serde(flatten)]
    pub keypoint: Keypoint,
    pub interpolated: bool,
    pub source_frames: [i32; 2],
    pub interpolation_factor: f32,
}

/// Bone list as pairs of keypoint indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Skeleton {
    pub edges: Vec<[u32; 2]>,
}

impl Skeleton {
    /// Standard COCO-17 limb connections
    pub fn coco17() -> Self {
        use KeypointName::*;
        let pairs = [
            (Nose, LeftEye),
            (Nose, RightEye),
            (LeftEye, LeftEar),
            (RightEye, RightEar),
            (LeftShoulder, RightShoulder),
            (LeftShoulder, LeftElbow),
            (LeftElbow, LeftWrist),
            (RightShoulder, RightElbow),
            (RightElbow, RightWrist),
            (LeftShoulder, LeftHip),
            (RightShoulder, RightHip),
            (LeftHip, RightHip),
            (LeftHip, LeftKnee),
            (LeftKnee, LeftAnkle),
            (RightHip, RightKnee),
            (RightKnee, RightAnkle),
        ];
        Self {
            edges: pairs.iter().map(|&(a, b)| [a as u32, b as u32]).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Neighbours of a keypoint index
    pub fn neighbors(&self, index: u32) -> Vec<u32> {
        self.edges
            .iter()
            .filter_map(|&[a, b]| {
                if a == index {
                    Some(b)
                } else if b == index {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }
}
