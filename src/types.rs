use std::{fmt, sync::Arc, time::Instant};

use serde::Deserialize;

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const POSE_LANDMARK_COUNT: usize = 33;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

pub type SharedFrame = Arc<Frame>;

/// A single normalized landmark. `visibility == None` means the pose model
/// did not report a confidence, which is treated as fully visible.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub visibility: Option<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn is_visible(&self, floor: f32) -> bool {
        self.visibility.is_none_or(|v| v >= floor)
    }
}

/// Landmarks indexed by BlazePose id, captured at `timestamp`.
#[derive(Clone, Debug)]
pub struct KeypointFrame {
    pub landmarks: Vec<Keypoint>,
    pub timestamp: Instant,
}

impl KeypointFrame {
    pub fn new(landmarks: Vec<Keypoint>, timestamp: Instant) -> Self {
        Self {
            landmarks,
            timestamp,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Keypoint> {
        self.landmarks.get(index)
    }

    /// Returns the landmark only if it exists and clears the visibility floor.
    pub fn visible(&self, index: usize, floor: f32) -> Option<&Keypoint> {
        self.get(index).filter(|kp| kp.is_visible(floor))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    Wake,
    Fall,
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Wake => "wake",
            Trigger::Fall => "fall",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceObservation {
    pub detected: bool,
    pub recognized_id: Option<String>,
    pub confidence: Option<f32>,
}

impl FaceObservation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn detected() -> Self {
        Self {
            detected: true,
            ..Self::default()
        }
    }

    pub fn recognized(id: impl Into<String>, confidence: f32) -> Self {
        Self {
            detected: true,
            recognized_id: Some(id.into()),
            confidence: Some(confidence),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    Both,
    HandOnly,
    FaceOnly,
    Neither,
}

impl PresenceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PresenceStatus::Both => "both",
            PresenceStatus::HandOnly => "hand_only",
            PresenceStatus::FaceOnly => "face_only",
            PresenceStatus::Neither => "neither",
        }
    }

    pub fn is_responsive(&self) -> bool {
        !matches!(self, PresenceStatus::Neither)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresenceResult {
    pub saw_hand: bool,
    pub saw_face: bool,
    pub recognized_id: Option<String>,
}

impl PresenceResult {
    pub fn status(&self) -> PresenceStatus {
        match (self.saw_hand, self.saw_face) {
            (true, true) => PresenceStatus::Both,
            (true, false) => PresenceStatus::HandOnly,
            (false, true) => PresenceStatus::FaceOnly,
            (false, false) => PresenceStatus::Neither,
        }
    }
}
