use std::{path::PathBuf, time::Duration};

use crate::{
    config::Settings,
    error::SensorError,
    model_download::ensure_palm_model_ready,
    orchestrator::SensorSuite,
    presence::{CameraOpener, FacePresence, HandPresence},
    watch::{KeypointSource, TranscriptSource},
};

use super::{FaceModelPresence, NoFaceModel, PalmPresence, PoseStream, TranscriptStream, camera_opener};

#[derive(Clone, Debug)]
pub struct SuiteSettings {
    pub pose_command: String,
    pub wake_command: String,
    pub command_command: String,
    pub camera_index: u32,
    pub palm_model: PathBuf,
    pub face_model: Option<PathBuf>,
    /// How long to wait for a spoken command after the wake phrase.
    pub command_timeout: Duration,
}

impl From<&Settings> for SuiteSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            pose_command: settings.pose_command.clone(),
            wake_command: settings.wake_command.clone(),
            command_command: settings.command_command.clone(),
            camera_index: settings.camera_index,
            palm_model: settings.palm_model.clone(),
            face_model: settings.face_model.clone(),
            command_timeout: Duration::from_secs(8),
        }
    }
}

/// Real sensors: helper processes for pose and speech, the local camera and
/// ONNX presence models. Every handle is created fresh per request.
pub struct DeviceSuite {
    settings: SuiteSettings,
}

impl DeviceSuite {
    pub fn new(settings: SuiteSettings) -> Self {
        Self { settings }
    }

    /// Fetches the palm model up front so the first probe does not wait on
    /// the network.
    pub fn prepare(&self) -> anyhow::Result<()> {
        ensure_palm_model_ready(&self.settings.palm_model)
    }
}

impl SensorSuite for DeviceSuite {
    fn keypoints(&mut self) -> Result<Box<dyn KeypointSource>, SensorError> {
        Ok(Box::new(PoseStream::spawn(&self.settings.pose_command)?))
    }

    fn transcripts(&mut self) -> Result<Box<dyn TranscriptSource>, SensorError> {
        Ok(Box::new(TranscriptStream::spawn(
            &self.settings.wake_command,
        )?))
    }

    fn camera(&mut self) -> CameraOpener {
        camera_opener(self.settings.camera_index)
    }

    fn hand_presence(&mut self) -> Result<Box<dyn HandPresence>, SensorError> {
        let path = &self.settings.palm_model;
        ensure_palm_model_ready(path)
            .and_then(|()| PalmPresence::load(path))
            .map(|palm| Box::new(palm) as Box<dyn HandPresence>)
            .map_err(|err| SensorError::unavailable("hand detector", format!("{err:#}")))
    }

    fn face_presence(&mut self) -> Result<Box<dyn FacePresence>, SensorError> {
        match &self.settings.face_model {
            Some(path) => FaceModelPresence::load(path)
                .map(|face| Box::new(face) as Box<dyn FacePresence>)
                .map_err(|err| SensorError::unavailable("face detector", format!("{err:#}"))),
            None => Ok(Box::new(NoFaceModel)),
        }
    }

    fn listen_for_command(&mut self) -> Result<Option<String>, SensorError> {
        if self.settings.command_command.trim().is_empty() {
            return Ok(None);
        }
        let mut stream = TranscriptStream::spawn(&self.settings.command_command)?;
        stream.first_utterance(self.settings.command_timeout)
    }
}
