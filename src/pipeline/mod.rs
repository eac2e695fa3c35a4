pub mod camera;
pub mod line_process;
pub mod presence_model;
pub mod suite;

pub use camera::camera_opener;
pub use line_process::{PoseStream, TranscriptStream};
pub use presence_model::{FaceModelPresence, NoFaceModel, PalmPresence};
pub use suite::{DeviceSuite, SuiteSettings};
