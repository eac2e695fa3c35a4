use rayon::prelude::*;

use crate::presence::CameraOpener;

/// Expands packed RGB into RGBA with an opaque alpha channel.
pub fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    rgb.par_chunks_exact(3)
        .flat_map_iter(|px| [px[0], px[1], px[2], 255])
        .collect()
}

#[cfg(feature = "camera-nokhwa")]
mod device {
    use std::time::Instant;

    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    };

    use super::rgb_to_rgba;
    use crate::{error::SensorError, presence::CameraSource, types::Frame};

    fn requested_formats() -> [RequestedFormat<'static>; 2] {
        [
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    pub struct NokhwaCamera {
        camera: Camera,
    }

    impl NokhwaCamera {
        pub fn open(index: u32) -> Result<Self, SensorError> {
            let mut last_err = None;
            for requested in requested_formats() {
                match Camera::new(CameraIndex::Index(index), requested) {
                    Ok(mut camera) => match camera.open_stream() {
                        Ok(()) => {
                            log::info!(
                                "camera {index} opened at {}",
                                camera.camera_format()
                            );
                            return Ok(Self { camera });
                        }
                        Err(err) => last_err = Some(err.to_string()),
                    },
                    Err(err) => last_err = Some(err.to_string()),
                }
            }
            Err(SensorError::unavailable(
                "camera",
                last_err.unwrap_or_else(|| format!("camera {index} rejected every format")),
            ))
        }
    }

    impl CameraSource for NokhwaCamera {
        fn next_frame(&mut self) -> Result<Option<Frame>, SensorError> {
            let buffer = self
                .camera
                .frame()
                .map_err(|err| SensorError::read("camera", err))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|err| SensorError::read("camera", err))?;

            let (width, height) = decoded.dimensions();
            let rgb = decoded.into_raw();
            if rgb.is_empty() {
                return Err(SensorError::read("camera", "empty frame"));
            }

            Ok(Some(Frame {
                rgba: rgb_to_rgba(&rgb),
                width,
                height,
                timestamp: Instant::now(),
            }))
        }
    }

    impl Drop for NokhwaCamera {
        fn drop(&mut self) {
            if let Err(err) = self.camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err}");
            }
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use device::NokhwaCamera;

/// Returns an opener that acquires the camera on whichever thread calls it.
#[cfg(feature = "camera-nokhwa")]
pub fn camera_opener(index: u32) -> CameraOpener {
    Box::new(move || {
        let camera = NokhwaCamera::open(index)?;
        Ok(Box::new(camera) as Box<dyn crate::presence::CameraSource>)
    })
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn camera_opener(index: u32) -> CameraOpener {
    Box::new(move || {
        Err(crate::error::SensorError::unavailable(
            "camera",
            format!("camera {index}: built without the camera-nokhwa feature"),
        ))
    })
}
