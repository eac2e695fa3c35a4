use crate::{
    error::SensorError,
    fall::{FallState, FallStateMachine},
    race::Detector,
    signal::StopSignal,
};

use super::{KeypointSource, READ_SLICE};

/// Fall side of the race: feeds poses into a fresh state machine until a fall
/// is confirmed.
pub struct FallWatcher {
    source: Box<dyn KeypointSource>,
    machine: FallStateMachine,
}

impl FallWatcher {
    pub fn new(source: Box<dyn KeypointSource>, machine: FallStateMachine) -> Self {
        Self { source, machine }
    }

    pub fn state(&self) -> FallState {
        self.machine.state()
    }
}

impl Detector for FallWatcher {
    fn run(&mut self, stop: &StopSignal) -> Result<bool, SensorError> {
        let mut frames = 0u64;
        while !stop.is_stopped() {
            let Some(frame) = self.source.next_frame(READ_SLICE)? else {
                continue;
            };
            if stop.is_stopped() {
                break;
            }

            frames += 1;
            let (fell, info) = self.machine.update(&frame, frame.timestamp);
            if let Some(reason) = info.reason {
                log::trace!("pose frame skipped: {reason:?}");
                continue;
            }

            log::trace!(
                "{:?} hip_y={:.3} vy={:.2} angle={:?}",
                info.state,
                info.hip_y.unwrap_or_default(),
                info.hip_velocity,
                info.torso_angle
            );

            if fell {
                log::info!(
                    "fall detected after {frames} frames: vy={:.2} angle={:?}",
                    info.hip_velocity,
                    info.torso_angle
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
