use std::time::{Duration, Instant};

use crate::types::{KeypointFrame, LEFT_HIP, LEFT_SHOULDER, RIGHT_HIP, RIGHT_SHOULDER};

const MIN_DT_SECS: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TriggerRule {
    /// Sudden hip drop: a shock jump, or a fast descent past mid-frame.
    HipDrop,
    /// Fast hip descent while the torso leans past `tilt_degrees`. Needs
    /// both shoulders in view.
    TorsoTilt,
}

#[derive(Clone, Debug)]
pub struct FallConfig {
    pub min_visibility: f32,
    /// Hip descent rate in normalized units per second.
    pub drop_velocity: f32,
    pub shock_delta: f32,
    pub shock_window: Duration,
    pub mid_frame_hip_y: f32,
    pub low_hip_y: f32,
    pub tilt_degrees: f32,
    pub confirm_dwell: Duration,
    pub decay_grace: Duration,
    pub trigger: TriggerRule,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            min_visibility: 0.5,
            drop_velocity: 0.70,
            shock_delta: 0.12,
            shock_window: Duration::from_millis(300),
            mid_frame_hip_y: 0.5,
            low_hip_y: 0.75,
            tilt_degrees: 55.0,
            confirm_dwell: Duration::from_millis(600),
            decay_grace: Duration::from_millis(250),
            trigger: TriggerRule::HipDrop,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallState {
    Ok,
    PossibleFall,
    FallConfirmed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    LowVisibility,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FallDiagnostics {
    pub state: FallState,
    pub hip_y: Option<f32>,
    pub hip_velocity: f32,
    pub torso_angle: Option<f32>,
    pub fast_drop: bool,
    pub shock_drop: bool,
    pub low_to_ground: bool,
    pub torso_tilted: bool,
    pub reason: Option<SkipReason>,
}

impl FallDiagnostics {
    fn skipped(state: FallState, reason: SkipReason) -> Self {
        Self {
            state,
            hip_y: None,
            hip_velocity: 0.0,
            torso_angle: None,
            fast_drop: false,
            shock_drop: false,
            low_to_ground: false,
            torso_tilted: false,
            reason: Some(reason),
        }
    }
}

/// Three-state fall detector over a keypoint stream.
///
/// `FallConfirmed` is edge-triggered: it is reported once and the very next
/// usable observation returns the machine to `Ok`, whatever the posture.
/// Frames whose required joints are not visible advance the timestamp and
/// forget the last hip position, so motion is never measured across a gap.
pub struct FallStateMachine {
    config: FallConfig,
    state: FallState,
    trigger_time: Option<Instant>,
    /// When the trigger evidence was last seen to be absent, while still in
    /// `PossibleFall`.
    decay_since: Option<Instant>,
    prev_timestamp: Option<Instant>,
    prev_hip_y: Option<f32>,
}

impl FallStateMachine {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            state: FallState::Ok,
            trigger_time: None,
            decay_since: None,
            prev_timestamp: None,
            prev_hip_y: None,
        }
    }

    pub fn state(&self) -> FallState {
        self.state
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    pub fn update(&mut self, frame: &KeypointFrame, now: Instant) -> (bool, FallDiagnostics) {
        let floor = self.config.min_visibility;
        let hips = frame
            .visible(LEFT_HIP, floor)
            .zip(frame.visible(RIGHT_HIP, floor));
        let shoulders = frame
            .visible(LEFT_SHOULDER, floor)
            .zip(frame.visible(RIGHT_SHOULDER, floor));

        let shoulders_required = self.config.trigger == TriggerRule::TorsoTilt;
        let Some((left_hip, right_hip)) = hips.filter(|_| !shoulders_required || shoulders.is_some())
        else {
            self.prev_timestamp = Some(now);
            self.prev_hip_y = None;
            return (
                false,
                FallDiagnostics::skipped(self.state, SkipReason::LowVisibility),
            );
        };

        let hip_x = (left_hip.x + right_hip.x) / 2.0;
        let hip_y = (left_hip.y + right_hip.y) / 2.0;

        let dt = self
            .prev_timestamp
            .map(|prev| now.saturating_duration_since(prev).as_secs_f32())
            .unwrap_or(0.0)
            .max(MIN_DT_SECS);

        let hip_velocity = self
            .prev_hip_y
            .map(|prev| (hip_y - prev) / dt)
            .unwrap_or(0.0);

        let torso_angle = shoulders.map(|(ls, rs)| {
            let shoulder_x = (ls.x + rs.x) / 2.0;
            let shoulder_y = (ls.y + rs.y) / 2.0;
            (shoulder_x - hip_x).atan2(-(shoulder_y - hip_y)).to_degrees().abs()
        });

        let fast_drop = hip_velocity > self.config.drop_velocity;
        let shock_drop = match (self.prev_timestamp, self.prev_hip_y) {
            (Some(_), Some(prev)) => {
                dt <= self.config.shock_window.as_secs_f32() && hip_y - prev > self.config.shock_delta
            }
            _ => false,
        };
        let low_to_ground = hip_y > self.config.low_hip_y;
        let torso_tilted = torso_angle.is_some_and(|a| a > self.config.tilt_degrees);

        let mut fell = false;
        match self.state {
            FallState::Ok => {
                let triggered = match self.config.trigger {
                    TriggerRule::HipDrop => {
                        shock_drop || (fast_drop && hip_y > self.config.mid_frame_hip_y)
                    }
                    TriggerRule::TorsoTilt => fast_drop && torso_tilted,
                };
                if triggered {
                    log::debug!(
                        "fall state Ok -> PossibleFall (hip_y={hip_y:.3} vy={hip_velocity:.2} shock={shock_drop})"
                    );
                    self.state = FallState::PossibleFall;
                    self.trigger_time = Some(now);
                    self.decay_since = None;
                }
            }
            FallState::PossibleFall => {
                let since_trigger = self
                    .trigger_time
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                let posture_down = match self.config.trigger {
                    TriggerRule::HipDrop => low_to_ground,
                    TriggerRule::TorsoTilt => low_to_ground && torso_tilted,
                };
                let still_moving = fast_drop
                    || (self.config.trigger == TriggerRule::TorsoTilt && torso_tilted);

                if posture_down {
                    self.decay_since = None;
                    if since_trigger >= self.config.confirm_dwell {
                        log::debug!(
                            "fall state PossibleFall -> FallConfirmed after {since_trigger:?}"
                        );
                        self.state = FallState::FallConfirmed;
                        self.trigger_time = None;
                        fell = true;
                    }
                } else if !low_to_ground && !still_moving {
                    let decaying_for =
                        now.saturating_duration_since(*self.decay_since.get_or_insert(now));
                    if decaying_for >= self.config.decay_grace {
                        log::debug!("fall state PossibleFall -> Ok (evidence gone {decaying_for:?})");
                        self.state = FallState::Ok;
                        self.trigger_time = None;
                        self.decay_since = None;
                    }
                } else {
                    self.decay_since = None;
                }
            }
            FallState::FallConfirmed => {
                log::debug!("fall state FallConfirmed -> Ok");
                self.state = FallState::Ok;
            }
        }

        self.prev_timestamp = Some(now);
        self.prev_hip_y = Some(hip_y);

        (
            fell,
            FallDiagnostics {
                state: self.state,
                hip_y: Some(hip_y),
                hip_velocity,
                torso_angle,
                fast_drop,
                shock_drop,
                low_to_ground,
                torso_tilted,
                reason: None,
            },
        )
    }
}
