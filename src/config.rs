use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    fall::{FallConfig, TriggerRule},
    orchestrator::OrchestratorSettings,
    presence::PresenceOptions,
    watch::WakePhrase,
};

pub const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 5;
pub const DEFAULT_PROBE_SECONDS: f32 = 3.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be positive, got {value}")]
    NotPositive { key: &'static str, value: f32 },

    #[error("{key} is too large to be a duration, got {value}")]
    TooLong { key: &'static str, value: f32 },

    #[error("{key} must lie in [0, 1], got {value}")]
    OutOfUnitRange { key: &'static str, value: f32 },

    #[error("unknown fall trigger {0:?} (expected hip-drop or torso-tilt)")]
    UnknownTrigger(String),
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Helper printing one keypoint JSON object per line.
    pub pose_command: String,
    /// Helper printing one transcript JSON object per heard utterance.
    pub wake_command: String,
    /// Helper printing the user's command after a wake phrase; empty disables.
    pub command_command: String,
    /// External TTS program; empty means print to the console.
    pub speak_command: String,
    pub camera_index: u32,
    pub palm_model: PathBuf,
    pub face_model: Option<PathBuf>,
    pub alert_url: Option<String>,
    pub alert_cooldown: Duration,
    pub locate: bool,
    pub probe_seconds: f32,
    pub require_recognized_face: bool,
    pub wake_names: Vec<String>,
    pub fall_trigger: String,
    pub fall_drop_velocity: f32,
    pub fall_low_hip_y: f32,
    pub fall_confirm_secs: f32,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fall = FallConfig::default();
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            pose_command: get("SENTINEL_POSE_CMD", "python3 -u helpers/pose_stream.py"),
            wake_command: get("SENTINEL_WAKE_CMD", "python3 -u helpers/transcribe.py"),
            command_command: get(
                "SENTINEL_COMMAND_CMD",
                "python3 -u helpers/transcribe.py --once",
            ),
            speak_command: get("SENTINEL_SPEAK_CMD", ""),
            camera_index: parse_or(&lookup, "SENTINEL_CAMERA_INDEX", 0_u32),
            palm_model: PathBuf::from(get(
                "SENTINEL_PALM_MODEL",
                "models/palm_detection_mediapipe_2023feb.onnx",
            )),
            face_model: optional("SENTINEL_FACE_MODEL").map(PathBuf::from),
            alert_url: optional("SENTINEL_ALERT_URL"),
            alert_cooldown: Duration::from_secs(parse_or(
                &lookup,
                "SENTINEL_ALERT_COOLDOWN_SECS",
                DEFAULT_ALERT_COOLDOWN_SECS,
            )),
            locate: bool_or(&lookup, "SENTINEL_LOCATE", true),
            probe_seconds: parse_or(&lookup, "SENTINEL_PROBE_SECONDS", DEFAULT_PROBE_SECONDS),
            require_recognized_face: bool_or(&lookup, "SENTINEL_REQUIRE_RECOGNIZED_FACE", false),
            wake_names: optional("SENTINEL_WAKE_NAMES")
                .map(|raw| {
                    raw.split(',')
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            fall_trigger: get("SENTINEL_FALL_TRIGGER", "hip-drop"),
            fall_drop_velocity: parse_or(
                &lookup,
                "SENTINEL_FALL_DROP_VELOCITY",
                fall.drop_velocity,
            ),
            fall_low_hip_y: parse_or(&lookup, "SENTINEL_FALL_LOW_HIP_Y", fall.low_hip_y),
            fall_confirm_secs: parse_or(
                &lookup,
                "SENTINEL_FALL_CONFIRM_SECS",
                fall.confirm_dwell.as_secs_f32(),
            ),
        }
    }

    pub fn trigger_rule(&self) -> Result<TriggerRule, ConfigError> {
        match self.fall_trigger.to_ascii_lowercase().as_str() {
            "hip-drop" | "hip_drop" => Ok(TriggerRule::HipDrop),
            "torso-tilt" | "torso_tilt" => Ok(TriggerRule::TorsoTilt),
            other => Err(ConfigError::UnknownTrigger(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        seconds("SENTINEL_PROBE_SECONDS", self.probe_seconds)?;
        positive("SENTINEL_FALL_DROP_VELOCITY", self.fall_drop_velocity)?;
        seconds("SENTINEL_FALL_CONFIRM_SECS", self.fall_confirm_secs)?;
        if !(0.0..=1.0).contains(&self.fall_low_hip_y) {
            return Err(ConfigError::OutOfUnitRange {
                key: "SENTINEL_FALL_LOW_HIP_Y",
                value: self.fall_low_hip_y,
            });
        }
        self.trigger_rule()?;
        Ok(())
    }

    pub fn fall_config(&self) -> Result<FallConfig, ConfigError> {
        Ok(FallConfig {
            trigger: self.trigger_rule()?,
            drop_velocity: self.fall_drop_velocity,
            low_hip_y: self.fall_low_hip_y,
            confirm_dwell: seconds("SENTINEL_FALL_CONFIRM_SECS", self.fall_confirm_secs)?,
            ..FallConfig::default()
        })
    }

    pub fn wake_phrase(&self) -> WakePhrase {
        if self.wake_names.is_empty() {
            WakePhrase::default()
        } else {
            WakePhrase::default().with_names(&self.wake_names)
        }
    }

    /// Validates and assembles everything the episode loop needs.
    pub fn orchestrator_settings(
        &self,
        location: String,
    ) -> Result<OrchestratorSettings, ConfigError> {
        self.validate()?;
        Ok(OrchestratorSettings {
            fall: self.fall_config()?,
            presence: PresenceOptions {
                window: seconds("SENTINEL_PROBE_SECONDS", self.probe_seconds)?,
                require_recognized_face: self.require_recognized_face,
                ..PresenceOptions::default()
            },
            wake_phrase: self.wake_phrase(),
            location,
            ..OrchestratorSettings::default()
        })
    }
}

fn positive(key: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { key, value })
    }
}

fn seconds(key: &'static str, value: f32) -> Result<Duration, ConfigError> {
    positive(key, value)?;
    Duration::try_from_secs_f32(value).map_err(|_| ConfigError::TooLong { key, value })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("failed to parse {key}={raw:?}, using default");
                default
            }
        },
        None => default,
    }
}

fn bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                log::warn!("failed to parse {key}={raw:?}, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let settings = Settings::from_lookup(|_| None);
        assert_eq!(settings.camera_index, 0);
        assert_eq!(settings.alert_cooldown, Duration::from_secs(5));
        assert!(settings.alert_url.is_none());
        assert!(settings.face_model.is_none());
        assert!(settings.locate);
        assert!(!settings.require_recognized_face);
        assert_eq!(settings.trigger_rule(), Ok(TriggerRule::HipDrop));
        assert!(settings.validate().is_ok());

        let orch = settings.orchestrator_settings("Hallway".into()).unwrap();
        assert_eq!(orch.presence.window, Duration::from_secs(3));
        assert_eq!(orch.location, "Hallway");
    }

    #[test]
    fn reads_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("SENTINEL_CAMERA_INDEX", "2"),
            ("SENTINEL_ALERT_URL", " http://localhost:8000 "),
            ("SENTINEL_LOCATE", "off"),
            ("SENTINEL_PROBE_SECONDS", "4.5"),
            ("SENTINEL_REQUIRE_RECOGNIZED_FACE", "yes"),
            ("SENTINEL_WAKE_NAMES", "aether, ,echo"),
            ("SENTINEL_FALL_TRIGGER", "torso-tilt"),
            ("SENTINEL_FALL_CONFIRM_SECS", "1.5"),
        ]));

        assert_eq!(settings.camera_index, 2);
        assert_eq!(settings.alert_url.as_deref(), Some("http://localhost:8000"));
        assert!(!settings.locate);
        assert!(settings.require_recognized_face);
        assert_eq!(settings.wake_names, vec!["aether", "echo"]);

        let fall = settings.fall_config().unwrap();
        assert_eq!(fall.trigger, TriggerRule::TorsoTilt);
        assert_eq!(fall.confirm_dwell, Duration::from_millis(1500));
        assert!(settings.wake_phrase().matches("hey echo"));
        assert!(!settings.wake_phrase().matches("hey cam"));
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("SENTINEL_CAMERA_INDEX", "front"),
            ("SENTINEL_LOCATE", "maybe"),
        ]));
        assert_eq!(settings.camera_index, 0);
        assert!(settings.locate);
    }

    #[test]
    fn rejects_invalid_values() {
        let bad_window = Settings::from_lookup(lookup_from(&[("SENTINEL_PROBE_SECONDS", "0")]));
        assert!(matches!(
            bad_window.validate(),
            Err(ConfigError::NotPositive { key: "SENTINEL_PROBE_SECONDS", .. })
        ));

        let bad_hip = Settings::from_lookup(lookup_from(&[("SENTINEL_FALL_LOW_HIP_Y", "1.4")]));
        assert!(matches!(
            bad_hip.validate(),
            Err(ConfigError::OutOfUnitRange { .. })
        ));

        let bad_rule = Settings::from_lookup(lookup_from(&[("SENTINEL_FALL_TRIGGER", "sideways")]));
        assert_eq!(
            bad_rule.validate(),
            Err(ConfigError::UnknownTrigger("sideways".into()))
        );
        assert!(bad_rule.orchestrator_settings("x".into()).is_err());
    }

    #[test]
    fn huge_durations_are_rejected_not_panicked_on() {
        let huge_window = Settings::from_lookup(lookup_from(&[("SENTINEL_PROBE_SECONDS", "1e30")]));
        assert_eq!(
            huge_window.validate(),
            Err(ConfigError::TooLong {
                key: "SENTINEL_PROBE_SECONDS",
                value: 1e30
            })
        );
        assert!(huge_window.orchestrator_settings("x".into()).is_err());

        let huge_dwell =
            Settings::from_lookup(lookup_from(&[("SENTINEL_FALL_CONFIRM_SECS", "1e30")]));
        assert!(matches!(
            huge_dwell.fall_config(),
            Err(ConfigError::TooLong { key: "SENTINEL_FALL_CONFIRM_SECS", .. })
        ));
    }
}
