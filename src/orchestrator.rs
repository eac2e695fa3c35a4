use std::{sync::Arc, time::Duration};

use crate::{
    error::SensorError,
    fall::{FallConfig, FallStateMachine},
    presence::{CameraOpener, FacePresence, HandPresence, PresenceOptions, PresenceProbe},
    race::{Detector, DetectorRace},
    signal::StopSignal,
    types::{PresenceResult, Trigger},
    watch::{FallWatcher, KeypointSource, TranscriptSource, WakeListener, WakePhrase},
};

pub const FALL_PROMPT: &str = "Hello, I am an automated wellness device, and I have detected a fall. If you are okay, please move your hand.";
pub const RESPONSIVE_REPLY: &str = "Thank you. I detected a response. I will stand by.";
pub const ESCALATION_NOTICE: &str = "I did not detect a hand or face. I am escalating now.";
pub const WAKE_ACK: &str = "Wake word detected. Listening for command.";

/// Outbound alert channel. Calls must return promptly; delivery happens in the
/// background.
pub trait Notifier: Send + Sync {
    fn send_fall_alert(&self, location: &str, confidence: Option<f32>);
    fn send_wake_alert(&self, command: Option<&str>);
}

pub trait Speaker {
    fn say(&mut self, text: &str);
}

/// Hands out fresh sensor handles for each episode so nothing (camera,
/// microphone, helper processes) outlives the phase that uses it.
pub trait SensorSuite {
    fn keypoints(&mut self) -> Result<Box<dyn KeypointSource>, SensorError>;
    fn transcripts(&mut self) -> Result<Box<dyn TranscriptSource>, SensorError>;
    fn camera(&mut self) -> CameraOpener;
    fn hand_presence(&mut self) -> Result<Box<dyn HandPresence>, SensorError>;
    fn face_presence(&mut self) -> Result<Box<dyn FacePresence>, SensorError>;
    fn listen_for_command(&mut self) -> Result<Option<String>, SensorError>;
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub fall: FallConfig,
    pub presence: PresenceOptions,
    pub wake_phrase: WakePhrase,
    pub race_grace: Duration,
    /// Pause before the next episode when neither detector could run.
    pub idle_backoff: Duration,
    pub location: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            fall: FallConfig::default(),
            presence: PresenceOptions::default(),
            wake_phrase: WakePhrase::default(),
            race_grace: Duration::from_secs(1),
            idle_backoff: Duration::from_secs(2),
            location: "Camera Location".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EpisodeOutcome {
    WakeHandled { command: Option<String> },
    Responsive(PresenceResult),
    /// `None` when the probe itself could not run.
    Escalated(Option<PresenceResult>),
    NoTrigger,
}

/// A detector whose sensor failed to open; it reports the failure to the race
/// immediately.
struct Unopened(Option<SensorError>);

impl Detector for Unopened {
    fn run(&mut self, _stop: &StopSignal) -> Result<bool, SensorError> {
        Err(self
            .0
            .take()
            .unwrap_or_else(|| SensorError::Disconnected("detector")))
    }
}

pub struct Orchestrator<S: SensorSuite> {
    suite: S,
    notifier: Arc<dyn Notifier>,
    speaker: Box<dyn Speaker>,
    settings: OrchestratorSettings,
}

impl<S: SensorSuite> Orchestrator<S> {
    pub fn new(
        suite: S,
        notifier: Arc<dyn Notifier>,
        speaker: Box<dyn Speaker>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            suite,
            notifier,
            speaker,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs episodes back to back until `stop` is set. The check happens
    /// between episodes; an episode in progress is allowed to finish.
    pub fn run(&mut self, stop: &StopSignal) {
        let mut episode = 0u64;
        while !stop.is_stopped() {
            episode += 1;
            log::info!("episode {episode} started");
            let outcome = self.run_episode();
            log::info!("episode {episode} finished: {outcome:?}");
            if outcome == EpisodeOutcome::NoTrigger {
                stop.wait_timeout(self.settings.idle_backoff);
            }
        }
    }

    pub fn run_episode(&mut self) -> EpisodeOutcome {
        let wake: Box<dyn Detector> = match self.suite.transcripts() {
            Ok(source) => Box::new(WakeListener::new(
                source,
                self.settings.wake_phrase.clone(),
            )),
            Err(err) => Box::new(Unopened(Some(err))),
        };
        let fall: Box<dyn Detector> = match self.suite.keypoints() {
            Ok(source) => Box::new(FallWatcher::new(
                source,
                FallStateMachine::new(self.settings.fall.clone()),
            )),
            Err(err) => Box::new(Unopened(Some(err))),
        };

        let outcome = DetectorRace::new(self.settings.race_grace).run(wake, fall);
        for (trigger, err) in &outcome.failures {
            log::error!("{trigger} detector unavailable: {err}");
        }

        match outcome.winner {
            Some(Trigger::Wake) => self.handle_wake(),
            Some(Trigger::Fall) => self.handle_fall(),
            None => {
                log::warn!("race ended without a winner");
                EpisodeOutcome::NoTrigger
            }
        }
    }

    fn handle_wake(&mut self) -> EpisodeOutcome {
        self.speaker.say(WAKE_ACK);
        let command = match self.suite.listen_for_command() {
            Ok(command) => command,
            Err(err) => {
                log::error!("command listening failed: {err}");
                None
            }
        };
        if let Some(command) = &command {
            log::info!("heard command {command:?}");
        }
        self.notifier.send_wake_alert(command.as_deref());
        EpisodeOutcome::WakeHandled { command }
    }

    fn handle_fall(&mut self) -> EpisodeOutcome {
        self.speaker.say(FALL_PROMPT);

        let probed = self.probe_presence();
        match probed {
            Ok(result) if result.status().is_responsive() => {
                self.speaker.say(RESPONSIVE_REPLY);
                EpisodeOutcome::Responsive(result)
            }
            Ok(result) => {
                self.escalate();
                EpisodeOutcome::Escalated(Some(result))
            }
            Err(err) => {
                log::error!("presence probe could not run: {err}");
                self.escalate();
                EpisodeOutcome::Escalated(None)
            }
        }
    }

    fn probe_presence(&mut self) -> Result<PresenceResult, SensorError> {
        let hand = self.suite.hand_presence()?;
        let face = self.suite.face_presence()?;
        let camera = self.suite.camera();
        PresenceProbe::new(self.settings.presence.clone()).run(camera, hand, face)
    }

    fn escalate(&mut self) {
        self.speaker.say(ESCALATION_NOTICE);
        self.notifier
            .send_fall_alert(&self.settings.location, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        presence::CameraSource,
        types::{FaceObservation, Frame, Keypoint, KeypointFrame, LEFT_HIP, RIGHT_HIP},
    };
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::Instant,
    };

    #[derive(Default)]
    struct Recorder {
        falls: Mutex<Vec<String>>,
        wakes: Mutex<Vec<Option<String>>>,
    }

    impl Notifier for Recorder {
        fn send_fall_alert(&self, location: &str, _confidence: Option<f32>) {
            self.falls.lock().unwrap().push(location.to_string());
        }

        fn send_wake_alert(&self, command: Option<&str>) {
            self.wakes.lock().unwrap().push(command.map(str::to_string));
        }
    }

    struct Transcript(Arc<Mutex<Vec<String>>>);

    impl Speaker for Transcript {
        fn say(&mut self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    struct Silence;

    impl TranscriptSource for Silence {
        fn listen(&mut self, timeout: Duration) -> Result<Option<Vec<String>>, SensorError> {
            std::thread::sleep(timeout.min(Duration::from_millis(20)));
            Ok(None)
        }
    }

    struct Says(Vec<String>);

    impl TranscriptSource for Says {
        fn listen(&mut self, _timeout: Duration) -> Result<Option<Vec<String>>, SensorError> {
            Ok(Some(self.0.clone()))
        }
    }

    struct Standing;

    impl KeypointSource for Standing {
        fn next_frame(&mut self, _timeout: Duration) -> Result<Option<KeypointFrame>, SensorError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Some(pose_with_hips(0.4, Instant::now())))
        }
    }

    /// Standing, then a sudden drop that stays down.
    struct Falling {
        frames: VecDeque<KeypointFrame>,
    }

    impl Falling {
        fn new() -> Self {
            let t0 = Instant::now();
            let mut frames = VecDeque::new();
            frames.push_back(pose_with_hips(0.3, t0));
            for i in 0..40u64 {
                let at = t0 + Duration::from_millis(50 + i * 33);
                frames.push_back(pose_with_hips(0.85, at));
            }
            Self { frames }
        }
    }

    impl KeypointSource for Falling {
        fn next_frame(&mut self, _timeout: Duration) -> Result<Option<KeypointFrame>, SensorError> {
            Ok(self.frames.pop_front())
        }
    }

    fn pose_with_hips(hip_y: f32, at: Instant) -> KeypointFrame {
        let mut landmarks = vec![Keypoint::new(0.5, 0.2); 33];
        landmarks[LEFT_HIP] = Keypoint::new(0.45, hip_y);
        landmarks[RIGHT_HIP] = Keypoint::new(0.55, hip_y);
        KeypointFrame::new(landmarks, at)
    }

    struct StillCamera;

    impl CameraSource for StillCamera {
        fn next_frame(&mut self) -> Result<Option<Frame>, SensorError> {
            std::thread::sleep(Duration::from_millis(10));
            Ok(Some(Frame::new(vec![0; 4 * 4 * 4], 4, 4)))
        }
    }

    struct Hand(bool);

    impl HandPresence for Hand {
        fn check(&mut self, _frame: &Frame) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    struct NoFace;

    impl FacePresence for NoFace {
        fn check(&mut self, _frame: &Frame) -> anyhow::Result<FaceObservation> {
            Ok(FaceObservation::none())
        }
    }

    #[derive(Default)]
    struct Suite {
        wake_words: Option<Vec<String>>,
        falls: bool,
        keypoints_missing: bool,
        camera_missing: bool,
        hand_moves: bool,
        command: Option<String>,
    }

    impl SensorSuite for Suite {
        fn keypoints(&mut self) -> Result<Box<dyn KeypointSource>, SensorError> {
            if self.keypoints_missing {
                return Err(SensorError::unavailable("pose", "helper not found"));
            }
            if self.falls {
                Ok(Box::new(Falling::new()))
            } else {
                Ok(Box::new(Standing))
            }
        }

        fn transcripts(&mut self) -> Result<Box<dyn TranscriptSource>, SensorError> {
            match &self.wake_words {
                Some(words) => Ok(Box::new(Says(words.clone()))),
                None => Ok(Box::new(Silence)),
            }
        }

        fn camera(&mut self) -> CameraOpener {
            if self.camera_missing {
                Box::new(|| Err(SensorError::unavailable("camera", "no device")))
            } else {
                Box::new(|| Ok(Box::new(StillCamera) as Box<dyn CameraSource>))
            }
        }

        fn hand_presence(&mut self) -> Result<Box<dyn HandPresence>, SensorError> {
            Ok(Box::new(Hand(self.hand_moves)))
        }

        fn face_presence(&mut self) -> Result<Box<dyn FacePresence>, SensorError> {
            Ok(Box::new(NoFace))
        }

        fn listen_for_command(&mut self) -> Result<Option<String>, SensorError> {
            Ok(self.command.clone())
        }
    }

    fn orchestrator(
        suite: Suite,
    ) -> (Orchestrator<Suite>, Arc<Recorder>, Arc<Mutex<Vec<String>>>) {
        let recorder = Arc::new(Recorder::default());
        let said = Arc::new(Mutex::new(Vec::new()));
        let settings = OrchestratorSettings {
            presence: PresenceOptions {
                window: Duration::from_millis(400),
                ..PresenceOptions::default()
            },
            race_grace: Duration::from_millis(300),
            idle_backoff: Duration::from_millis(10),
            location: "Kitchen".to_string(),
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(
            suite,
            recorder.clone(),
            Box::new(Transcript(said.clone())),
            settings,
        );
        (orchestrator, recorder, said)
    }

    #[test]
    fn wake_episode_forwards_command() {
        let (mut orch, recorder, said) = orchestrator(Suite {
            wake_words: Some(vec!["hey cam".to_string()]),
            command: Some("call my daughter".to_string()),
            ..Suite::default()
        });

        let outcome = orch.run_episode();
        assert_eq!(
            outcome,
            EpisodeOutcome::WakeHandled {
                command: Some("call my daughter".to_string())
            }
        );
        assert_eq!(
            *recorder.wakes.lock().unwrap(),
            vec![Some("call my daughter".to_string())]
        );
        assert!(recorder.falls.lock().unwrap().is_empty());
        assert_eq!(*said.lock().unwrap(), vec![WAKE_ACK.to_string()]);
    }

    #[test]
    fn responsive_person_is_not_escalated() {
        let (mut orch, recorder, said) = orchestrator(Suite {
            falls: true,
            hand_moves: true,
            ..Suite::default()
        });

        match orch.run_episode() {
            EpisodeOutcome::Responsive(result) => assert!(result.saw_hand),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(recorder.falls.lock().unwrap().is_empty());
        assert_eq!(
            *said.lock().unwrap(),
            vec![FALL_PROMPT.to_string(), RESPONSIVE_REPLY.to_string()]
        );
    }

    #[test]
    fn unresponsive_person_is_escalated() {
        let (mut orch, recorder, said) = orchestrator(Suite {
            falls: true,
            ..Suite::default()
        });

        match orch.run_episode() {
            EpisodeOutcome::Escalated(Some(result)) => {
                assert!(!result.saw_hand);
                assert!(!result.saw_face);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(*recorder.falls.lock().unwrap(), vec!["Kitchen".to_string()]);
        assert_eq!(said.lock().unwrap().last().unwrap(), ESCALATION_NOTICE);
    }

    #[test]
    fn missing_probe_camera_escalates() {
        let (mut orch, recorder, _said) = orchestrator(Suite {
            falls: true,
            camera_missing: true,
            hand_moves: true,
            ..Suite::default()
        });

        assert_eq!(orch.run_episode(), EpisodeOutcome::Escalated(None));
        assert_eq!(recorder.falls.lock().unwrap().len(), 1);
    }

    #[test]
    fn wake_still_works_without_pose() {
        let (mut orch, _recorder, _said) = orchestrator(Suite {
            keypoints_missing: true,
            wake_words: Some(vec!["hi cam".to_string()]),
            ..Suite::default()
        });
        assert_eq!(
            orch.run_episode(),
            EpisodeOutcome::WakeHandled { command: None }
        );
    }

    /// Stops the loop from inside the first episode.
    struct StopsAfterFirst {
        stop: StopSignal,
        wakes: Mutex<usize>,
    }

    impl Notifier for StopsAfterFirst {
        fn send_fall_alert(&self, _location: &str, _confidence: Option<f32>) {}

        fn send_wake_alert(&self, _command: Option<&str>) {
            *self.wakes.lock().unwrap() += 1;
            self.stop.stop();
        }
    }

    #[test]
    fn run_loop_checks_stop_between_episodes() {
        let stop = StopSignal::new();
        let notifier = Arc::new(StopsAfterFirst {
            stop: stop.clone(),
            wakes: Mutex::new(0),
        });
        let said = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new(
            Suite {
                wake_words: Some(vec!["hey cam".to_string()]),
                ..Suite::default()
            },
            notifier.clone(),
            Box::new(Transcript(said.clone())),
            OrchestratorSettings::default(),
        );

        orch.run(&stop);
        assert_eq!(*notifier.wakes.lock().unwrap(), 1);
        assert_eq!(*said.lock().unwrap(), vec![WAKE_ACK.to_string()]);
    }

    #[test]
    fn run_loop_does_not_start_once_stopped() {
        let (mut orch, recorder, _said) = orchestrator(Suite {
            wake_words: Some(vec!["hey cam".to_string()]),
            ..Suite::default()
        });
        let stop = StopSignal::new();
        stop.stop();
        orch.run(&stop);
        assert!(recorder.wakes.lock().unwrap().is_empty());
    }

    #[test]
    fn no_sensors_means_no_trigger() {
        struct Deaf;
        impl SensorSuite for Deaf {
            fn keypoints(&mut self) -> Result<Box<dyn KeypointSource>, SensorError> {
                Err(SensorError::unavailable("pose", "missing"))
            }
            fn transcripts(&mut self) -> Result<Box<dyn TranscriptSource>, SensorError> {
                Err(SensorError::unavailable("microphone", "missing"))
            }
            fn camera(&mut self) -> CameraOpener {
                Box::new(|| Err(SensorError::unavailable("camera", "missing")))
            }
            fn hand_presence(&mut self) -> Result<Box<dyn HandPresence>, SensorError> {
                Ok(Box::new(Hand(false)))
            }
            fn face_presence(&mut self) -> Result<Box<dyn FacePresence>, SensorError> {
                Ok(Box::new(NoFace))
            }
            fn listen_for_command(&mut self) -> Result<Option<String>, SensorError> {
                Ok(None)
            }
        }

        let mut orch = Orchestrator::new(
            Deaf,
            Arc::new(Recorder::default()),
            Box::new(Transcript(Arc::default())),
            OrchestratorSettings::default(),
        );
        assert_eq!(orch.run_episode(), EpisodeOutcome::NoTrigger);
    }
}
