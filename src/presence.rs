use std::{
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use crate::{
    error::SensorError,
    signal::StopSignal,
    types::{FaceObservation, Frame, PresenceResult, SharedFrame},
    worker::WorkerSet,
};

const CAMERA_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pull-based camera. `Ok(None)` marks end of stream.
pub trait CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SensorError>;
}

/// Opens the camera on the producer thread, so the source itself need not be
/// `Send`.
pub type CameraOpener =
    Box<dyn FnOnce() -> Result<Box<dyn CameraSource>, SensorError> + Send + 'static>;

pub trait HandPresence: Send {
    fn check(&mut self, frame: &Frame) -> anyhow::Result<bool>;
}

pub trait FacePresence: Send {
    fn check(&mut self, frame: &Frame) -> anyhow::Result<FaceObservation>;

    /// Whether observations carry identity matches worth thresholding.
    fn recognizes_identities(&self) -> bool {
        false
    }
}

/// Single-slot holder for the newest camera frame. Publishing overwrites,
/// reading hands out a snapshot; nothing queues.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<SharedFrame>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(frame);
    }

    pub fn latest(&self) -> Option<SharedFrame> {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[derive(Clone, Debug)]
pub struct PresenceOptions {
    pub window: Duration,
    pub hand_rate_hz: f32,
    pub face_rate_hz: f32,
    pub require_recognized_face: bool,
    /// Minimum identity-match confidence for a face to count as recognized.
    pub recognition_threshold: f32,
    pub join_grace: Duration,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3),
            hand_rate_hz: 8.0,
            face_rate_hz: 10.0,
            require_recognized_face: false,
            recognition_threshold: 0.5,
            join_grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
struct Sightings {
    hand: AtomicBool,
    face: AtomicBool,
    face_id: OnceLock<String>,
}

impl Sightings {
    fn snapshot(&self) -> PresenceResult {
        PresenceResult {
            saw_hand: self.hand.load(Ordering::SeqCst),
            saw_face: self.face.load(Ordering::SeqCst),
            recognized_id: self.face_id.get().cloned(),
        }
    }
}

/// Bounded responsiveness check: one camera producer, a hand worker and a face
/// worker, all sharing the newest frame for a fixed window.
pub struct PresenceProbe {
    options: PresenceOptions,
}

impl PresenceProbe {
    pub fn new(options: PresenceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PresenceOptions {
        &self.options
    }

    pub fn run(
        &self,
        open_camera: CameraOpener,
        hand: Box<dyn HandPresence>,
        face: Box<dyn FacePresence>,
    ) -> Result<PresenceResult, SensorError> {
        let stop = StopSignal::new();
        let latest = Arc::new(LatestFrame::new());
        let sightings = Arc::new(Sightings::default());
        let (ready_tx, ready_rx) = bounded::<Result<(), SensorError>>(1);
        let mut workers = WorkerSet::new();

        {
            let stop = stop.clone();
            let latest = latest.clone();
            workers.spawn("presence-camera", move || {
                run_producer(open_camera, &latest, &stop, ready_tx)
            });
        }

        let opened = match ready_rx.recv_timeout(CAMERA_OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SensorError::unavailable(
                "camera",
                format!("not ready after {CAMERA_OPEN_TIMEOUT:?}"),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(SensorError::unavailable(
                "camera",
                "producer exited before opening",
            )),
        };
        if let Err(err) = opened {
            stop.stop();
            workers.join_within(self.options.join_grace);
            return Err(err);
        }

        {
            let stop = stop.clone();
            let latest = latest.clone();
            let sightings = sightings.clone();
            let interval = tick_interval(self.options.hand_rate_hz);
            workers.spawn("presence-hand", move || {
                run_hand_worker(hand, &latest, &sightings, &stop, interval)
            });
        }

        {
            let stop = stop.clone();
            let latest = latest.clone();
            let sightings = sightings.clone();
            let interval = tick_interval(self.options.face_rate_hz);
            let policy = FacePolicy {
                require_recognized: self.options.require_recognized_face,
                threshold: self.options.recognition_threshold,
            };
            workers.spawn("presence-face", move || {
                run_face_worker(face, policy, &latest, &sightings, &stop, interval)
            });
        }

        let started = Instant::now();
        let deadline = started + self.options.window;
        while !stop.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stop.wait_timeout(deadline - now);
        }
        stop.stop();

        let abandoned = workers.join_within(self.options.join_grace);
        if !abandoned.is_empty() {
            log::warn!("presence probe abandoned {abandoned:?}");
        }

        let result = sightings.snapshot();
        log::info!(
            "presence probe finished after {:?}: status={} hand={} face={} id={:?}",
            started.elapsed(),
            result.status(),
            result.saw_hand,
            result.saw_face,
            result.recognized_id
        );
        Ok(result)
    }
}

fn tick_interval(rate_hz: f32) -> Duration {
    Duration::from_secs_f32(1.0 / rate_hz.max(1e-3))
}

fn run_producer(
    open_camera: CameraOpener,
    latest: &LatestFrame,
    stop: &StopSignal,
    ready_tx: Sender<Result<(), SensorError>>,
) {
    let mut camera = match open_camera() {
        Ok(camera) => {
            let _ = ready_tx.send(Ok(()));
            camera
        }
        Err(err) => {
            log::error!("failed to open presence camera: {err}");
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    let mut published = 0u64;
    while !stop.is_stopped() {
        match camera.next_frame() {
            Ok(Some(frame)) => {
                latest.publish(frame);
                published += 1;
            }
            Ok(None) => {
                log::info!("presence camera reached end of stream");
                break;
            }
            Err(err) => {
                log::warn!("presence camera read failed: {err}");
                // Avoid spinning on a camera that fails instantly.
                stop.wait_timeout(Duration::from_millis(10));
            }
        }
    }
    log::debug!("presence camera published {published} frames");
}

/// Waits until the next tick; `None` once stopped. Skips the wait on the
/// first tick.
fn next_tick(last: &mut Option<Instant>, interval: Duration, stop: &StopSignal) -> Option<()> {
    if let Some(prev) = *last {
        let due = prev + interval;
        let now = Instant::now();
        if now < due && stop.wait_timeout(due - now) {
            return None;
        }
    }
    if stop.is_stopped() {
        return None;
    }
    *last = Some(Instant::now());
    Some(())
}

fn run_hand_worker(
    mut hand: Box<dyn HandPresence>,
    latest: &LatestFrame,
    sightings: &Sightings,
    stop: &StopSignal,
    interval: Duration,
) {
    let mut last = None;
    while next_tick(&mut last, interval, stop).is_some() {
        let Some(frame) = latest.latest() else {
            continue;
        };
        match hand.check(&frame) {
            Ok(true) => {
                if !sightings.hand.swap(true, Ordering::SeqCst) {
                    log::info!("presence probe saw a hand");
                }
            }
            Ok(false) => {}
            Err(err) => log::warn!("hand detector failed on this tick: {err:?}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct FacePolicy {
    require_recognized: bool,
    threshold: f32,
}

impl FacePolicy {
    /// Decides whether an observation counts as a face sighting, and the
    /// identity to record with it.
    fn judge(&self, observation: FaceObservation, has_matcher: bool) -> (bool, Option<String>) {
        if !observation.detected {
            return (false, None);
        }
        if !has_matcher {
            return (!self.require_recognized, None);
        }

        let recognized = observation
            .confidence
            .is_some_and(|confidence| confidence >= self.threshold)
            && observation.recognized_id.is_some();
        if recognized {
            (true, observation.recognized_id)
        } else {
            (!self.require_recognized, None)
        }
    }
}

fn run_face_worker(
    mut face: Box<dyn FacePresence>,
    policy: FacePolicy,
    latest: &LatestFrame,
    sightings: &Sightings,
    stop: &StopSignal,
    interval: Duration,
) {
    let has_matcher = face.recognizes_identities();
    let mut last = None;
    while next_tick(&mut last, interval, stop).is_some() {
        let Some(frame) = latest.latest() else {
            continue;
        };
        let observation = match face.check(&frame) {
            Ok(observation) => observation,
            Err(err) => {
                log::warn!("face detector failed on this tick: {err:?}");
                continue;
            }
        };

        let (counts, identity) = policy.judge(observation, has_matcher);
        if let Some(id) = identity {
            if sightings.face_id.set(id).is_ok() {
                log::info!("presence probe recognized {:?}", sightings.face_id.get());
            }
        }
        if counts && !sightings.face.swap(true, Ordering::SeqCst) {
            log::info!("presence probe saw a face");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PresenceStatus;
    use anyhow::anyhow;
    use std::{sync::atomic::AtomicUsize, thread};

    struct SyntheticCamera {
        interval: Duration,
        remaining: Option<usize>,
    }

    impl CameraSource for SyntheticCamera {
        fn next_frame(&mut self) -> Result<Option<Frame>, SensorError> {
            if let Some(remaining) = self.remaining.as_mut() {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
            }
            thread::sleep(self.interval);
            Ok(Some(Frame::new(vec![0; 4 * 4 * 4], 4, 4)))
        }
    }

    struct HangingCamera;

    impl CameraSource for HangingCamera {
        fn next_frame(&mut self) -> Result<Option<Frame>, SensorError> {
            thread::sleep(Duration::from_secs(3));
            Ok(None)
        }
    }

    fn streaming_camera() -> CameraOpener {
        Box::new(|| {
            Ok(Box::new(SyntheticCamera {
                interval: Duration::from_millis(10),
                remaining: None,
            }) as Box<dyn CameraSource>)
        })
    }

    struct FixedHand {
        present: bool,
        checks: Arc<AtomicUsize>,
    }

    impl HandPresence for FixedHand {
        fn check(&mut self, _frame: &Frame) -> anyhow::Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.present)
        }
    }

    struct FailingHand;

    impl HandPresence for FailingHand {
        fn check(&mut self, _frame: &Frame) -> anyhow::Result<bool> {
            Err(anyhow!("corrupt frame"))
        }
    }

    struct FixedFace {
        observation: FaceObservation,
        matcher: bool,
    }

    impl FacePresence for FixedFace {
        fn check(&mut self, _frame: &Frame) -> anyhow::Result<FaceObservation> {
            Ok(self.observation.clone())
        }

        fn recognizes_identities(&self) -> bool {
            self.matcher
        }
    }

    fn no_face() -> Box<dyn FacePresence> {
        Box::new(FixedFace {
            observation: FaceObservation::none(),
            matcher: false,
        })
    }

    fn no_hand() -> Box<dyn HandPresence> {
        Box::new(FixedHand {
            present: false,
            checks: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn short_window(window: Duration) -> PresenceOptions {
        PresenceOptions {
            window,
            join_grace: Duration::from_millis(300),
            ..PresenceOptions::default()
        }
    }

    #[test]
    fn latest_frame_keeps_only_newest() {
        let slot = LatestFrame::new();
        assert!(slot.latest().is_none());
        slot.publish(Frame::new(vec![1; 4], 1, 1));
        slot.publish(Frame::new(vec![2; 4], 1, 1));
        let snapshot = slot.latest().unwrap();
        slot.publish(Frame::new(vec![3; 4], 1, 1));
        assert_eq!(snapshot.rgba[0], 2);
        assert_eq!(slot.latest().unwrap().rgba[0], 3);
    }

    #[test]
    fn hand_only_when_hand_always_fires() {
        let checks = Arc::new(AtomicUsize::new(0));
        let probe = PresenceProbe::new(PresenceOptions::default());
        let start = Instant::now();
        let result = probe
            .run(
                streaming_camera(),
                Box::new(FixedHand {
                    present: true,
                    checks: checks.clone(),
                }),
                no_face(),
            )
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(result.status(), PresenceStatus::HandOnly);
        assert!(result.saw_hand);
        assert!(!result.saw_face);
        // ~8 Hz over 3 s.
        let ticks = checks.load(Ordering::SeqCst);
        assert!((10..=30).contains(&ticks), "unexpected tick count {ticks}");
    }

    #[test]
    fn zero_frames_ends_on_time_with_neither() {
        let window = Duration::from_millis(400);
        let probe = PresenceProbe::new(short_window(window));
        let start = Instant::now();
        let opener: CameraOpener = Box::new(|| {
            Ok(Box::new(SyntheticCamera {
                interval: Duration::ZERO,
                remaining: Some(0),
            }) as Box<dyn CameraSource>)
        });
        let result = probe
            .run(
                opener,
                Box::new(FixedHand {
                    present: true,
                    checks: Arc::new(AtomicUsize::new(0)),
                }),
                no_face(),
            )
            .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= window);
        assert!(elapsed < window + Duration::from_secs(1));
        assert_eq!(result.status(), PresenceStatus::Neither);
    }

    #[test]
    fn hanging_camera_does_not_hang_the_probe() {
        let window = Duration::from_millis(200);
        let probe = PresenceProbe::new(short_window(window));
        let start = Instant::now();
        let opener: CameraOpener =
            Box::new(|| Ok(Box::new(HangingCamera) as Box<dyn CameraSource>));
        let result = probe.run(opener, no_hand(), no_face()).unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.status(), PresenceStatus::Neither);
    }

    #[test]
    fn camera_open_failure_is_surfaced() {
        let probe = PresenceProbe::new(short_window(Duration::from_millis(200)));
        let opener: CameraOpener = Box::new(|| Err(SensorError::unavailable("camera", "busy")));
        let err = probe.run(opener, no_hand(), no_face()).unwrap_err();
        assert!(matches!(err, SensorError::Unavailable { .. }));
    }

    #[test]
    fn detector_errors_count_as_misses() {
        let probe = PresenceProbe::new(short_window(Duration::from_millis(300)));
        let result = probe
            .run(
                streaming_camera(),
                Box::new(FailingHand),
                Box::new(FixedFace {
                    observation: FaceObservation::detected(),
                    matcher: false,
                }),
            )
            .unwrap();
        assert_eq!(result.status(), PresenceStatus::FaceOnly);
    }

    #[test]
    fn unrecognized_face_is_rejected_when_recognition_required() {
        let options = PresenceOptions {
            require_recognized_face: true,
            recognition_threshold: 0.6,
            ..short_window(Duration::from_millis(300))
        };
        let probe = PresenceProbe::new(options);
        let result = probe
            .run(
                streaming_camera(),
                no_hand(),
                Box::new(FixedFace {
                    observation: FaceObservation::recognized("resident", 0.4),
                    matcher: true,
                }),
            )
            .unwrap();
        assert!(!result.saw_face);
        assert_eq!(result.recognized_id, None);
        assert_eq!(result.status(), PresenceStatus::Neither);
    }

    #[test]
    fn recognized_face_records_identity() {
        let options = PresenceOptions {
            require_recognized_face: true,
            ..short_window(Duration::from_millis(300))
        };
        let probe = PresenceProbe::new(options);
        let result = probe
            .run(
                streaming_camera(),
                Box::new(FixedHand {
                    present: true,
                    checks: Arc::new(AtomicUsize::new(0)),
                }),
                Box::new(FixedFace {
                    observation: FaceObservation::recognized("resident", 0.9),
                    matcher: true,
                }),
            )
            .unwrap();
        assert_eq!(result.status(), PresenceStatus::Both);
        assert_eq!(result.recognized_id.as_deref(), Some("resident"));
    }

    #[test]
    fn face_policy_decisions() {
        let lenient = FacePolicy {
            require_recognized: false,
            threshold: 0.5,
        };
        let strict = FacePolicy {
            require_recognized: true,
            threshold: 0.5,
        };
        let weak = FaceObservation::recognized("a", 0.2);
        let strong = FaceObservation::recognized("a", 0.8);

        assert_eq!(lenient.judge(FaceObservation::none(), true), (false, None));
        assert_eq!(lenient.judge(FaceObservation::detected(), false), (true, None));
        assert_eq!(strict.judge(FaceObservation::detected(), false), (false, None));
        assert_eq!(lenient.judge(weak.clone(), true), (true, None));
        assert_eq!(strict.judge(weak, true), (false, None));
        assert_eq!(strict.judge(strong, true), (true, Some("a".to_string())));
    }
}
