use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use crossbeam_channel::{RecvTimeoutError, bounded};

use crate::{error::SensorError, signal::StopSignal, types::Trigger, worker::WorkerSet};

const REPORT_POLL: Duration = Duration::from_millis(100);

/// A long-running blocking detector loop.
///
/// Implementations poll `stop` between sensor reads and return `Ok(false)` once
/// it is set, discarding whatever read was in flight. `Ok(true)` means the
/// detector's event happened.
pub trait Detector: Send + 'static {
    fn run(&mut self, stop: &StopSignal) -> Result<bool, SensorError>;
}

/// First-writer-wins record of which detector fired.
#[derive(Debug, Default)]
pub struct WinnerSlot {
    cell: OnceLock<(Trigger, Instant)>,
}

impl WinnerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually recorded the winner.
    pub fn claim(&self, trigger: Trigger) -> bool {
        self.cell.set((trigger, Instant::now())).is_ok()
    }

    pub fn get(&self) -> Option<(Trigger, Instant)> {
        self.cell.get().copied()
    }
}

#[derive(Debug)]
pub struct RaceOutcome {
    pub winner: Option<Trigger>,
    pub at: Instant,
    pub failures: Vec<(Trigger, SensorError)>,
    /// Detectors that fired after the winner was already recorded.
    pub late_fires: Vec<Trigger>,
}

struct DetectorReport {
    trigger: Trigger,
    result: Result<bool, SensorError>,
    won: bool,
}

#[derive(Clone, Debug)]
pub struct DetectorRace {
    join_grace: Duration,
}

impl Default for DetectorRace {
    fn default() -> Self {
        Self {
            join_grace: Duration::from_secs(1),
        }
    }
}

impl DetectorRace {
    pub fn new(join_grace: Duration) -> Self {
        Self { join_grace }
    }

    /// Runs both detectors until one fires (or both give up) and reports the
    /// winner. Open-ended: there is no race timeout.
    pub fn run(&self, wake: Box<dyn Detector>, fall: Box<dyn Detector>) -> RaceOutcome {
        let stop = StopSignal::new();
        let slot = Arc::new(WinnerSlot::new());
        let (report_tx, report_rx) = bounded::<DetectorReport>(2);
        let mut workers = WorkerSet::new();

        for (trigger, mut detector) in [(Trigger::Wake, wake), (Trigger::Fall, fall)] {
            let stop = stop.clone();
            let slot = slot.clone();
            let report_tx = report_tx.clone();
            let name = match trigger {
                Trigger::Wake => "wake-detector",
                Trigger::Fall => "fall-detector",
            };

            workers.spawn(name, move || {
                let result = detector.run(&stop);
                let mut won = false;
                if matches!(result, Ok(true)) {
                    won = slot.claim(trigger);
                    if won {
                        log::info!("{trigger} detector won the race");
                    } else {
                        log::debug!("{trigger} detector fired after the race was decided");
                    }
                    stop.stop();
                }
                let _ = report_tx.send(DetectorReport {
                    trigger,
                    result,
                    won,
                });
            });
        }
        drop(report_tx);

        let mut pending = workers.len();
        let mut failures = Vec::new();
        let mut late_fires = Vec::new();
        while pending > 0 && !stop.is_stopped() {
            match report_rx.recv_timeout(REPORT_POLL) {
                Ok(report) => {
                    pending -= 1;
                    if let Err(err) = &report.result {
                        log::error!("{} detector stopped: {err}", report.trigger);
                    }
                    tally(report, &mut failures, &mut late_fires);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        stop.stop();
        let abandoned = workers.join_within(self.join_grace);
        if !abandoned.is_empty() {
            log::warn!("race left {} detector(s) running: {abandoned:?}", abandoned.len());
        }

        // Collect reports that arrived during the grace period too.
        while let Ok(report) = report_rx.try_recv() {
            tally(report, &mut failures, &mut late_fires);
        }

        let (winner, at) = match slot.get() {
            Some((winner, at)) => (Some(winner), at),
            None => (None, Instant::now()),
        };
        RaceOutcome {
            winner,
            at,
            failures,
            late_fires,
        }
    }
}

fn tally(
    report: DetectorReport,
    failures: &mut Vec<(Trigger, SensorError)>,
    late_fires: &mut Vec<Trigger>,
) {
    match report.result {
        Ok(true) if !report.won => late_fires.push(report.trigger),
        Ok(_) => {}
        Err(err) => failures.push((report.trigger, err)),
    }
}
