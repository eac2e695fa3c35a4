use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

/// Named worker threads joined with a bounded grace period.
///
/// Each worker reports on a channel when it exits (panics included), so the
/// owner can wait with a deadline instead of an unbounded `join`. Workers still
/// running when the grace period expires are detached.
pub struct WorkerSet {
    done_tx: Sender<&'static str>,
    done_rx: Receiver<&'static str>,
    handles: Vec<(&'static str, thread::JoinHandle<()>)>,
}

struct DoneGuard {
    name: &'static str,
    tx: Sender<&'static str>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.name);
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            done_tx,
            done_rx,
            handles: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = DoneGuard {
            name,
            tx: self.done_tx.clone(),
        };
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                work();
            });

        match spawned {
            Ok(handle) => self.handles.push((name, handle)),
            Err(err) => log::error!("failed to spawn {name} worker: {err:?}"),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits up to `grace` for every worker, returns the names of the ones
    /// that were abandoned.
    pub fn join_within(self, grace: Duration) -> Vec<&'static str> {
        let WorkerSet {
            done_tx,
            done_rx,
            handles,
        } = self;
        drop(done_tx);

        let deadline = Instant::now() + grace;
        let mut finished = Vec::with_capacity(handles.len());
        while finished.len() < handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done_rx.recv_timeout(remaining) {
                Ok(name) => finished.push(name),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut abandoned = Vec::new();
        for (name, handle) in handles {
            if finished.contains(&name) || handle.is_finished() {
                if handle.join().is_err() {
                    log::warn!("{name} worker panicked");
                }
            } else {
                log::warn!("abandoning {name} worker after {grace:?} grace period");
                abandoned.push(name);
            }
        }
        abandoned
    }
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_finished_workers() {
        let mut workers = WorkerSet::new();
        workers.spawn("quick", || thread::sleep(Duration::from_millis(10)));
        workers.spawn("instant", || {});
        assert_eq!(workers.len(), 2);

        let abandoned = workers.join_within(Duration::from_secs(1));
        assert!(abandoned.is_empty());
    }

    #[test]
    fn abandons_stuck_workers_after_grace() {
        let mut workers = WorkerSet::new();
        workers.spawn("stuck", || thread::sleep(Duration::from_secs(3)));
        workers.spawn("quick", || {});

        let start = Instant::now();
        let abandoned = workers.join_within(Duration::from_millis(100));
        assert_eq!(abandoned, vec!["stuck"]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn panicking_worker_still_reports_done() {
        let mut workers = WorkerSet::new();
        workers.spawn("panics", || panic!("boom"));

        let start = Instant::now();
        let abandoned = workers.join_within(Duration::from_secs(2));
        assert!(abandoned.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
