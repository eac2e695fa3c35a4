use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    error::SensorError,
    types::{Keypoint, KeypointFrame},
    watch::{KeypointSource, TranscriptSource},
};

const LINE_BUFFER: usize = 32;

/// A helper process that prints one JSON object per line on stdout.
///
/// A reader thread parses lines into a bounded channel; unparsable lines are
/// logged and skipped. The child is killed when this is dropped.
pub struct LineProcess<T> {
    label: &'static str,
    child: Option<Child>,
    rx: Receiver<T>,
}

impl<T> LineProcess<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Spawns `command_line`, split on whitespace into program and arguments.
    pub fn spawn(label: &'static str, command_line: &str) -> Result<Self, SensorError> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SensorError::unavailable(label, "no helper command configured"))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| SensorError::unavailable(label, format!("{program}: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SensorError::unavailable(label, "helper stdout not captured"))?;

        log::info!("{label} helper started: {command_line} (pid {})", child.id());
        match Self::from_reader(label, stdout) {
            Ok(mut stream) => {
                stream.child = Some(child);
                Ok(stream)
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }

    pub fn from_reader<R>(label: &'static str, reader: R) -> Result<Self, SensorError>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded::<T>(LINE_BUFFER);
        thread::Builder::new()
            .name(format!("{label}-reader"))
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            log::warn!("{label} helper output unreadable: {err}");
                            break;
                        }
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<T>(line) {
                        Ok(msg) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(err) => log::warn!("{label} helper sent bad line {line:?}: {err}"),
                    }
                }
                log::debug!("{label} helper output closed");
            })
            .map_err(|err| SensorError::unavailable(label, err))?;

        Ok(Self {
            label,
            child: None,
            rx,
        })
    }

    /// `Ok(None)` when nothing arrived within `timeout`; `Disconnected` once
    /// the helper has exited and its output is drained.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<T>, SensorError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SensorError::Disconnected(self.label)),
        }
    }
}

impl<T> Drop for LineProcess<T> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            log::debug!("{} helper stopped", self.label);
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PoseLine {
    #[serde(default)]
    pub landmarks: Option<Vec<Keypoint>>,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptLine {
    #[serde(default)]
    pub transcripts: Vec<String>,
}

/// Keypoints from a pose helper. Frames are stamped on arrival.
pub struct PoseStream {
    inner: LineProcess<PoseLine>,
}

impl PoseStream {
    pub fn spawn(command_line: &str) -> Result<Self, SensorError> {
        Ok(Self {
            inner: LineProcess::spawn("pose", command_line)?,
        })
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Result<Self, SensorError> {
        Ok(Self {
            inner: LineProcess::from_reader("pose", reader)?,
        })
    }
}

impl KeypointSource for PoseStream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<KeypointFrame>, SensorError> {
        let frame = self
            .inner
            .recv(timeout)?
            .and_then(|line| line.landmarks)
            .filter(|landmarks| !landmarks.is_empty())
            .map(|landmarks| KeypointFrame::new(landmarks, Instant::now()));
        Ok(frame)
    }
}

/// Alternative transcripts from a speech helper.
pub struct TranscriptStream {
    inner: LineProcess<TranscriptLine>,
}

impl TranscriptStream {
    pub fn spawn(command_line: &str) -> Result<Self, SensorError> {
        Ok(Self {
            inner: LineProcess::spawn("microphone", command_line)?,
        })
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Result<Self, SensorError> {
        Ok(Self {
            inner: LineProcess::from_reader("microphone", reader)?,
        })
    }

    /// Waits up to `timeout` for the first non-empty utterance and returns its
    /// best transcript.
    pub fn first_utterance(&mut self, timeout: Duration) -> Result<Option<String>, SensorError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let heard = match self.listen(deadline - now) {
                Ok(heard) => heard,
                Err(SensorError::Disconnected(_)) => return Ok(None),
                Err(err) => return Err(err),
            };
            if let Some(best) = heard.and_then(|t| t.into_iter().next()) {
                return Ok(Some(best));
            }
        }
    }
}

impl TranscriptSource for TranscriptStream {
    fn listen(&mut self, timeout: Duration) -> Result<Option<Vec<String>>, SensorError> {
        let heard = self.inner.recv(timeout)?.map(|line| {
            line.transcripts
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        });
        Ok(heard.filter(|alternatives| !alternatives.is_empty()))
    }
}
