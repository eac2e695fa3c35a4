pub mod pose;
pub mod wake;

use std::time::Duration;

use crate::{error::SensorError, types::KeypointFrame};

pub use pose::FallWatcher;
pub use wake::{WakeListener, WakePhrase};

/// How long a single sensor read may block before the loop re-checks its stop
/// signal.
pub const READ_SLICE: Duration = Duration::from_millis(200);

/// Supplies one pose per camera frame. `Ok(None)` means nothing usable arrived
/// within `timeout` (including "no person detected").
pub trait KeypointSource: Send {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<KeypointFrame>, SensorError>;
}

/// Supplies the alternative transcripts of one heard utterance. `Ok(None)`
/// means nothing intelligible within `timeout`.
pub trait TranscriptSource: Send {
    fn listen(&mut self, timeout: Duration) -> Result<Option<Vec<String>>, SensorError>;
}
