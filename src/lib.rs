pub mod alert;
pub mod config;
pub mod error;
pub mod fall;
pub mod location;
pub mod model_download;
pub mod orchestrator;
pub mod pipeline;
pub mod presence;
pub mod race;
pub mod signal;
pub mod speech;
pub mod types;
pub mod watch;
pub mod worker;

pub use error::SensorError;
pub use fall::{FallConfig, FallState, FallStateMachine};
pub use orchestrator::{EpisodeOutcome, Orchestrator};
pub use presence::{PresenceOptions, PresenceProbe};
pub use race::{DetectorRace, RaceOutcome};
