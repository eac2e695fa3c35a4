use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("{sensor} unavailable: {reason}")]
    Unavailable { sensor: &'static str, reason: String },

    #[error("{0} stream disconnected")]
    Disconnected(&'static str),

    #[error("{sensor} read failed: {reason}")]
    Read { sensor: &'static str, reason: String },
}

impl SensorError {
    pub fn unavailable(sensor: &'static str, reason: impl ToString) -> Self {
        SensorError::Unavailable {
            sensor,
            reason: reason.to_string(),
        }
    }

    pub fn read(sensor: &'static str, reason: impl ToString) -> Self {
        SensorError::Read {
            sensor,
            reason: reason.to_string(),
        }
    }
}
