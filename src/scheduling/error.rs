use thiserror::Error;

/// Errors raised by the schedule engine.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("There are not enough station songs to generate a schedule. (listener {user_id} has {found})")]
    NotEnoughStationSongs { user_id: String, found: usize },

    #[error("Spin not found: {0}")]
    SpinNotFound(i64),

    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    #[error("Audio block not found: {0}")]
    AudioBlockNotFound(String),

    #[error("Invalid playlist position {position}: {reason}")]
    InvalidPosition { position: i64, reason: String },

    /// Duplicate or non-consecutive positions in a stored timeline. Needs manual repair.
    #[error("Schedule integrity violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ScheduleError {
    /// Storage failures are worth retrying with a fresh reload of the timeline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScheduleError::Storage(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ScheduleError::SpinNotFound(_)
                | ScheduleError::ListenerNotFound(_)
                | ScheduleError::AudioBlockNotFound(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::NotEnoughStationSongs { .. } => "not_enough_station_songs",
            ScheduleError::SpinNotFound(_)
            | ScheduleError::ListenerNotFound(_)
            | ScheduleError::AudioBlockNotFound(_) => "not_found",
            ScheduleError::InvalidPosition { .. } => "invalid_position",
            ScheduleError::InvariantViolation(_) => "invariant_violation",
            ScheduleError::Storage(_) => "storage",
        }
    }
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ScheduleError::Storage(anyhow::anyhow!("database is locked")).is_retryable());
        assert!(!ScheduleError::NotEnoughStationSongs {
            user_id: "u1".to_string(),
            found: 99
        }
        .is_retryable());
        assert!(!ScheduleError::SpinNotFound(1).is_retryable());
        assert!(!ScheduleError::InvariantViolation("dup".to_string()).is_retryable());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ScheduleError::SpinNotFound(1).is_not_found());
        assert!(ScheduleError::ListenerNotFound("u1".to_string()).is_not_found());
        assert!(!ScheduleError::Storage(anyhow::anyhow!("boom")).is_not_found());
        assert_eq!(ScheduleError::AudioBlockNotFound("b".to_string()).kind(), "not_found");
    }

    #[test]
    fn test_configuration_error_message() {
        let err = ScheduleError::NotEnoughStationSongs {
            user_id: "u1".to_string(),
            found: 99,
        };
        assert!(err
            .to_string()
            .starts_with("There are not enough station songs to generate a schedule."));
    }
}
