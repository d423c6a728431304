use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one pass of a leaf step through the interceptor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatStatus {
    /// The step is not done yet and must be invoked again.
    Continuable,
    /// The step is done.
    Finished,
}

impl RepeatStatus {
    pub fn is_continuable(&self) -> bool {
        matches!(self, Self::Continuable)
    }
}

impl fmt::Display for RepeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuable => write!(f, "CONTINUABLE"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Lifecycle state of a `JobExecution`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Launched, waiting for a worker
    #[default]
    Starting = 0,
    /// A worker is driving the step loop
    Started = 1,
    /// Stop requested, waiting for the running step to observe it
    Stopping = 2,
    Stopped = 3,
    /// Pause requested, applied at the next step boundary
    Pausing = 4,
    Paused = 5,
    Failed = 6,
    Completed = 7,
    Abandoned = 8,
}

impl JobStatus {
    /// A done execution will never change status again and can be superseded.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Done, or abandoned by its owner.
    pub fn is_terminal(&self) -> bool {
        self.is_done() || matches!(self, Self::Abandoned)
    }

    pub fn can_continue(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn is_pausing_or_paused(&self) -> bool {
        matches!(self, Self::Pausing | Self::Paused)
    }
}

impl From<u8> for JobStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Started,
            2 => Self::Stopping,
            3 => Self::Stopped,
            4 => Self::Pausing,
            5 => Self::Paused,
            6 => Self::Failed,
            7 => Self::Completed,
            _ => Self::Abandoned,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Pausing => "PAUSING",
            Self::Paused => "PAUSED",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
            Self::Abandoned => "ABANDONED",
        };

        f.write_str(name)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            "PAUSING" => Ok(Self::Pausing),
            "PAUSED" => Ok(Self::Paused),
            "FAILED" => Ok(Self::Failed),
            "COMPLETED" => Ok(Self::Completed),
            "ABANDONED" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 9] = [
        JobStatus::Starting,
        JobStatus::Started,
        JobStatus::Stopping,
        JobStatus::Stopped,
        JobStatus::Pausing,
        JobStatus::Paused,
        JobStatus::Failed,
        JobStatus::Completed,
        JobStatus::Abandoned,
    ];

    #[test]
    fn test_done_states() {
        assert!(JobStatus::Completed.is_done());
        assert!(JobStatus::Failed.is_done());
        assert!(JobStatus::Stopped.is_done());
        assert!(!JobStatus::Stopping.is_done());
        assert!(!JobStatus::Started.is_done());
        assert!(!JobStatus::Abandoned.is_done());
        assert!(JobStatus::Abandoned.is_terminal());
    }

    #[test]
    fn test_default_is_starting() {
        assert_eq!(JobStatus::default(), JobStatus::Starting);
    }

    #[test]
    fn test_only_started_can_continue() {
        for status in ALL {
            assert_eq!(status.can_continue(), status == JobStatus::Started);
        }
    }

    #[test]
    fn test_u8_packing() {
        for status in ALL {
            assert_eq!(JobStatus::from(status as u8), status);
        }
    }

    #[test]
    fn test_status_string_conversion() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");

        let json = serde_json::to_string(&RepeatStatus::Continuable).unwrap();
        assert_eq!(json, "\"CONTINUABLE\"");
        assert_eq!(
            serde_json::from_str::<RepeatStatus>("\"FINISHED\"").unwrap(),
            RepeatStatus::Finished
        );
    }
}
