use serde::Serialize;

use crate::Mode;

/// Why `start` declined to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoChannelEnabled,
    AlreadyRunning,
}

/// Counters shared by every outcome of a session that ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub mode: Mode,
    /// Completed pulls
    pub iterations: u64,
    pub warnings: u32,
    /// Negotiated rate in Hz (0 if setup never completed)
    pub sample_rate: f64,
    pub total_duration_secs: f64,
}

/// The final outcome of an acquisition session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Guard rejection: nothing was changed and no remote call was made
    Rejected { reason: RejectReason },
    /// Single mode capture ran to its natural end
    Completed {
        #[serde(flatten)]
        stats: SessionStats,
    },
    /// User requested stop
    Stopped {
        #[serde(flatten)]
        stats: SessionStats,
    },
    /// A remote call failed; one reconnect was attempted
    Failed {
        #[serde(flatten)]
        stats: SessionStats,
        error: String,
        reconnected: bool,
    },
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Completed { .. } => "completed",
            Self::Stopped { .. } => "stopped",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn stats(&self) -> Option<&SessionStats> {
        match self {
            Self::Rejected { .. } => None,
            Self::Completed { stats } | Self::Stopped { stats } | Self::Failed { stats, .. } => {
                Some(stats)
            }
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } | Self::Stopped { .. } => 0,
            Self::Rejected { .. } => 1,
            Self::Failed { .. } => 2,
        }
    }
}
