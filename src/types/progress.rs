use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of in-flight file names carried in a snapshot.
pub const IN_FLIGHT_PREVIEW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Scanning,
    Analyzing,
    Generating,
    Complete,
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProgressPhase::Scanning => "scanning",
            ProgressPhase::Analyzing => "analyzing",
            ProgressPhase::Generating => "generating",
            ProgressPhase::Complete => "complete",
        };
        write!(f, "{}", label)
    }
}

/// Point-in-time view of a run, emitted after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: ProgressPhase,
    pub completed: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub in_flight_files: Vec<String>,
    pub in_flight: usize,
    pub avg_time_per_file: Option<Duration>,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn new(phase: ProgressPhase, completed: usize, total: usize) -> Self {
        Self {
            phase,
            completed,
            total,
            current_file: None,
            in_flight_files: Vec::new(),
            in_flight: 0,
            avg_time_per_file: None,
            eta: None,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Observer for progress snapshots. Called from the scheduler's coordinator
/// loop, so implementations must return quickly.
pub type ProgressObserver = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// An observer that discards every snapshot.
pub fn silent_observer() -> ProgressObserver {
    Arc::new(|_: &ProgressSnapshot| {})
}
