pub mod progress;
pub mod result;
pub mod run;
pub mod suggestion;
pub mod task;

pub use progress::{silent_observer, ProgressObserver, ProgressPhase, ProgressSnapshot, IN_FLIGHT_PREVIEW};
pub use result::{AnalysisResult, AnalysisSummary, FailureKind, FileFailure, RunMetadata};
pub use run::{AnalysisMode, BackendId, BackendKind};
pub use suggestion::{LineRange, Severity, Suggestion, SuggestionCategory};
pub use task::AnalysisTask;
