//! codeadvisor: send a repository's source files (or just their diffs) to an
//! LLM backend and collect structured improvement suggestions.
//!
//! The entry point is [`AnalysisPipeline::run_analysis`]. It scans the tree,
//! settles what it can from the content-addressed cache, orders the rest and
//! runs it through a bounded-concurrency [`Scheduler`] with per-file retry.
//!
//! ```no_run
//! use codeadvisor::{create_backend, AdvisorConfig, AnalysisPipeline, RunOptions};
//! use std::path::Path;
//!
//! # async fn run() -> codeadvisor::Result<()> {
//! let root = Path::new(".");
//! let config = AdvisorConfig::load(root, None)?;
//! let backend = create_backend(&config.backend)?;
//! let result = AnalysisPipeline::new(config, backend)
//!     .run_analysis(root, RunOptions::default())
//!     .await?;
//! println!("{} suggestions", result.summary.total_suggestions);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod cli_types;
pub mod config;
pub mod context;
pub mod cost;
pub mod diff;
pub mod error;
pub mod pipeline;
pub mod prioritizer;
pub mod prompt;
pub mod report;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod types;
pub mod ui;
pub mod vcs;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Re-export commonly used types
pub use backend::{create_backend, Backend, BackendReply, Message, MessageRole, TokenUsage};
pub use cli::CliApp;
pub use config::AdvisorConfig;
pub use context::{detect, hash_context, ProjectContext};
pub use diff::{parse_unified_diff, DiffSet, DifferentialAnalyzer, FileDiff};
pub use error::{AdvisorError, BackendError, ErrorClass, Result};
pub use pipeline::{AnalysisPipeline, RunOptions};
pub use prioritizer::{prioritize, AffinityTable};
pub use scanner::{RepositoryScanner, ScanResult};
pub use scheduler::{RetryPolicy, ScheduleOutcome, Scheduler, WorkOutput};
pub use storage::{CacheEntry, CacheKey, CacheStore};
pub use types::*;
pub use ui::{OutputFormatter, ProgressIndicator, UIManager};
pub use vcs::{ChangedFile, GitCli, VersionControl};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global subscriber.
///
/// Console output goes to stderr, filtered by `CODEADVISOR_LOG` or `RUST_LOG`
/// (default `warn`, or `codeadvisor=debug` with `verbose`). With `log_file`,
/// events are also written there as JSON lines. Keep the returned guard alive
/// until exit so buffered file output is flushed. Repeated calls are no-ops.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let default_directive = if verbose { "warn,codeadvisor=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CODEADVISOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "codeadvisor.log".into());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    guard
}
