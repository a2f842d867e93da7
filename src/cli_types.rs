use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::types::AnalysisMode;

#[derive(Parser, Debug)]
#[command(name = "codeadvisor")]
#[command(about = "Send a repository's source files to an LLM and collect improvement suggestions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Additional configuration file, applied over user and project config
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write JSON logs to this file
    #[arg(long, global = true, value_name = "FILE", env = "CODEADVISOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a repository and print suggestions
    Analyze(AnalyzeArgs),

    /// Inspect or maintain the analysis cache
    Cache(CacheArgs),

    /// Show the effective configuration and detected project context
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Full,
    Incremental,
    Staged,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => AnalysisMode::Full,
            ModeArg::Incremental => AnalysisMode::Incremental,
            ModeArg::Staged => AnalysisMode::Staged,
        }
    }
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Repository root
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Which files to analyze
    #[arg(short, long, value_enum, default_value = "full")]
    pub mode: ModeArg,

    /// Maximum concurrent backend calls (1-50)
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u16).range(1..=50))]
    pub concurrency: Option<u16>,

    /// Backend provider (anthropic, ollama)
    #[arg(long, env = "CODEADVISOR_PROVIDER")]
    pub provider: Option<String>,

    /// Model name for the provider
    #[arg(long, env = "CODEADVISOR_MODEL")]
    pub model: Option<String>,

    /// Ignore and do not update the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Print the full result as JSON instead of the summary
    #[arg(long)]
    pub json: bool,

    /// Maximum suggestions printed (the report always has all)
    #[arg(long, default_value = "25")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and age range
    Stats {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Delete every cache entry
    Clear {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Drop entries past the retention window
    Prune {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

impl CacheAction {
    pub fn path(&self) -> &PathBuf {
        match self {
            CacheAction::Stats { path } | CacheAction::Clear { path } | CacheAction::Prune { path } => path,
        }
    }
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Repository root used for project config and context detection
    #[arg(default_value = ".")]
    pub path: PathBuf,
}
