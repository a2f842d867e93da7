use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::{
    backend::create_backend,
    cli_types::{AnalyzeArgs, CacheAction, CacheArgs, ConfigArgs},
    config::{AdvisorConfig, OutputConfig},
    pipeline::{describe_project, AnalysisPipeline, RunOptions},
    storage::{CacheStore, RETENTION_DAYS},
    types::{silent_observer, AnalysisMode, AnalysisResult},
    ui::UIManager,
    vcs::GitCli,
};

pub struct CliApp {
    config_path: Option<PathBuf>,
    verbose: bool,
    colors_enabled: bool,
}

/// Effective terminal settings once flags and the `[output]` section are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    pub verbose: bool,
    pub colors: bool,
}

impl CliApp {
    pub fn new(config_path: Option<PathBuf>, verbose: bool, colors_enabled: bool) -> Result<Self> {
        info!("Initializing codeadvisor CLI");
        Ok(Self {
            config_path,
            verbose,
            colors_enabled,
        })
    }

    fn load_config(&self, root: &Path) -> Result<AdvisorConfig> {
        AdvisorConfig::load(root, self.config_path.as_deref())
            .with_context(|| format!("Failed to load configuration for {}", root.display()))
    }

    /// `--verbose` can only add detail and `--no-color` can only remove colour.
    pub fn output_settings(&self, output: &OutputConfig) -> OutputSettings {
        OutputSettings {
            verbose: self.verbose || output.verbose,
            colors: self.colors_enabled && output.colors,
        }
    }

    fn ui_for(&self, settings: OutputSettings) -> Result<UIManager> {
        UIManager::new(settings.colors).context("Failed to create UI manager")
    }

    /// Returns the finished result so `main` can pick an exit code.
    pub async fn analyze(&self, args: AnalyzeArgs) -> Result<AnalysisResult> {
        let mut config = self.load_config(&args.path)?;
        if let Some(provider) = args.provider {
            config.backend.provider = provider;
        }
        if let Some(model) = args.model {
            config.backend.model = Some(model);
        }
        config.validate().context("Invalid configuration")?;

        let mode = AnalysisMode::from(args.mode);
        let backend = create_backend(&config.backend).context("Failed to set up the backend")?;
        let settings = self.output_settings(&config.output);
        let ui = self.ui_for(settings)?;

        if !args.json {
            ui.print_header("Repository Analysis");
            ui.print_info(&format!(
                "Analyzing {} ({} mode) with {}",
                args.path.display(),
                mode,
                backend.id()
            ));
            if settings.verbose {
                ui.print_info(&format!(
                    "Include patterns: {:?}",
                    config.scanning.include_patterns
                ));
                ui.print_info(&format!(
                    "Exclude patterns: {:?}",
                    config.scanning.exclude_patterns
                ));
            }
        }

        let progress = (!args.json).then(|| ui.progress.create_analysis_progress());
        let observer = match &progress {
            Some(bar) => ui.progress.observer_for(bar.clone()),
            None => silent_observer(),
        };

        let pipeline = AnalysisPipeline::new(config, backend).with_version_control(Arc::new(GitCli::new()));
        let options = RunOptions {
            mode,
            concurrency: args.concurrency.map(usize::from),
            use_cache: !args.no_cache,
            observer,
        };

        let outcome = pipeline.run_analysis(&args.path, options).await;
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        let result = outcome.with_context(|| format!("Analysis of {} failed", args.path.display()))?;

        if args.json {
            let json = serde_json::to_string_pretty(&result).context("Failed to serialize result to JSON")?;
            println!("{}", json);
            return Ok(result);
        }

        println!();
        println!(
            "{}",
            ui.formatter.format_suggestions(&result.suggestions, Some(args.limit))
        );
        println!();
        println!("{}", ui.formatter.format_analysis_summary(&result));

        if !result.failures.is_empty() {
            ui.print_warning(&format!("{} file(s) could not be analyzed:", result.failures.len()));
            eprintln!("{}", ui.formatter.format_failures(&result));
        }
        if result.has_user_actionable_failures() {
            ui.print_error_with_suggestions(
                &format!(
                    "{} file(s) failed with authentication or quota errors",
                    result.summary.auth_failures
                ),
                Some("Check your API key (ANTHROPIC_API_KEY or backend.api_key) and account billing."),
            );
        } else if result.summary.files_failed == 0 {
            ui.print_success("Analysis complete");
        }

        Ok(result)
    }

    pub async fn cache(&self, args: CacheArgs) -> Result<()> {
        let root = args.action.path().clone();
        let config = self.load_config(&root)?;
        let ui = self.ui_for(self.output_settings(&config.output))?;
        let dir = config.cache.dir_for(&root);
        let mut store = CacheStore::load(&dir).await;

        match args.action {
            CacheAction::Stats { .. } => {
                ui.print_header("Cache");
                ui.print_info(&format!("Location: {}", CacheStore::path_in(&dir).display()));
                println!("{}", ui.formatter.format_cache_stats(&store.stats()));
            }
            CacheAction::Clear { .. } => {
                let removed = store.len();
                store.clear();
                store
                    .save(&dir)
                    .await
                    .with_context(|| format!("Failed to write cache in {}", dir.display()))?;
                ui.print_success(&format!("Removed {} cache entries", removed));
            }
            CacheAction::Prune { .. } => {
                // Loading already dropped expired entries; saving persists that.
                store
                    .save(&dir)
                    .await
                    .with_context(|| format!("Failed to write cache in {}", dir.display()))?;
                ui.print_success(&format!(
                    "Cache pruned: {} entries within the {}-day window",
                    store.len(),
                    RETENTION_DAYS
                ));
            }
        }
        Ok(())
    }

    pub async fn show_config(&self, args: ConfigArgs) -> Result<()> {
        let config = self.load_config(&args.path)?;
        let ui = self.ui_for(self.output_settings(&config.output))?;
        ui.print_header("Configuration");

        let json = serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
        println!("{}", json);

        if let Some(user) = AdvisorConfig::user_config_path() {
            ui.print_info(&format!("User config: {}", user.display()));
        }
        let api_key_status = if config.backend.api_key().is_some() {
            "set"
        } else {
            "not set"
        };
        ui.print_info(&format!("API key: {}", api_key_status));

        let (project, fingerprint) = describe_project(&args.path);
        ui.print_header("Project Context");
        ui.print_info(&format!("Detected: {}", project.describe()));
        ui.print_info(&format!("Fingerprint: {}", fingerprint));
        Ok(())
    }
}
