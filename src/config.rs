use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{AdvisorError, Result};
use crate::prioritizer::AffinityTable;
use crate::types::BackendKind;

/// Project-level config file, looked up at the analyzed root.
pub const PROJECT_CONFIG_FILE: &str = ".codeadvisor.toml";
/// Directory (relative to the analyzed root) holding cache and report.
pub const DEFAULT_STATE_DIR: &str = ".codeadvisor";
pub const ENV_PREFIX: &str = "CODEADVISOR";

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub backend: BackendConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub scanning: FileScanningConfig,
    pub diff: DiffConfig,
    pub output: OutputConfig,
    pub affinity: Option<AffinityTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: String,
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: None,
            max_tokens: 4096,
            temperature: 0.1,
        }
    }
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self.provider.as_str() {
            "ollama" | "lmstudio" | "local" => BackendKind::Local,
            _ => BackendKind::Remote,
        }
    }

    pub fn model(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider.as_str() {
            "ollama" => "qwen2.5-coder".to_string(),
            _ => "claude-3-5-sonnet-20241022".to_string(),
        }
    }

    /// Per-call timeout. Local backends fail faster than remote ones.
    pub fn timeout(&self) -> Duration {
        let default_secs = match self.kind() {
            BackendKind::Local => 60,
            BackendKind::Remote => 120,
        };
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs))
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| match self.provider.as_str() {
                "anthropic" => std::env::var("ANTHROPIC_API_KEY").ok(),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub concurrency: Option<usize>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub transient_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            transient_delay_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    /// Configured limit, or the provider default: rate-limited remote APIs get
    /// a small pool, local servers scale with the machine.
    pub fn effective_concurrency(&self, kind: BackendKind) -> usize {
        self.concurrency.unwrap_or_else(|| match kind {
            BackendKind::Remote => 4,
            BackendKind::Local => num_cpus::get().clamp(2, 16),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl CacheConfig {
    /// Cache directory resolved against the analyzed root.
    pub fn dir_for(&self, root: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            root.join(&self.dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileScanningConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub follow_symlinks: bool,
    pub max_depth: Option<usize>,
}

impl Default for FileScanningConfig {
    fn default() -> Self {
        Self {
            include_patterns: [
                "*.rs", "*.ts", "*.tsx", "*.js", "*.jsx", "*.mjs", "*.py", "*.go", "*.java",
                "*.kt", "*.rb", "*.php", "*.cs", "*.c", "*.h", "*.cpp", "*.hpp", "*.swift",
                "*.vue", "*.svelte",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            exclude_patterns: [
                "**/node_modules/**",
                "**/target/**",
                "**/dist/**",
                "**/build/**",
                "**/vendor/**",
                "**/.git/**",
                "**/.codeadvisor/**",
                "*.min.js",
                "*.d.ts",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            max_file_size: 512 * 1024,
            follow_symlinks: false,
            max_depth: Some(32),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub max_changed_lines: usize,
    pub min_token_savings: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_changed_lines: 100,
            min_token_savings: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub write_report: bool,
    pub report_file: String,
    pub verbose: bool,
    pub colors: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_report: true,
            report_file: "report.json".to_string(),
            verbose: false,
            colors: true,
        }
    }
}

impl AdvisorConfig {
    /// Layered load: user config dir, project file, explicit file, then
    /// `CODEADVISOR__SECTION__KEY` environment variables.
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(user_config) = Self::user_config_path() {
            debug!("Looking for user config at {:?}", user_config);
            builder = builder.add_source(config::File::from(user_config).required(false));
        }

        builder = builder.add_source(
            config::File::from(project_root.join(PROJECT_CONFIG_FILE))
                .format(config::FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: AdvisorConfig = builder
            .build()
            .map_err(|e| AdvisorError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AdvisorError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "codeadvisor", "codeadvisor")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.scheduler.concurrency {
            validate_concurrency(limit)?;
        }
        if self.scheduler.base_delay_ms > self.scheduler.max_delay_ms {
            return Err(AdvisorError::Config(format!(
                "scheduler.base_delay_ms ({}) exceeds scheduler.max_delay_ms ({})",
                self.scheduler.base_delay_ms, self.scheduler.max_delay_ms
            )));
        }
        if self.scanning.max_file_size == 0 {
            return Err(AdvisorError::Config("scanning.max_file_size must be positive".to_string()));
        }
        if self.backend.provider.trim().is_empty() {
            return Err(AdvisorError::Config("backend.provider must not be empty".to_string()));
        }
        Ok(())
    }
}

pub fn validate_concurrency(limit: usize) -> Result<()> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&limit) {
        Ok(())
    } else {
        Err(AdvisorError::InvalidConcurrency(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AdvisorConfig::default();
        assert_eq!(config.backend.provider, "anthropic");
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.diff.max_changed_lines, 100);
        assert_eq!(config.diff.min_token_savings, 500);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_defaults() {
        let mut backend = BackendConfig::default();
        assert_eq!(backend.kind(), BackendKind::Remote);
        assert_eq!(backend.timeout(), Duration::from_secs(120));

        backend.provider = "ollama".to_string();
        assert_eq!(backend.kind(), BackendKind::Local);
        assert_eq!(backend.timeout(), Duration::from_secs(60));
        assert_eq!(backend.model(), "qwen2.5-coder");

        backend.timeout_secs = Some(5);
        assert_eq!(backend.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_effective_concurrency() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.effective_concurrency(BackendKind::Remote), 4);
        let local = scheduler.effective_concurrency(BackendKind::Local);
        assert!((2..=16).contains(&local));

        let fixed = SchedulerConfig {
            concurrency: Some(7),
            ..SchedulerConfig::default()
        };
        assert_eq!(fixed.effective_concurrency(BackendKind::Local), 7);
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(validate_concurrency(1).is_ok());
        assert!(validate_concurrency(50).is_ok());
        assert!(matches!(validate_concurrency(0), Err(AdvisorError::InvalidConcurrency(0))));
        assert!(validate_concurrency(51).is_err());
    }

    #[test]
    fn test_load_project_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            r#"
[backend]
provider = "ollama"
model = "llama3.1"

[scheduler]
concurrency = 6

[diff]
max_changed_lines = 40
"#,
        )
        .unwrap();

        let config = AdvisorConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.backend.provider, "ollama");
        assert_eq!(config.backend.model(), "llama3.1");
        assert_eq!(config.scheduler.concurrency, Some(6));
        assert_eq!(config.diff.max_changed_lines, 40);
        assert_eq!(config.diff.min_token_savings, 500);
    }

    #[test]
    fn test_load_rejects_bad_concurrency() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("custom.toml");
        fs::write(&explicit, "[scheduler]\nconcurrency = 80\n").unwrap();

        let result = AdvisorConfig::load(dir.path(), Some(&explicit));
        assert!(matches!(result, Err(AdvisorError::InvalidConcurrency(80))));
    }

    #[test]
    fn test_cache_dir_resolution() {
        let cache = CacheConfig::default();
        assert_eq!(cache.dir_for(Path::new("/repo")), PathBuf::from("/repo/.codeadvisor"));

        let absolute = CacheConfig {
            enabled: true,
            dir: PathBuf::from("/var/cache/advisor"),
        };
        assert_eq!(absolute.dir_for(Path::new("/repo")), PathBuf::from("/var/cache/advisor"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = AdvisorConfig::default();
        config.backend.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
