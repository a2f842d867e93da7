//! Project context detection.
//!
//! Looks at root-level manifests once per run to classify the ecosystem,
//! framework, tooling and conventions. The fingerprint folded into cache keys
//! only covers the fields that change what a backend would say about a file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const UNKNOWN_PROJECT: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTools {
    pub package_manager: Option<String>,
    pub bundler: Option<String>,
    pub test_framework: Option<String>,
    pub linter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConventions {
    pub strict: bool,
    pub target: Option<String>,
    pub has_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_type: String,
    pub framework: Option<String>,
    pub tools: ProjectTools,
    pub conventions: ProjectConventions,
}

impl Default for ProjectContext {
    fn default() -> Self {
        Self {
            project_type: UNKNOWN_PROJECT.to_string(),
            framework: None,
            tools: ProjectTools::default(),
            conventions: ProjectConventions::default(),
        }
    }
}

impl ProjectContext {
    pub fn is_unknown(&self) -> bool {
        self.project_type == UNKNOWN_PROJECT
    }

    /// One-line description used in prompts.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.project_type.clone()];
        if let Some(framework) = &self.framework {
            parts.push(format!("framework: {}", framework));
        }
        if let Some(tests) = &self.tools.test_framework {
            parts.push(format!("tests: {}", tests));
        }
        if let Some(linter) = &self.tools.linter {
            parts.push(format!("linter: {}", linter));
        }
        if self.conventions.strict {
            parts.push("strict mode".to_string());
        }
        parts.join(", ")
    }
}

/// Signature tables: (dependency name, label). First match wins.
const JS_FRAMEWORKS: &[(&str, &str)] = &[
    ("next", "nextjs"),
    ("nuxt", "nuxt"),
    ("@angular/core", "angular"),
    ("@nestjs/core", "nestjs"),
    ("svelte", "svelte"),
    ("vue", "vue"),
    ("react", "react"),
    ("express", "express"),
    ("fastify", "fastify"),
];
const JS_BUNDLERS: &[(&str, &str)] = &[
    ("vite", "vite"),
    ("webpack", "webpack"),
    ("esbuild", "esbuild"),
    ("rollup", "rollup"),
    ("parcel", "parcel"),
];
const JS_TEST_FRAMEWORKS: &[(&str, &str)] = &[
    ("vitest", "vitest"),
    ("jest", "jest"),
    ("mocha", "mocha"),
    ("@playwright/test", "playwright"),
];
const JS_LINTERS: &[(&str, &str)] = &[("@biomejs/biome", "biome"), ("eslint", "eslint")];
const JS_LOCKFILES: &[(&str, &str)] = &[
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "yarn"),
    ("bun.lockb", "bun"),
    ("package-lock.json", "npm"),
];

const RUST_FRAMEWORKS: &[(&str, &str)] = &[
    ("axum", "axum"),
    ("actix-web", "actix-web"),
    ("rocket", "rocket"),
    ("warp", "warp"),
    ("tauri", "tauri"),
    ("bevy", "bevy"),
];

const PYTHON_FRAMEWORKS: &[(&str, &str)] = &[
    ("django", "django"),
    ("fastapi", "fastapi"),
    ("flask", "flask"),
];
const PYTHON_TEST_FRAMEWORKS: &[(&str, &str)] = &[("pytest", "pytest")];
const PYTHON_LINTERS: &[(&str, &str)] = &[("ruff", "ruff"), ("flake8", "flake8"), ("pylint", "pylint")];

const GO_FRAMEWORKS: &[(&str, &str)] = &[
    ("github.com/gin-gonic/gin", "gin"),
    ("github.com/labstack/echo", "echo"),
    ("github.com/gofiber/fiber", "fiber"),
];

const TEST_DIRS: &[&str] = &["tests", "test", "__tests__", "spec"];

/// Classify the project at `root`. Never fails; unreadable or malformed
/// manifests fall through to the next signal and finally to `unknown`.
pub fn detect(root: &Path) -> ProjectContext {
    let detected = detect_node(root)
        .or_else(|| detect_rust(root))
        .or_else(|| detect_python(root))
        .or_else(|| detect_go(root));

    let mut context = detected.unwrap_or_default();
    if !context.conventions.has_tests {
        context.conventions.has_tests = TEST_DIRS.iter().any(|d| root.join(d).is_dir());
    }
    debug!("Detected project context: {}", context.describe());
    context
}

/// Stable short hash over the cache-relevant subset of the context.
pub fn hash_context(context: &ProjectContext) -> String {
    let relevant = serde_json::json!({
        "type": context.project_type,
        "framework": context.framework,
        "strict": context.conventions.strict,
    });
    // Key order is fixed, so the serialized form is stable across runs.
    let digest = Sha256::digest(relevant.to_string().as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

fn detect_node(root: &Path) -> Option<ProjectContext> {
    let manifest_path = root.join("package.json");
    if !manifest_path.is_file() {
        return None;
    }

    let manifest = read_json(&manifest_path)?;

    let deps = collect_js_dependencies(&manifest);
    let has_tsconfig = root.join("tsconfig.json").is_file();
    let project_type = if has_tsconfig || deps.contains_key("typescript") {
        "typescript"
    } else {
        "javascript"
    };

    let mut context = ProjectContext {
        project_type: project_type.to_string(),
        framework: match_signature(JS_FRAMEWORKS, |name| deps.contains_key(name)),
        ..ProjectContext::default()
    };

    context.tools.package_manager = JS_LOCKFILES
        .iter()
        .find(|(file, _)| root.join(file).is_file())
        .map(|(_, label)| label.to_string())
        .or_else(|| Some("npm".to_string()));
    context.tools.bundler = match_signature(JS_BUNDLERS, |name| deps.contains_key(name));
    context.tools.test_framework = match_signature(JS_TEST_FRAMEWORKS, |name| deps.contains_key(name));
    context.tools.linter = match_signature(JS_LINTERS, |name| deps.contains_key(name));
    context.conventions.has_tests = context.tools.test_framework.is_some();

    if has_tsconfig {
        if let Some(tsconfig) = read_json(&root.join("tsconfig.json")) {
            let options = &tsconfig["compilerOptions"];
            context.conventions.strict = options["strict"].as_bool().unwrap_or(false);
            context.conventions.target = options["target"].as_str().map(|t| t.to_lowercase());
        }
    }

    Some(context)
}

fn collect_js_dependencies(manifest: &Value) -> BTreeMap<String, String> {
    let mut deps = BTreeMap::new();
    for section in ["dependencies", "devDependencies", "peerDependencies"] {
        if let Some(entries) = manifest[section].as_object() {
            for (name, version) in entries {
                deps.insert(name.clone(), version.as_str().unwrap_or_default().to_string());
            }
        }
    }
    deps
}

fn detect_rust(root: &Path) -> Option<ProjectContext> {
    let manifest_path = root.join("Cargo.toml");
    if !manifest_path.is_file() {
        return None;
    }

    let manifest: toml::Value = match fs::read_to_string(&manifest_path)
        .ok()
        .and_then(|s| s.parse::<toml::Value>().ok())
    {
        Some(value) => value,
        None => {
            debug!("Ignoring malformed Cargo.toml at {:?}", manifest_path);
            return None;
        }
    };

    let mut deps: Vec<String> = Vec::new();
    for section in ["dependencies", "dev-dependencies"] {
        if let Some(table) = manifest.get(section).and_then(|v| v.as_table()) {
            deps.extend(table.keys().cloned());
        }
        if let Some(table) = manifest
            .get("workspace")
            .and_then(|w| w.get(section))
            .and_then(|v| v.as_table())
        {
            deps.extend(table.keys().cloned());
        }
    }

    let mut context = ProjectContext {
        project_type: "rust".to_string(),
        framework: match_signature(RUST_FRAMEWORKS, |name| deps.iter().any(|d| d == name)),
        ..ProjectContext::default()
    };
    context.tools.package_manager = Some("cargo".to_string());
    context.tools.test_framework = Some("cargo-test".to_string());
    context.tools.linter = Some("clippy".to_string());
    context.conventions.strict = true;
    context.conventions.target = manifest
        .get("package")
        .and_then(|p| p.get("edition"))
        .and_then(|e| e.as_str())
        .map(|e| format!("edition-{}", e));

    Some(context)
}

fn detect_python(root: &Path) -> Option<ProjectContext> {
    let pyproject = root.join("pyproject.toml");
    let requirements = root.join("requirements.txt");
    if !pyproject.is_file() && !requirements.is_file() {
        return None;
    }

    // Dependency names are matched textually; pyproject layouts vary too much
    // between poetry, PEP 621 and hatch to walk structurally.
    let mut text = String::new();
    for path in [&pyproject, &requirements] {
        if let Ok(content) = fs::read_to_string(path) {
            text.push_str(&content.to_lowercase());
            text.push('\n');
        }
    }
    let mentions = |name: &str| text.contains(name);

    let mut context = ProjectContext {
        project_type: "python".to_string(),
        framework: match_signature(PYTHON_FRAMEWORKS, mentions),
        ..ProjectContext::default()
    };
    context.tools.package_manager = if root.join("uv.lock").is_file() {
        Some("uv".to_string())
    } else if root.join("poetry.lock").is_file() || text.contains("[tool.poetry]") {
        Some("poetry".to_string())
    } else {
        Some("pip".to_string())
    };
    context.tools.test_framework = match_signature(PYTHON_TEST_FRAMEWORKS, mentions);
    context.tools.linter = match_signature(PYTHON_LINTERS, mentions);
    context.conventions.strict = text.contains("[tool.mypy]") && text.contains("strict = true");
    context.conventions.has_tests = context.tools.test_framework.is_some();

    Some(context)
}

fn detect_go(root: &Path) -> Option<ProjectContext> {
    let manifest_path = root.join("go.mod");
    let text = fs::read_to_string(&manifest_path).ok()?;

    let mut context = ProjectContext {
        project_type: "go".to_string(),
        framework: match_signature(GO_FRAMEWORKS, |name| text.contains(name)),
        ..ProjectContext::default()
    };
    context.tools.package_manager = Some("go-modules".to_string());
    context.tools.test_framework = Some("go-test".to_string());
    context.conventions.target = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("go "))
        .map(|v| format!("go{}", v.trim()));

    Some(context)
}

fn match_signature<F>(table: &[(&str, &str)], is_present: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    table
        .iter()
        .find(|(name, _)| is_present(name))
        .map(|(_, label)| label.to_string())
}

fn read_json(path: &Path) -> Option<Value> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring malformed JSON at {:?}: {}", path, e);
            None
        }
    }
}
