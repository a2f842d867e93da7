//! Work ordering.
//!
//! Scores are a latency heuristic: small, central, well-supported files go
//! first so the user sees useful results early. Ordering never affects which
//! files are analyzed or what they produce.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AnalysisTask, BackendId};

pub const BASE_SCORE: i32 = 50;

const SMALL_FILE: u64 = 10 * 1024;
const MEDIUM_FILE: u64 = 50 * 1024;
const LARGE_FILE: u64 = 100 * 1024;

const SMALL_BONUS: i32 = 20;
const MEDIUM_BONUS: i32 = 10;
const LARGE_PENALTY: i32 = -20;
const ENTRY_POINT_BONUS: i32 = 15;
const CONFIG_BONUS: i32 = 10;
const TEST_PENALTY: i32 = -15;

const ENTRY_POINTS: &[&str] = &[
    "main", "index", "app", "lib", "mod", "server", "cli", "__init__", "__main__",
];
const CONFIG_STEMS: &[&str] = &["config", "settings", "setup", "routes", "router"];

/// Per-provider language fit, keyed by lowercase extension.
///
/// Providers missing from the table use `"*"` if present; extensions missing
/// from a provider's map score `default_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityTable {
    pub providers: HashMap<String, HashMap<String, i32>>,
    pub default_score: i32,
}

impl Default for AffinityTable {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "anthropic".to_string(),
            scores(&[
                ("rs", 25),
                ("ts", 25),
                ("tsx", 25),
                ("py", 25),
                ("js", 20),
                ("jsx", 20),
                ("go", 20),
                ("java", 15),
                ("kt", 15),
                ("rb", 15),
                ("cs", 15),
                ("cpp", 15),
                ("c", 15),
                ("swift", 10),
                ("php", 10),
            ]),
        );
        providers.insert(
            "ollama".to_string(),
            scores(&[
                ("py", 25),
                ("js", 20),
                ("ts", 20),
                ("go", 15),
                ("rs", 15),
                ("java", 10),
                ("c", 10),
                ("cpp", 10),
            ]),
        );
        Self {
            providers,
            default_score: 5,
        }
    }
}

fn scores(pairs: &[(&str, i32)]) -> HashMap<String, i32> {
    pairs.iter().map(|(ext, score)| (ext.to_string(), *score)).collect()
}

impl AffinityTable {
    pub fn score(&self, provider: &str, extension: &str) -> i32 {
        self.providers
            .get(provider)
            .or_else(|| self.providers.get("*"))
            .and_then(|by_ext| by_ext.get(extension))
            .copied()
            .unwrap_or(self.default_score)
    }
}

pub fn score(task: &AnalysisTask, backend: &BackendId, affinity: &AffinityTable) -> i32 {
    let mut total = BASE_SCORE + affinity.score(&backend.provider, &task.extension);

    total += match task.size {
        s if s < SMALL_FILE => SMALL_BONUS,
        s if s < MEDIUM_FILE => MEDIUM_BONUS,
        s if s > LARGE_FILE => LARGE_PENALTY,
        _ => 0,
    };

    let name = task.file_name().to_lowercase();
    let stem = name.split('.').next().unwrap_or(&name);
    if is_test_file(&task.relative_path, &name) {
        total += TEST_PENALTY;
    } else if ENTRY_POINTS.contains(&stem) {
        total += ENTRY_POINT_BONUS;
    } else if CONFIG_STEMS.iter().any(|c| stem.contains(c)) {
        total += CONFIG_BONUS;
    }

    total
}

fn is_test_file(relative_path: &str, name: &str) -> bool {
    name.contains(".test.")
        || name.contains(".spec.")
        || name.starts_with("test_")
        || name.ends_with("_test.go")
        || name.ends_with("_test.py")
        || relative_path
            .split('/')
            .any(|part| matches!(part, "tests" | "test" | "__tests__" | "spec"))
}

/// Order tasks by descending score. Equal scores keep their input order.
pub fn prioritize(
    files: Vec<AnalysisTask>,
    backend: &BackendId,
    affinity: &AffinityTable,
) -> Vec<AnalysisTask> {
    let mut scored: Vec<(i32, AnalysisTask)> = files
        .into_iter()
        .map(|task| (score(&task, backend, affinity), task))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, task)| task).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::{Path, PathBuf};

    fn task(relative: &str, size: u64) -> AnalysisTask {
        AnalysisTask::new(Path::new("/repo"), PathBuf::from("/repo").join(relative), size)
    }

    fn claude() -> BackendId {
        BackendId::new("anthropic", "claude-3-5-sonnet-20241022")
    }

    #[test]
    fn test_small_beats_large() {
        let affinity = AffinityTable::default();
        let ordered = prioritize(
            vec![task("src/big.rs", 200 * 1024), task("src/small.rs", 1024)],
            &claude(),
            &affinity,
        );
        assert_eq!(ordered[0].relative_path, "src/small.rs");
    }

    #[test]
    fn test_entry_points_before_tests() {
        let affinity = AffinityTable::default();
        let ordered = prioritize(
            vec![
                task("tests/integration.rs", 2048),
                task("src/helpers.rs", 2048),
                task("src/main.rs", 2048),
            ],
            &claude(),
            &affinity,
        );
        let names: Vec<_> = ordered.iter().map(|t| t.relative_path.as_str()).collect();
        assert_eq!(names, vec!["src/main.rs", "src/helpers.rs", "tests/integration.rs"]);
    }

    #[test]
    fn test_unknown_pairs_get_default() {
        let affinity = AffinityTable::default();
        assert_eq!(affinity.score("anthropic", "cobol"), 5);
        assert_eq!(affinity.score("newprovider", "rs"), 5);
        assert_eq!(affinity.score("anthropic", "rs"), 25);
    }

    #[test]
    fn test_wildcard_provider() {
        let mut affinity = AffinityTable::default();
        affinity.providers.insert("*".to_string(), scores(&[("rs", 40)]));
        assert_eq!(affinity.score("newprovider", "rs"), 40);
        assert_eq!(affinity.score("anthropic", "rs"), 25);
    }

    #[test]
    fn test_ties_keep_scan_order() {
        let affinity = AffinityTable::default();
        let files = vec![task("src/b.rs", 100), task("src/a.rs", 100), task("src/c.rs", 100)];
        let ordered = prioritize(files.clone(), &claude(), &affinity);
        assert_eq!(ordered, files);
    }

    #[test]
    fn test_affinity_table_from_toml() {
        let table: AffinityTable = toml::from_str(
            r#"
default_score = 1

[providers.ollama]
rs = 30
"#,
        )
        .unwrap();
        assert_eq!(table.score("ollama", "rs"), 30);
        assert_eq!(table.score("ollama", "py"), 1);
    }

    proptest! {
        #[test]
        fn prop_prioritize_is_a_permutation(sizes in proptest::collection::vec(0u64..300_000, 0..40)) {
            let files: Vec<AnalysisTask> = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| task(&format!("src/f{}.rs", i), *size))
                .collect();
            let ordered = prioritize(files.clone(), &claude(), &AffinityTable::default());

            prop_assert_eq!(ordered.len(), files.len());
            let mut a: Vec<_> = files.iter().map(|t| t.relative_path.clone()).collect();
            let mut b: Vec<_> = ordered.iter().map(|t| t.relative_path.clone()).collect();
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);

            let affinity = AffinityTable::default();
            for pair in ordered.windows(2) {
                prop_assert!(score(&pair[0], &claude(), &affinity) >= score(&pair[1], &claude(), &affinity));
            }
        }
    }
}
