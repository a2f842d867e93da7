//! Persistent, content-addressed analysis cache.
//!
//! One JSON document per analyzed root, keyed by relative path. An entry is
//! only reused when the file bytes, backend, prompt version, prompt mode and
//! project context fingerprint all match what produced it. Diff-mode entries
//! also hash the diff text, so they never stand in for a full-file analysis.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::prompt::PromptMode;
use crate::types::{BackendId, Suggestion};

pub const CACHE_FILE: &str = "cache.json";
pub const CACHE_FORMAT_VERSION: u32 = 3;
pub const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub suggestions: Vec<Suggestion>,
    pub last_modified: DateTime<Utc>,
    pub backend: BackendId,
    pub prompt_version: String,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    pub context_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
}

impl CacheEntry {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_modified > ChronoDuration::days(RETENTION_DAYS)
    }

    fn matches(&self, hash: &str, key: &CacheKey<'_>) -> bool {
        self.content_hash == hash
            && &self.backend == key.backend
            && self.prompt_version == key.prompt_version
            && self.prompt_mode == key.prompt_mode
            && self.context_fingerprint == key.context_fingerprint
    }
}

/// Everything besides file content that decides whether an entry is reusable.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub backend: &'a BackendId,
    pub prompt_version: &'a str,
    pub prompt_mode: PromptMode,
    pub context_fingerprint: &'a str,
}

impl<'a> CacheKey<'a> {
    pub fn with_mode(self, prompt_mode: PromptMode) -> Self {
        Self { prompt_mode, ..self }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_suggestions: usize,
    pub total_tokens: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStore {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            entries: HashMap::new(),
        }
    }
}

impl CacheStore {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CACHE_FILE)
    }

    /// Load the store from `dir`. A missing, unreadable, corrupt or
    /// old-format file yields an empty store. Stale entries are dropped.
    pub async fn load(dir: &Path) -> Self {
        let path = Self::path_in(dir);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read cache {:?}: {}", path, e);
                }
                return Self::default();
            }
        };

        let mut store = match serde_json::from_str::<CacheStore>(&raw) {
            Ok(store) if store.version == CACHE_FORMAT_VERSION => store,
            Ok(store) => {
                info!(
                    "Discarding cache with format version {} (expected {})",
                    store.version, CACHE_FORMAT_VERSION
                );
                return Self::default();
            }
            Err(e) => {
                warn!("Ignoring corrupt cache {:?}: {}", path, e);
                return Self::default();
            }
        };

        let evicted = store.evict_stale();
        if evicted > 0 {
            debug!("Evicted {} stale cache entries", evicted);
        }
        store
    }

    /// Rewrite the whole store through a temp file and rename.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let path = Self::path_in(dir);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved {} cache entries to {:?}", self.entries.len(), path);
        Ok(())
    }

    pub fn content_hash(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    /// Hash for a diff-mode entry: the file bytes plus the diff that was sent.
    pub fn diff_hash(bytes: &[u8], diff_text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        hasher.update(&[0]);
        hasher.update(diff_text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Cached suggestions for `path`, if the entry was produced from these exact
    /// bytes under the same key and is within the retention window.
    pub fn get(&self, path: &str, bytes: &[u8], key: &CacheKey<'_>) -> Option<&[Suggestion]> {
        self.lookup(path, &Self::content_hash(bytes), key)
            .map(|entry| entry.suggestions.as_slice())
    }

    /// Like [`get`](Self::get) with a precomputed hash; returns the whole entry.
    pub fn lookup(&self, path: &str, content_hash: &str, key: &CacheKey<'_>) -> Option<&CacheEntry> {
        let entry = self.entries.get(path)?;
        if entry.is_stale(Utc::now()) || !entry.matches(content_hash, key) {
            return None;
        }
        Some(entry)
    }

    pub fn put(
        &mut self,
        path: impl Into<String>,
        content_hash: impl Into<String>,
        suggestions: Vec<Suggestion>,
        key: &CacheKey<'_>,
        token_count: Option<u64>,
    ) {
        self.entries.insert(
            path.into(),
            CacheEntry {
                content_hash: content_hash.into(),
                suggestions,
                last_modified: Utc::now(),
                backend: key.backend.clone(),
                prompt_version: key.prompt_version.to_string(),
                prompt_mode: key.prompt_mode,
                context_fingerprint: key.context_fingerprint.to_string(),
                token_count,
            },
        );
    }

    pub fn remove(&mut self, path: &str) -> Option<CacheEntry> {
        self.entries.remove(path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn evict_stale(&mut self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.values().fold(
            CacheStats {
                entries: self.entries.len(),
                ..CacheStats::default()
            },
            |mut stats, entry| {
                stats.total_suggestions += entry.suggestions.len();
                stats.total_tokens += entry.token_count.unwrap_or(0);
                stats.oldest = Some(stats.oldest.map_or(entry.last_modified, |o| o.min(entry.last_modified)));
                stats.newest = Some(stats.newest.map_or(entry.last_modified, |n| n.max(entry.last_modified)));
                stats
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, SuggestionCategory};
    use tempfile::TempDir;

    fn backend() -> BackendId {
        BackendId::new("anthropic", "claude-3-5-sonnet-20241022")
    }

    fn suggestion() -> Suggestion {
        Suggestion::new("src/a.rs", SuggestionCategory::Bug, Severity::High, "off by one")
    }

    fn stored(bytes: &[u8]) -> CacheStore {
        let backend = backend();
        let key = CacheKey {
            backend: &backend,
            prompt_version: "v1",
            prompt_mode: PromptMode::Full,
            context_fingerprint: "abc123",
        };
        let mut store = CacheStore::default();
        store.put("src/a.rs", CacheStore::content_hash(bytes), vec![suggestion()], &key, Some(900));
        store
    }

    #[test]
    fn test_hit_requires_every_key_component() {
        let store = stored(b"fn a() {}");
        let backend = backend();
        let key = CacheKey {
            backend: &backend,
            prompt_version: "v1",
            prompt_mode: PromptMode::Full,
            context_fingerprint: "abc123",
        };
        assert_eq!(store.get("src/a.rs", b"fn a() {}", &key).map(|s| s.len()), Some(1));

        assert!(store.get("src/a.rs", b"fn a() { }", &key).is_none());
        assert!(store.get("src/b.rs", b"fn a() {}", &key).is_none());

        let other_model = BackendId::new("anthropic", "claude-3-5-haiku-20241022");
        let by_backend = CacheKey {
            backend: &other_model,
            ..key
        };
        assert!(store.get("src/a.rs", b"fn a() {}", &by_backend).is_none());

        let by_prompt = CacheKey {
            prompt_version: "v2",
            ..key
        };
        assert!(store.get("src/a.rs", b"fn a() {}", &by_prompt).is_none());

        let by_context = CacheKey {
            context_fingerprint: "def456",
            ..key
        };
        assert!(store.get("src/a.rs", b"fn a() {}", &by_context).is_none());

        let by_mode = key.with_mode(PromptMode::Diff);
        assert!(store.get("src/a.rs", b"fn a() {}", &by_mode).is_none());
    }

    #[test]
    fn test_diff_entry_never_serves_full_lookup() {
        let backend = backend();
        let full = CacheKey {
            backend: &backend,
            prompt_version: "v1",
            prompt_mode: PromptMode::Full,
            context_fingerprint: "abc123",
        };
        let diff = full.with_mode(PromptMode::Diff);
        let bytes = b"fn a() {}\nfn b() {}\n";
        let diff_hash = CacheStore::diff_hash(bytes, "@@ -1 +1 @@\n-fn a() {}\n+fn a() {}\n");

        let mut store = CacheStore::default();
        store.put("src/a.rs", diff_hash.clone(), vec![suggestion()], &diff, None);

        assert!(store.lookup("src/a.rs", &diff_hash, &diff).is_some());
        assert!(store.get("src/a.rs", bytes, &full).is_none());
        assert!(store.lookup("src/a.rs", &diff_hash, &full).is_none());

        let other_diff = CacheStore::diff_hash(bytes, "@@ -2 +2 @@\n");
        assert_ne!(other_diff, diff_hash);
        assert!(store.lookup("src/a.rs", &other_diff, &diff).is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let mut store = stored(b"one");
        let backend = backend();
        let key = CacheKey {
            backend: &backend,
            prompt_version: "v1",
            prompt_mode: PromptMode::Full,
            context_fingerprint: "abc123",
        };
        store.put("src/a.rs", CacheStore::content_hash(b"two"), vec![], &key, None);
        assert_eq!(store.len(), 1);
        assert!(store.get("src/a.rs", b"one", &key).is_none());
        assert_eq!(store.get("src/a.rs", b"two", &key).map(|s| s.len()), Some(0));
    }

    #[test]
    fn test_evict_stale() {
        let mut store = stored(b"x");
        let mut old = store.entries["src/a.rs"].clone();
        old.last_modified = Utc::now() - ChronoDuration::days(31);
        store.entries.insert("src/old.rs".to_string(), old);

        let mut recent = store.entries["src/a.rs"].clone();
        recent.last_modified = Utc::now() - ChronoDuration::days(29);
        store.entries.insert("src/recent.rs".to_string(), recent);

        assert_eq!(store.evict_stale(), 1);
        assert!(store.entries.contains_key("src/recent.rs"));
        assert!(!store.entries.contains_key("src/old.rs"));
    }

    #[test]
    fn test_stale_entry_is_not_a_hit() {
        let mut store = stored(b"x");
        if let Some(entry) = store.entries.get_mut("src/a.rs") {
            entry.last_modified = Utc::now() - ChronoDuration::days(45);
        }
        let backend = backend();
        let key = CacheKey {
            backend: &backend,
            prompt_version: "v1",
            prompt_mode: PromptMode::Full,
            context_fingerprint: "abc123",
        };
        assert!(store.get("src/a.rs", b"x", &key).is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = stored(b"fn a() {}");
        store.save(dir.path()).await.unwrap();

        assert!(!dir.path().join("cache.json.tmp").exists());
        let loaded = CacheStore::load(dir.path()).await;
        assert_eq!(loaded, store);
    }

    #[tokio::test]
    async fn test_load_evicts_stale_entries() {
        let dir = TempDir::new().unwrap();
        let mut store = stored(b"x");
        if let Some(entry) = store.entries.get_mut("src/a.rs") {
            entry.last_modified = Utc::now() - ChronoDuration::days(60);
        }
        store.save(dir.path()).await.unwrap();

        let loaded = CacheStore::load(dir.path()).await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_or_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(CacheStore::load(dir.path()).await.is_empty());

        std::fs::write(dir.path().join(CACHE_FILE), "{ not json").unwrap();
        assert!(CacheStore::load(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut store = stored(b"x");
        store.version = CACHE_FORMAT_VERSION + 1;
        store.save(dir.path()).await.unwrap();

        let loaded = CacheStore::load(dir.path()).await;
        assert!(loaded.is_empty());
        assert_eq!(loaded.version, CACHE_FORMAT_VERSION);
    }

    #[test]
    fn test_stats() {
        let mut store = stored(b"x");
        let mut second = store.entries["src/a.rs"].clone();
        second.token_count = Some(100);
        second.last_modified = Utc::now() - ChronoDuration::days(2);
        store.entries.insert("src/b.rs".to_string(), second.clone());

        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_suggestions, 2);
        assert_eq!(stats.total_tokens, 1000);
        assert_eq!(stats.oldest, Some(second.last_modified));
    }
}
