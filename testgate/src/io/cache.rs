//! Single-slot result cache keyed by module directory.
//!
//! Each module owns one file, `<cache_dir>/<key>.json`, where `key` is a
//! 16-character digest of the [`RepoState::identity`]. The file records the
//! repository fingerprint the summary was produced for; an entry is valid only
//! while the current fingerprint is identical.
//!
//! Reads fail closed: any VCS, I/O, lock or parse problem is a miss. Access to
//! an entry is serialized across processes with an advisory lock on
//! `<key>.lock`.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::io::fsutil::write_atomic;
use crate::io::git::{RepoState, VcsError};

/// Directory name under the system temp dir used when none is configured.
pub const DEFAULT_CACHE_DIR_NAME: &str = "testgate-cache";

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Default cache root: `$TMPDIR/testgate-cache`.
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

/// Compute a short hash of content for cache keys.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // First 8 bytes = 16 hex chars
}

/// Persisted cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Result cache for one module.
#[derive(Debug)]
pub struct ResultCache<S> {
    state: S,
    cache_dir: PathBuf,
}

struct EntryLock {
    file: File,
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl<S: RepoState> ResultCache<S> {
    pub fn new(state: S, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            state,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// 16-character handle for this module's slot.
    pub fn cache_key(&self) -> String {
        content_hash(&self.state.identity())
    }

    /// Current repository fingerprint, `"<commitHash>:<diffHash>"`.
    pub fn git_state(&self) -> Result<String, VcsError> {
        self.state.fingerprint()
    }

    pub fn entry_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.json", self.cache_key()))
    }

    fn lock_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.lock", self.cache_key()))
    }

    /// True iff an entry exists and was produced for the current repository state.
    pub fn is_valid(&self) -> bool {
        self.valid_entry().is_some()
    }

    /// The stored summary, only while the entry is valid.
    pub fn cached_message(&self) -> Option<String> {
        self.valid_entry().map(|entry| entry.message)
    }

    #[instrument(skip_all)]
    fn valid_entry(&self) -> Option<CacheEntry> {
        let fingerprint = match self.git_state() {
            Ok(fp) => fp,
            Err(err) => {
                debug!(err = %err, "cannot fingerprint repository, treating as miss");
                return None;
            }
        };
        let entry = match self.load() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("no cache entry");
                return None;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "unreadable cache entry, treating as miss");
                return None;
            }
        };
        if entry.fingerprint == fingerprint {
            debug!(cached_at = %entry.timestamp, "cache hit");
            Some(entry)
        } else {
            debug!("repository changed since cached run");
            None
        }
    }

    fn load(&self) -> Result<Option<CacheEntry>> {
        let path = self.entry_path();
        if !path.exists() {
            return Ok(None);
        }
        let _lock = self.lock(false)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read cache {}", path.display()));
            }
        };
        let entry = serde_json::from_str(&content)
            .with_context(|| format!("parse cache {}", path.display()))?;
        Ok(Some(entry))
    }

    /// Record `message` as the summary for the current repository state.
    #[instrument(skip_all)]
    pub fn save(&self, message: &str) -> Result<()> {
        let fingerprint = self.git_state().context("fingerprint repository")?;
        let entry = CacheEntry {
            fingerprint,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        let _lock = self.lock(true)?;
        let path = self.entry_path();
        debug!(path = %path.display(), "saving result to cache");
        let mut buf = serde_json::to_string_pretty(&entry).context("serialize cache entry")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }

    /// Drop the entry for this module, if any.
    #[instrument(skip_all)]
    pub fn invalidate(&self) {
        let path = self.entry_path();
        if !path.exists() {
            return;
        }
        let result = self.lock(true).and_then(|_lock| match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove cache {}", path.display())),
        });
        match result {
            Ok(()) => debug!(path = %path.display(), "cache invalidated"),
            Err(err) => warn!(err = %format!("{err:#}"), "failed to invalidate cache"),
        }
    }

    fn lock(&self, exclusive: bool) -> Result<EntryLock> {
        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("create cache dir {}", self.cache_dir.display()))?;
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open lock {}", lock_path.display()))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => return Ok(EntryLock { file }),
                Err(err) if is_contended(&err) => {
                    if start.elapsed() >= LOCK_TIMEOUT {
                        return Err(anyhow!(
                            "timed out waiting for cache lock {}",
                            lock_path.display()
                        ));
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("lock {}", lock_path.display()));
                }
            }
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedState;

    fn cache(state: &FixedState, dir: &Path) -> ResultCache<FixedState> {
        ResultCache::new(state.clone(), dir)
    }

    #[test]
    fn test_content_hash_deterministic() {
        let hash1 = content_hash("/home/dev/project");
        let hash2 = content_hash("/home/dev/project");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 16);
        assert_ne!(hash1, content_hash("/home/dev/other"));
    }

    #[test]
    fn default_dir_is_under_temp() {
        assert_eq!(
            default_cache_dir(),
            std::env::temp_dir().join("testgate-cache")
        );
    }

    #[test]
    fn empty_cache_is_invalid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        assert!(!cache(&state, temp.path()).is_valid());
        assert_eq!(cache(&state, temp.path()).cached_message(), None);
    }

    #[test]
    fn save_then_valid_returns_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("✅ vet ok, ✅ tests ok").expect("save");
        assert!(cache.is_valid());
        assert_eq!(
            cache.cached_message().as_deref(),
            Some("✅ vet ok, ✅ tests ok")
        );
    }

    #[test]
    fn content_change_invalidates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("ok").expect("save");
        state.set_fingerprint("abc:124");
        assert!(!cache.is_valid());
        assert_eq!(cache.cached_message(), None);
    }

    #[test]
    fn key_ignores_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        let key = cache.cache_key();
        state.set_fingerprint("def:456");
        assert_eq!(cache.cache_key(), key);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn invalidate_removes_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("ok").expect("save");
        assert!(cache.entry_path().exists());
        cache.invalidate();
        assert!(!cache.entry_path().exists());
        assert!(!cache.is_valid());
        cache.invalidate();
    }

    #[test]
    fn vcs_failure_is_a_miss() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("ok").expect("save");
        state.fail_fingerprint();
        assert!(!cache.is_valid());
        assert!(cache.save("again").is_err());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        fs::write(cache.entry_path(), "{not json").expect("write");
        assert!(!cache.is_valid());
    }

    #[test]
    fn save_overwrites_previous_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("first").expect("save");
        state.set_fingerprint("abc:999");
        cache.save("second").expect("save");
        assert_eq!(cache.cached_message().as_deref(), Some("second"));
        let json_files = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .count();
        assert_eq!(json_files, 1);
    }

    #[test]
    fn repositories_use_separate_slots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = FixedState::new("/repo-a", "abc:1");
        let b = FixedState::new("/repo-b", "abc:1");
        cache(&a, temp.path()).save("a").expect("save");
        assert!(!cache(&b, temp.path()).is_valid());
        assert_ne!(
            cache(&a, temp.path()).cache_key(),
            cache(&b, temp.path()).cache_key()
        );
    }

    #[test]
    fn entry_file_records_fingerprint_and_timestamp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = FixedState::new("/repo", "abc:123");
        let cache = cache(&state, temp.path());
        cache.save("msg").expect("save");
        let raw = fs::read_to_string(cache.entry_path()).expect("read");
        let entry: CacheEntry = serde_json::from_str(&raw).expect("parse");
        assert_eq!(entry.fingerprint, "abc:123");
        assert_eq!(entry.message, "msg");
    }
}
