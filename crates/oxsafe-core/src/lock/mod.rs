//! Cross-process advisory locking of container files.
//!
//! A protected file `db.psafe3` is locked through a sibling `db.psafe3.plk`.
//! Locks are re-entrant within one [`LockManager`]: acquiring a path it
//! already holds only bumps a counter, and the lock file is removed when the
//! count drops back to zero. Acquisition never waits; contention is reported
//! as [`LockOutcome::Busy`] with the holder's `user@host:pid`.

pub mod backend;
pub mod identity;

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, instrument, trace};

pub use backend::{HandleLockBackend, LockBackend, MarkerLockBackend};
pub use identity::SystemIdentity;

use crate::config::{EngineConfig, LockBackendKind};

/// Appended to the protected path to name its lock file.
pub const LOCK_EXTENSION: &str = ".plk";

/// Longest lock-file path produced, extension included.
pub const MAX_LOCK_PATH_LEN: usize = 260;

/// Longest owner description read back from a lock file.
const MAX_OWNER_LEN: u64 = 256 + 15 + 11;

/// Shown when a busy lock's file cannot be read.
pub const UNKNOWN_OWNER: &str = "Unable to determine lock owner";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error on lock file {path:?}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Proof of a held lock, handed back to [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    lock_path: PathBuf,
    id: u64,
}

impl LockToken {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

#[derive(Debug)]
pub enum LockOutcome {
    Acquired(LockToken),
    /// Someone else holds the lock. Not an error: offer read-only or retry.
    Busy { owner: String },
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }
}

struct HeldLock {
    file: File,
    count: usize,
    id: u64,
}

/// Derive the lock-file path: the full path with [`LOCK_EXTENSION`]
/// appended, the base truncated so the result fits [`MAX_LOCK_PATH_LEN`].
///
/// The extension is appended, never substituted, so `a.dat` and `a.psafe3`
/// lock independently. Truncation counts encoded bytes and never splits a
/// UTF-8 sequence.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let max_base = MAX_LOCK_PATH_LEN - LOCK_EXTENSION.len();
    let mut base = truncate_encoded(path.as_os_str(), max_base);
    base.push(LOCK_EXTENSION);
    PathBuf::from(base)
}

/// At most `max` encoded bytes of `s`, cut on a character boundary.
fn truncate_encoded(s: &OsStr, max: usize) -> OsString {
    let bytes = s.as_encoded_bytes();
    if bytes.len() <= max {
        return s.to_os_string();
    }
    // A UTF-8 sequence is at most four bytes; step back over continuation bytes
    let mut end = max;
    while end > max.saturating_sub(3) && is_continuation(bytes[end]) {
        end -= 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        OsStr::from_bytes(&bytes[..end]).to_os_string()
    }
    #[cfg(not(unix))]
    {
        let lossy = s.to_string_lossy();
        let mut end = end.min(lossy.len());
        while !lossy.is_char_boundary(end) {
            end -= 1;
        }
        OsString::from(&lossy[..end])
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Per-session lock bookkeeping.
///
/// The re-entrancy counts live here rather than in a global, so several
/// managers (e.g. simulated owners in tests) can coexist in one process.
/// All operations serialize on an internal mutex.
pub struct LockManager {
    identity: SystemIdentity,
    backend: Box<dyn LockBackend>,
    held: Mutex<HashMap<PathBuf, HeldLock>>,
    next_id: AtomicU64,
}

impl LockManager {
    pub fn new(identity: SystemIdentity, backend: Box<dyn LockBackend>) -> Self {
        Self {
            identity,
            backend,
            held: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Manager for the current process with the configured backend.
    pub fn from_config(config: &EngineConfig) -> Self {
        let backend: Box<dyn LockBackend> = match config.lock_backend {
            LockBackendKind::Handle => Box::new(HandleLockBackend),
            LockBackendKind::Marker => Box::new(MarkerLockBackend),
        };
        Self::new(SystemIdentity::current(), backend)
    }

    pub fn identity(&self) -> &SystemIdentity {
        &self.identity
    }

    /// What this manager writes into lock files.
    pub fn owner_description(&self) -> String {
        self.identity.owner_string()
    }

    fn held(&self) -> MutexGuard<'_, HashMap<PathBuf, HeldLock>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try once to lock `path`.
    #[instrument(level = "debug", skip(self), fields(path = %path.display(), backend = self.backend.name()))]
    pub fn acquire(&self, path: &Path) -> Result<LockOutcome, LockError> {
        let lock_path = lock_path_for(path);
        let mut held = self.held();

        if let Some(lock) = held.get_mut(&lock_path) {
            lock.count += 1;
            debug!(count = lock.count, file = %lock_path.display(), "Re-entered held lock");
            return Ok(LockOutcome::Acquired(LockToken {
                lock_path,
                id: lock.id,
            }));
        }

        let owner = self.owner_description();
        match self.backend.try_acquire(&lock_path, &owner) {
            Ok(Some(file)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                held.insert(lock_path.clone(), HeldLock { file, count: 1, id });
                debug!(count = 1, file = %lock_path.display(), "Created lock file");
                Ok(LockOutcome::Acquired(LockToken { lock_path, id }))
            }
            Ok(None) => {
                let owner = read_owner(&lock_path);
                debug!(%owner, file = %lock_path.display(), "Lock is busy");
                Ok(LockOutcome::Busy { owner })
            }
            Err(source) => Err(LockError::Io {
                source,
                path: lock_path,
            }),
        }
    }

    /// Drop one level of a held lock. The file is deleted when the last
    /// level goes. Tokens this manager does not hold are ignored.
    #[instrument(level = "debug", skip(self, token), fields(path = %path.display()))]
    pub fn release(&self, path: &Path, token: &LockToken) -> Result<(), LockError> {
        let lock_path = lock_path_for(path);
        if token.lock_path != lock_path {
            trace!("Token does not belong to this path");
            return Ok(());
        }

        let mut held = self.held();
        let Some(lock) = held.get_mut(&lock_path) else {
            trace!("Release of a lock that is not held");
            return Ok(());
        };
        if lock.id != token.id {
            trace!("Release with a stale token");
            return Ok(());
        }

        if lock.count > 1 {
            lock.count -= 1;
            debug!(count = lock.count, file = %lock_path.display(), "Decremented lock count");
            return Ok(());
        }

        if let Some(lock) = held.remove(&lock_path) {
            self.backend
                .release(&lock_path, lock.file)
                .map_err(|source| LockError::Io {
                    source,
                    path: lock_path.clone(),
                })?;
            debug!(count = 0, file = %lock_path.display(), "Deleted lock file");
        }
        Ok(())
    }

    /// Whether anyone, this manager included, holds the lock on `path`.
    pub fn is_locked(&self, path: &Path) -> bool {
        self.backend.is_locked(&lock_path_for(path))
    }

    /// Owner recorded for `path` if anyone holds its lock.
    pub fn lock_owner(&self, path: &Path) -> Option<String> {
        let lock_path = lock_path_for(path);
        self.backend
            .is_locked(&lock_path)
            .then(|| read_owner(&lock_path))
    }

    /// Re-entrancy depth this manager holds on `path` (0 if not held).
    pub fn lock_count(&self, path: &Path) -> usize {
        self.held()
            .get(&lock_path_for(path))
            .map_or(0, |lock| lock.count)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("identity", &self.identity)
            .field("backend", &self.backend)
            .field("held", &self.held().len())
            .finish()
    }
}

/// Read the owner string of a busy lock, degrading to [`UNKNOWN_OWNER`].
fn read_owner(lock_path: &Path) -> String {
    let mut owner = String::new();
    let read = File::open(lock_path)
        .and_then(|file| file.take(MAX_OWNER_LEN).read_to_string(&mut owner));
    match read {
        Ok(_) if !owner.trim().is_empty() => owner.trim().to_string(),
        _ => UNKNOWN_OWNER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_appends_extension() {
        assert_eq!(
            lock_path_for(Path::new("/data/db.psafe3")),
            PathBuf::from("/data/db.psafe3.plk")
        );
    }

    #[test]
    fn test_lock_path_is_truncated() {
        let long = format!("/{}", "a".repeat(400));
        let lock = lock_path_for(Path::new(&long));
        let s = lock.to_string_lossy();
        assert_eq!(s.len(), MAX_LOCK_PATH_LEN);
        assert!(s.ends_with(LOCK_EXTENSION));
    }

    #[test]
    fn test_lock_path_keeps_distinct_extensions_apart() {
        assert_ne!(
            lock_path_for(Path::new("/data/a.dat")),
            lock_path_for(Path::new("/data/a.psafe3"))
        );
    }

    #[test]
    fn test_lock_path_truncates_multibyte_on_char_boundary() {
        // Two-byte characters, with the cut landing mid-character
        let long = format!("/{}", "é".repeat(300));
        let lock = lock_path_for(Path::new(&long));
        let s = lock.to_str().expect("truncation kept valid UTF-8");
        assert_eq!(s.len(), MAX_LOCK_PATH_LEN - 1);
        assert!(s.ends_with(&format!("é{LOCK_EXTENSION}")));
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_path_preserves_non_utf8_bytes() {
        use std::os::unix::ffi::OsStrExt;

        let mut raw = b"/".to_vec();
        raw.extend(std::iter::repeat_n(0xFFu8, 400));
        let lock = lock_path_for(Path::new(OsStr::from_bytes(&raw)));
        let bytes = lock.as_os_str().as_bytes();
        assert_eq!(bytes.len(), MAX_LOCK_PATH_LEN);
        assert_eq!(&bytes[..MAX_LOCK_PATH_LEN - 4], &raw[..MAX_LOCK_PATH_LEN - 4]);
        assert!(bytes.ends_with(LOCK_EXTENSION.as_bytes()));
    }

    #[test]
    fn test_read_owner_falls_back() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_owner(&dir.path().join("missing.plk")), UNKNOWN_OWNER);

        let empty = dir.path().join("empty.plk");
        std::fs::write(&empty, "").unwrap();
        assert_eq!(read_owner(&empty), UNKNOWN_OWNER);
    }

    #[test]
    fn test_foreign_token_is_ignored() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("db.psafe3");
        let manager = LockManager::new(SystemIdentity::new("u", "h", 1), Box::new(MarkerLockBackend));
        let LockOutcome::Acquired(token) = manager.acquire(&db).unwrap() else {
            panic!("expected lock");
        };
        let forged = LockToken {
            lock_path: token.lock_path.clone(),
            id: token.id + 100,
        };
        manager.release(&db, &forged).unwrap();
        assert_eq!(manager.lock_count(&db), 1);
        manager.release(&db, &token).unwrap();
        assert_eq!(manager.lock_count(&db), 0);
    }

    #[test]
    fn test_from_config_selects_backend() {
        let config = EngineConfig {
            lock_backend: LockBackendKind::Marker,
            ..EngineConfig::default()
        };
        let manager = LockManager::from_config(&config);
        assert!(format!("{manager:?}").contains("MarkerLockBackend"));
    }
}
