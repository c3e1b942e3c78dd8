//! Interchangeable lock-file strategies.
//!
//! Both backends agree on the lock-file path and content; they differ in
//! what makes the lock real. [`HandleLockBackend`] holds an OS advisory lock
//! on an open handle, so a crashed holder's lock disappears with its process.
//! [`MarkerLockBackend`] treats the file's existence as the lock, which also
//! works on filesystems without advisory locking but cannot detect a dead
//! holder.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use fs2::FileExt;
use tracing::{trace, warn};

/// A way of taking and dropping a lock file.
pub trait LockBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Try once to take the lock, writing `owner` into the file.
    ///
    /// Returns `Ok(None)` when someone else holds it.
    fn try_acquire(&self, lock_path: &Path, owner: &str) -> io::Result<Option<File>>;

    /// Give up a lock taken by [`try_acquire`](Self::try_acquire) and delete the file.
    fn release(&self, lock_path: &Path, file: File) -> io::Result<()>;

    /// Whether anyone holds the lock. Never creates or deletes the file.
    fn is_locked(&self, lock_path: &Path) -> bool;
}

/// OS advisory lock (`flock` / `LockFileEx`) on the lock file.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleLockBackend;

/// Create-exclusive marker file.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerLockBackend;

/// Refuse to treat FIFOs, devices, directories or symlinks as lock files.
fn reject_non_regular(lock_path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(lock_path) {
        Ok(meta) if !meta.file_type().is_file() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("lock path {} is not a regular file", lock_path.display()),
        )),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Content is diagnostic only; a failed write does not undo the lock.
fn write_owner(mut file: &File, owner: &str, lock_path: &Path) {
    if let Err(e) = file.write_all(owner.as_bytes()).and_then(|()| file.flush()) {
        warn!(path = %lock_path.display(), error = %e, "Failed to record lock owner");
    }
}

/// The handle still names the file at `lock_path` (it was not unlinked by
/// a releasing holder between our open and our lock).
#[cfg(unix)]
fn still_linked(file: &File, lock_path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(lock_path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, _lock_path: &Path) -> io::Result<bool> {
    Ok(true)
}

impl LockBackend for HandleLockBackend {
    fn name(&self) -> &'static str {
        "handle"
    }

    fn try_acquire(&self, lock_path: &Path, owner: &str) -> io::Result<Option<File>> {
        reject_non_regular(lock_path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(e),
        }
        if !still_linked(&file, lock_path)? {
            trace!(path = %lock_path.display(), "Lock file was removed under us");
            return Ok(None);
        }

        file.set_len(0)?;
        write_owner(&file, owner, lock_path);
        Ok(Some(file))
    }

    fn release(&self, lock_path: &Path, file: File) -> io::Result<()> {
        // Unlink while still holding the lock so nobody locks a doomed inode.
        let removed = fs::remove_file(lock_path);
        FileExt::unlock(&file)?;
        drop(file);
        removed
    }

    /// Checks with a shared lock, so concurrent checks never see each other.
    ///
    /// The shared lock is held for the duration of the check; an acquirer
    /// racing it in that instant gets a spurious `Busy` and must retry.
    fn is_locked(&self, lock_path: &Path) -> bool {
        if reject_non_regular(lock_path).is_err() {
            return false;
        }
        let Ok(file) = OpenOptions::new().read(true).open(lock_path) else {
            return false;
        };
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(e) => is_contended(&e),
        }
    }
}

impl LockBackend for MarkerLockBackend {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn try_acquire(&self, lock_path: &Path, owner: &str) -> io::Result<Option<File>> {
        reject_non_regular(lock_path)?;
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => {
                write_owner(&file, owner, lock_path);
                Ok(Some(file))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn release(&self, lock_path: &Path, file: File) -> io::Result<()> {
        drop(file);
        fs::remove_file(lock_path)
    }

    fn is_locked(&self, lock_path: &Path) -> bool {
        fs::symlink_metadata(lock_path).is_ok()
    }
}
