//! Single-writer lock for a working directory (`.ralph/lock`).
//!
//! The lock file is created with no-clobber semantics and holds the owning
//! process id as its entire content. When the file already exists the owner
//! is probed with signal 0: a confirmed-dead owner is evicted and acquisition
//! retried, anything else is treated as contention.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::core::types::ProcessLiveness;

/// Create attempts before giving up to a concurrent acquirer.
const MAX_ATTEMPTS: usize = 2;

/// The lock is held by another (possibly live) run.
#[derive(Debug, thiserror::Error)]
#[error(
    "lock file {} exists{}; another run may be active",
    .path.display(),
    owner_suffix(.owner)
)]
pub struct LockHeldError {
    pub path: PathBuf,
    /// Owner pid, when the lock file could be parsed.
    pub owner: Option<u32>,
}

fn owner_suffix(owner: &Option<u32>) -> String {
    owner.map(|pid| format!(" (pid {pid})")).unwrap_or_default()
}

/// Answers "is this process id still running?".
pub trait LivenessProbe {
    fn probe(&self, pid: u32) -> ProcessLiveness;
}

/// Probe by sending the null signal (`kill(pid, 0)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

impl LivenessProbe for SignalProbe {
    fn probe(&self, pid: u32) -> ProcessLiveness {
        // pid 0 and negative pids address process groups, never a single owner.
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return ProcessLiveness::Unknown,
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => ProcessLiveness::Alive,
            Err(Errno::ESRCH) => ProcessLiveness::Dead,
            // EPERM: exists but belongs to someone else.
            Err(_) => ProcessLiveness::Unknown,
        }
    }
}

/// RAII guard for the lock file.
///
/// Dropping the guard deletes the lock file. Failures are logged, never raised.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    reclaimed_from: Option<u32>,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when no stale lock had to be evicted first.
    pub fn acquired_fresh(&self) -> bool {
        self.reclaimed_from.is_none()
    }

    /// Pid recorded in the stale lock this guard replaced.
    pub fn reclaimed_from(&self) -> Option<u32> {
        self.reclaimed_from
    }

    /// Release now and surface any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_lock(&self.path)
    }

    /// Forget the lock without touching the file (someone else already owns cleanup).
    pub fn disarm(mut self) {
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(err) = release_lock(&self.path)
        {
            warn!(path = %self.path.display(), err = %format!("{err:#}"), "failed to release lock");
        }
    }
}

/// Acquire the lock at `path` for the current process.
///
/// Fails with [`LockHeldError`] when the owner is alive, unknown, or the lock
/// content cannot be parsed.
pub fn acquire_lock<P: LivenessProbe + ?Sized>(path: &Path, probe: &P) -> Result<LockGuard> {
    let mut reclaimed_from = None;

    for attempt in 1..=MAX_ATTEMPTS {
        debug!(path = %path.display(), attempt, "creating lock file");
        match try_create(path) {
            Ok(()) => {
                info!(path = %path.display(), pid = std::process::id(), "lock acquired");
                return Ok(LockGuard {
                    path: path.to_path_buf(),
                    reclaimed_from,
                    released: false,
                });
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(err).with_context(|| format!("create lock file {}", path.display()));
            }
        }

        let owner = match read_lock_owner(path) {
            Ok(pid) => pid,
            // Owner released between our create and read; just retry.
            Err(err) if is_not_found(&err) => continue,
            Err(err) => {
                debug!(path = %path.display(), err = %format!("{err:#}"), "unreadable lock owner");
                return Err(LockHeldError {
                    path: path.to_path_buf(),
                    owner: None,
                }
                .into());
            }
        };

        let liveness = probe.probe(owner);
        debug!(owner, ?liveness, "probed lock owner");
        if liveness.counts_as_alive() {
            return Err(LockHeldError {
                path: path.to_path_buf(),
                owner: Some(owner),
            }
            .into());
        }

        info!(path = %path.display(), stale_pid = owner, "removing stale lock");
        release_lock(path).context("remove stale lock")?;
        reclaimed_from = Some(owner);
    }

    Err(anyhow!("unable to acquire lock {}", path.display()))
}

/// Delete the lock file. A missing file is not an error.
pub fn release_lock(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "lock released");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove lock file {}", path.display())),
    }
}

/// Parse the owner pid recorded in a lock file.
pub fn read_lock_owner(path: &Path) -> Result<u32> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read lock file {}", path.display()))?;
    let token = contents
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("empty lock file {}", path.display()))?;
    let pid: u32 = token
        .parse()
        .with_context(|| format!("parse lock pid {token:?} from {}", path.display()))?;
    if pid == 0 {
        return Err(anyhow!("invalid lock pid 0 in {}", path.display()));
    }
    Ok(pid)
}

/// Stage the pid in a temp file, then move it into place only if `path` is absent.
///
/// Readers never observe a lock file without its pid.
fn try_create(path: &Path) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".lock-")
        .tempfile_in(dir)?;
    writeln!(staged, "{}", std::process::id())?;
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path).map_err(|err| err.error)?;
    Ok(())
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == ErrorKind::NotFound)
}
