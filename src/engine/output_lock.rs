//! Output lock: a file-backed mutex shared by workers in this process and by other processes on the same storage.
//!
//! Two layers:
//! - an OS-level exclusive lock on the lock file, held only while its content is read and rewritten;
//! - the content itself, a JSON [`LockOwner`] `{ "ownerId", "hostName" }`. A non-empty owner is the
//!   actual mutex and stays in place across the whole protected section (directory probing, file write).
//!
//! [`OutputLock::acquire`] retries a bounded number of times and reports [`LockOutcome::TimedOut`]
//! instead of blocking forever. A record left on this host by a process that has exited is taken over.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::utils::config::{LockConsts, PackagePaths};

/// Ownership record stored in the lock file. Both fields empty means unlocked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOwner {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub host_name: String,
}

impl LockOwner {
    pub fn new(owner_id: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            host_name: host_name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner_id.is_empty() && self.host_name.is_empty()
    }

    fn is(&self, owner_id: &str, host_name: &str) -> bool {
        self.owner_id == owner_id && self.host_name == host_name
    }

    /// Process id encoded in a `"{pid}-worker-{n}"` owner id.
    fn pid(&self) -> Option<u32> {
        let (pid, _) = self.owner_id.split_once('-')?;
        pid.parse().ok()
    }

    /// Parse file content. Empty or unparseable content counts as no owner.
    fn parse(content: &str) -> Self {
        let content = content.trim();
        if content.is_empty() {
            return Self::default();
        }
        serde_json::from_str(content).unwrap_or_else(|e| {
            warn!("Unreadable lock owner record ({}); treating as unlocked", e);
            Self::default()
        })
    }
}

/// Result of [`OutputLock::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another owner held the lock for the whole retry budget.
    TimedOut { attempts: u32 },
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired)
    }
}

/// Retry budget for [`OutputLock::acquire`].
#[derive(Clone, Copy, Debug)]
pub struct LockPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: LockConsts::ATTEMPTS,
            delay: Duration::from_millis(LockConsts::DELAY_MS),
        }
    }
}

/// Lock file opened and OS-locked for one read-modify-write. Unlocked on drop.
struct OsLockedFile {
    file: File,
}

impl OsLockedFile {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.lock()
            .with_context(|| format!("lock {}", path.display()))?;
        Ok(Self { file })
    }

    fn read_owner(&mut self) -> Result<LockOwner> {
        let mut content = String::new();
        self.file.seek(SeekFrom::Start(0)).context("seek lock file")?;
        self.file
            .read_to_string(&mut content)
            .context("read lock file")?;
        Ok(LockOwner::parse(&content))
    }

    fn write_content(&mut self, content: &str) -> Result<()> {
        self.file.set_len(0).context("truncate lock file")?;
        self.file.seek(SeekFrom::Start(0)).context("seek lock file")?;
        self.file
            .write_all(content.as_bytes())
            .context("write lock file")?;
        self.file.sync_all().context("sync lock file")?;
        Ok(())
    }
}

impl Drop for OsLockedFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub struct OutputLock {
    path: PathBuf,
    host_name: String,
    policy: LockPolicy,
}

impl OutputLock {
    pub fn new(path: impl Into<PathBuf>, policy: LockPolicy) -> Self {
        Self {
            path: path.into(),
            host_name: local_host_name(),
            policy,
        }
    }

    /// Lock file next to the queue store file.
    pub fn beside_store(db_path: &Path, policy: LockPolicy) -> Self {
        let dir = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::new(dir.join(PackagePaths::get().lock_filename()), policy)
    }

    /// Override the recorded host name (e.g. to act as another host sharing the file).
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Take logical ownership for `owner_id` on this host. Re-entrant for the same owner.
    pub fn acquire(&self, owner_id: &str) -> Result<LockOutcome> {
        debug!("acquire output lock for {}", owner_id);
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            {
                let mut locked = OsLockedFile::open(&self.path)?;
                let current = locked.read_owner()?;
                if current.is_empty()
                    || current.is(owner_id, &self.host_name)
                    || self.is_abandoned(&current)
                {
                    let owner = LockOwner::new(owner_id, self.host_name.as_str());
                    let json = serde_json::to_string(&owner).context("encode lock owner")?;
                    locked.write_content(&json)?;
                    debug!("output lock held by {} (attempt {})", owner_id, attempt);
                    return Ok(LockOutcome::Acquired);
                }
                debug!(
                    "output lock busy ({}@{}), attempt {}/{}",
                    current.owner_id, current.host_name, attempt, attempts
                );
            }
            if attempt < attempts {
                thread::sleep(self.policy.delay);
            }
        }
        Ok(LockOutcome::TimedOut { attempts })
    }

    /// Record written on this host by a process that no longer exists.
    fn is_abandoned(&self, owner: &LockOwner) -> bool {
        if owner.host_name != self.host_name {
            return false;
        }
        match owner.pid() {
            Some(pid) if pid != std::process::id() && !is_pid_alive(pid) => {
                warn!(
                    "Reclaiming output lock {} left by dead process {} ({})",
                    self.path.display(),
                    pid,
                    owner.owner_id
                );
                true
            }
            _ => false,
        }
    }

    /// Clear ownership if `owner_id` on this host holds it. Returns false when someone else
    /// holds it or it is already clear.
    pub fn release(&self, owner_id: &str) -> Result<bool> {
        let mut locked = OsLockedFile::open(&self.path)?;
        let current = locked.read_owner()?;
        if !current.is(owner_id, &self.host_name) {
            return Ok(false);
        }
        locked.write_content(&unlocked_record()?)?;
        debug!("output lock released by {}", owner_id);
        Ok(true)
    }

    /// Current ownership record.
    pub fn current_owner(&self) -> Result<LockOwner> {
        OsLockedFile::open(&self.path)?.read_owner()
    }

    /// Clear the record regardless of owner id, as long as it was written by this host.
    /// Returns the cleared owner, or None if it was already clear or belongs to another host.
    pub fn clear_for_host(&self) -> Result<Option<LockOwner>> {
        let mut locked = OsLockedFile::open(&self.path)?;
        let current = locked.read_owner()?;
        if current.is_empty() || current.host_name != self.host_name {
            return Ok(None);
        }
        locked.write_content(&unlocked_record()?)?;
        Ok(Some(current))
    }

    /// Acquire and return a guard that releases on drop. Timing out is an error.
    pub fn lock_scope(&self, owner_id: &str) -> Result<OutputLockGuard<'_>> {
        match self.acquire(owner_id)? {
            LockOutcome::Acquired => Ok(OutputLockGuard {
                lock: self,
                owner_id: owner_id.to_string(),
            }),
            LockOutcome::TimedOut { attempts } => {
                let holder = self.current_owner().unwrap_or_default();
                bail!(
                    "timed out waiting for output lock {} after {} attempts (held by {}@{})",
                    self.path.display(),
                    attempts,
                    holder.owner_id,
                    holder.host_name
                )
            }
        }
    }
}

/// Held output lock. Dropping it releases ownership.
pub struct OutputLockGuard<'a> {
    lock: &'a OutputLock,
    owner_id: String,
}

impl Drop for OutputLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.owner_id) {
            warn!("Failed to release output lock for {}: {:#}", self.owner_id, e);
        }
    }
}

/// `{"ownerId":"","hostName":""}`
fn unlocked_record() -> Result<String> {
    serde_json::to_string(&LockOwner::default()).context("encode unlocked lock record")
}

/// Local host name, or a fixed fallback when it cannot be read.
pub fn local_host_name() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| LockConsts::UNKNOWN_HOST.to_string())
}

#[cfg(target_os = "linux")]
fn is_pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Without `/proc` a recorded owner is always assumed alive; `docexport unlock` clears it.
#[cfg(not(target_os = "linux"))]
fn is_pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(attempts: u32) -> LockPolicy {
        LockPolicy {
            attempts,
            delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let json = serde_json::to_string(&LockOwner::new("w1", "h")).unwrap();
        assert_eq!(json, r#"{"ownerId":"w1","hostName":"h"}"#);
    }

    #[test]
    fn garbage_content_counts_as_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filesystem.lck");
        std::fs::write(&path, "not json").unwrap();
        let lock = OutputLock::new(&path, quick(1));
        assert_eq!(lock.acquire("w1").unwrap(), LockOutcome::Acquired);
    }

    #[test]
    fn same_owner_on_other_host_is_a_different_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filesystem.lck");
        let here = OutputLock::new(&path, quick(2)).with_host_name("host-a");
        let there = OutputLock::new(&path, quick(2)).with_host_name("host-b");
        assert!(here.acquire("w1").unwrap().is_acquired());
        assert_eq!(
            there.acquire("w1").unwrap(),
            LockOutcome::TimedOut { attempts: 2 }
        );
        // Release from the wrong host is a no-op.
        assert!(!there.release("w1").unwrap());
        assert!(here.release("w1").unwrap());
        assert!(there.acquire("w1").unwrap().is_acquired());
    }

    #[test]
    fn clear_for_host_ignores_other_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filesystem.lck");
        let here = OutputLock::new(&path, quick(1)).with_host_name("host-a");
        let there = OutputLock::new(&path, quick(1)).with_host_name("host-b");
        assert!(there.acquire("w9").unwrap().is_acquired());
        assert_eq!(here.clear_for_host().unwrap(), None);
        assert_eq!(
            there.clear_for_host().unwrap(),
            Some(LockOwner::new("w9", "host-b"))
        );
        assert!(there.current_owner().unwrap().is_empty());
    }

    #[test]
    fn owner_pid_comes_from_id_prefix() {
        assert_eq!(LockOwner::new("4242-worker-3", "h").pid(), Some(4242));
        assert_eq!(LockOwner::new("holder", "h").pid(), None);
        assert_eq!(LockOwner::new("x-worker-0", "h").pid(), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pid_liveness_reads_proc() {
        assert!(is_pid_alive(std::process::id()));
        assert!(!is_pid_alive(999_999_999));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn record_of_dead_local_process_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filesystem.lck");
        let lock = OutputLock::new(&path, quick(1)).with_host_name("host-a");
        let stale = LockOwner::new("999999999-worker-0", "host-a");
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert_eq!(lock.acquire("1-worker-0").unwrap(), LockOutcome::Acquired);
        assert_eq!(lock.current_owner().unwrap().owner_id, "1-worker-0");

        // the same record from another host may still be live there
        let other = OutputLock::new(&path, quick(1)).with_host_name("host-b");
        assert!(lock.release("1-worker-0").unwrap());
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert_eq!(
            other.acquire("1-worker-0").unwrap(),
            LockOutcome::TimedOut { attempts: 1 }
        );
    }

    #[test]
    fn guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = OutputLock::new(dir.path().join("filesystem.lck"), quick(1));
        {
            let _guard = lock.lock_scope("w1").unwrap();
            assert_eq!(lock.current_owner().unwrap().owner_id, "w1");
        }
        assert!(lock.current_owner().unwrap().is_empty());
    }
}
