//! Cross-process index lock
//!
//! Writers hold an exclusive advisory lock on `<index>/.lock` for the
//! duration of a flush or compaction; readers never take it. Where native
//! advisory locking is unavailable (or `FORCE_PID_LOCK=1` is set) a
//! `.lock.pid` sidecar is used instead. The sidecar is non-reentrant: a
//! process cannot acquire it twice.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{RecollexError, Result};

pub const LOCK_FILE: &str = ".lock";
pub const PID_FILE: &str = ".lock.pid";

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive writer lock, released on drop
#[derive(Debug)]
pub struct IndexLock {
    inner: LockInner,
}

#[derive(Debug)]
enum LockInner {
    #[cfg(unix)]
    Flock(File),
    PidFile(PathBuf),
}

impl IndexLock {
    /// Acquire the writer lock, retrying until `timeout` elapses
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self> {
        let force_pid = std::env::var("FORCE_PID_LOCK").map(|v| v == "1").unwrap_or(false);
        let start = Instant::now();
        loop {
            let attempt = if force_pid || !cfg!(unix) {
                Self::try_pid_file(dir)
            } else {
                Self::try_native(dir)
            };
            match attempt {
                Ok(Some(lock)) => return Ok(lock),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            if start.elapsed() >= timeout {
                return Err(RecollexError::LockTimeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(RETRY_INTERVAL.min(timeout));
        }
    }

    #[cfg(unix)]
    fn try_native(dir: &Path) -> Result<Option<Self>> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Ok(Some(IndexLock {
                inner: LockInner::Flock(file),
            }))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(unix))]
    fn try_native(dir: &Path) -> Result<Option<Self>> {
        Self::try_pid_file(dir)
    }

    fn try_pid_file(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(PID_FILE);
        match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())?;
                file.sync_all()?;
                Ok(Some(IndexLock {
                    inner: LockInner::PidFile(path),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::holder_is_dead(&path) {
                    tracing::warn!(path = %path.display(), "removing stale pid lock");
                    let _ = std::fs::remove_file(&path);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort staleness check on the sidecar holder
    fn holder_is_dead(path: &Path) -> bool {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return false;
        };
        let Ok(pid) = contents.trim().parse::<i32>() else {
            // Unparseable sidecar counts as stale
            return true;
        };
        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid, 0) };
            rc == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        match &self.inner {
            #[cfg(unix)]
            LockInner::Flock(file) => {
                use std::os::unix::io::AsRawFd;
                unsafe {
                    libc::flock(file.as_raw_fd(), libc::LOCK_UN);
                }
            }
            LockInner::PidFile(path) => {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
