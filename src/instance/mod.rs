use log::{debug, warn};
use mockall::automock;
use sha2::{Digest, Sha256};
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process,
};
use thiserror::Error;

/// Process liveness checks using the operating system.
pub mod process_table;

pub use process_table::OsProcessTable;

/// Acquiring can race with other instances removing the same stale lock, retry a few times.
const MAX_ATTEMPTS: usize = 5;

/// A custom error describing the error cases for the instance lock.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The lock file cannot be created, read or removed.
    #[error("cannot access lock file {0}: {1}")]
    LockFile(String, std::io::Error),
    /// Other instances kept replacing the lock file while acquiring.
    #[error("cannot acquire lock file {0}, it keeps changing")]
    Contended(String),
}

/// Looks up processes in the process table.
#[automock]
pub trait ProcessTable {
    /// True if the process is running and its command line contains the identity.
    fn is_process_alive(&self, pid: u32, identity: &str) -> bool;
}

/// The name of the running program, which identifies the other instances.
pub fn program_identity() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| String::from(env!("CARGO_PKG_NAME")))
}

/// The file name of the lock, a stable hash of the program, the command and the repository.
///
/// Two monitors with the same command and repository always contend,
/// any other pair never does.
pub fn lock_file_name(identity: &str, command: &str, repository_url: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [identity, command, repository_url] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }

    format!("{}-{}.lock", env!("CARGO_PKG_NAME"), hex::encode(hasher.finalize()))
}

/// The lock file in the user's runtime directory, or in the temporary directory if there is none.
pub fn lock_path(identity: &str, command: &str, repository_url: &str) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(env::temp_dir)
        .join(lock_file_name(identity, command, repository_url))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Record {
    Missing,
    Owner(u32),
    Corrupt(String),
}

fn read_record(path: &Path) -> Result<Record, InstanceError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .trim()
            .parse()
            .map(Record::Owner)
            .unwrap_or(Record::Corrupt(contents))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Record::Missing),
        Err(err) => Err(InstanceError::LockFile(path.display().to_string(), err)),
    }
}

fn sibling(path: &Path, pid: u32, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{pid}.{suffix}"));
    PathBuf::from(name)
}

/// The outcome of trying to acquire the lock.
#[derive(Debug)]
pub enum Acquisition {
    /// This process holds the lock until the [InstanceLock] is dropped.
    Acquired(InstanceLock),
    /// A live instance with this pid holds the lock.
    AlreadyRunning(u32),
}

/// Makes sure only one instance runs for the same lock file.
///
/// The lock file contains the pid of the owner. A lock whose owner is dead or
/// is an unrelated process (e.g. the pid got reused) is stale and is replaced.
pub struct InstanceGuard<P: ProcessTable> {
    path: PathBuf,
    pid: u32,
    identity: String,
    processes: P,
}

impl<P: ProcessTable> InstanceGuard<P> {
    /// Creates a guard for the current process.
    pub fn new(path: PathBuf, identity: String, processes: P) -> Self {
        Self::with_pid(path, process::id(), identity, processes)
    }

    /// Creates a guard acting as the process with the given pid.
    pub fn with_pid(path: PathBuf, pid: u32, identity: String, processes: P) -> Self {
        InstanceGuard {
            path,
            pid,
            identity,
            processes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_error(&self, err: std::io::Error) -> InstanceError {
        InstanceError::LockFile(self.path.display().to_string(), err)
    }

    /// Atomically create the lock file with our pid: it is written to a temporary
    /// file and hard linked to the lock path, which fails if it already exists.
    fn create(&self) -> Result<bool, InstanceError> {
        let temporary = sibling(&self.path, self.pid, "tmp");
        fs::write(&temporary, self.pid.to_string()).map_err(|err| self.lock_error(err))?;
        let linked = fs::hard_link(&temporary, &self.path);
        let _ = fs::remove_file(&temporary);

        match linked {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(self.lock_error(err)),
        }
    }

    /// Remove the lock file, but only if it still contains the stale record.
    ///
    /// The file is moved away first, so a lock created by another instance in the
    /// meantime can be detected and put back.
    fn remove_stale(&self, stale: &Record) -> Result<(), InstanceError> {
        let quarantine = sibling(&self.path, self.pid, "stale");
        match fs::rename(&self.path, &quarantine) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(self.lock_error(err)),
        }

        let taken = read_record(&quarantine)?;
        if &taken != stale {
            debug!("Lock file was replaced while removing it, putting it back.");
            return self.put_back(&quarantine);
        }
        fs::remove_file(&quarantine).map_err(|err| self.lock_error(err))
    }

    /// Move a lock that turned out to be live back into place.
    ///
    /// If that fails the moved file is kept, so the owner's record is never lost.
    fn put_back(&self, quarantine: &Path) -> Result<(), InstanceError> {
        match fs::hard_link(quarantine, &self.path) {
            Ok(()) => fs::remove_file(quarantine).map_err(|err| self.lock_error(err)),
            Err(err) => {
                warn!(
                    "Cannot put back lock {}, it is kept at {}: {err}.",
                    self.path.display(),
                    quarantine.display()
                );
                Err(InstanceError::Contended(self.path.display().to_string()))
            }
        }
    }

    /// Try to acquire the lock for this process.
    ///
    /// If the lock is held by a live instance, it returns [Acquisition::AlreadyRunning]
    /// without touching the file. A stale lock is removed and the acquisition is
    /// retried, the owner is checked again after every attempt.
    pub fn try_acquire(&self) -> Result<Acquisition, InstanceError> {
        for _ in 0..MAX_ATTEMPTS {
            if self.create()? {
                match read_record(&self.path)? {
                    Record::Owner(pid) if pid == self.pid => {
                        debug!("Acquired lock {}.", self.path.display());
                        return Ok(Acquisition::Acquired(InstanceLock(LockReleaser {
                            path: self.path.clone(),
                            pid: self.pid,
                        })));
                    }
                    _ => continue,
                }
            }

            let record = read_record(&self.path)?;
            match record {
                Record::Missing => continue,
                Record::Owner(pid)
                    if pid != self.pid && self.processes.is_process_alive(pid, &self.identity) =>
                {
                    return Ok(Acquisition::AlreadyRunning(pid));
                }
                Record::Owner(pid) => {
                    warn!(
                        "Removing stale lock {} of process {pid}, it is not a running instance.",
                        self.path.display()
                    );
                }
                Record::Corrupt(ref contents) => {
                    warn!(
                        "Removing invalid lock {} (contains {contents:?}).",
                        self.path.display()
                    );
                }
            }
            self.remove_stale(&record)?;
        }

        Err(InstanceError::Contended(self.path.display().to_string()))
    }
}

/// Removes the lock file if it is still owned by the process.
///
/// It can be cloned to release the lock from outside of the poll loop
/// (e.g. on forced termination).
#[derive(Clone, Debug)]
pub struct LockReleaser {
    path: PathBuf,
    pid: u32,
}

impl LockReleaser {
    /// Delete the lock file, if it still contains our pid. Releasing twice is harmless.
    pub fn release(&self) {
        match read_record(&self.path) {
            Ok(Record::Owner(pid)) if pid == self.pid => match fs::remove_file(&self.path) {
                Ok(()) => debug!("Released lock {}.", self.path.display()),
                Err(err) => warn!("Cannot remove lock {}: {err}.", self.path.display()),
            },
            Ok(Record::Missing) => {}
            Ok(_) => warn!(
                "Lock {} was taken over by another instance, leaving it.",
                self.path.display()
            ),
            Err(err) => warn!("{err}."),
        }
    }
}

/// A held lock, released when dropped.
#[derive(Debug)]
pub struct InstanceLock(LockReleaser);

impl InstanceLock {
    pub fn releaser(&self) -> LockReleaser {
        self.0.clone()
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.0.release();
    }
}
