use log::{debug, info};
use mockall::automock;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod credentials;
/// The source control client backed by libgit2.
pub mod git;

#[cfg(test)]
pub(crate) mod fixtures;

pub use git::{shorthash, GitCheckout, GitClient, GitError};

/// The local checkout of the monitored repository.
///
/// It is created once at startup and updated on every poll, the last head
/// commit is only kept for logging and is never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryState {
    pub local_path: PathBuf,
    pub remote_url: String,
    pub last_head_commit: Option<String>,
}

impl RepositoryState {
    /// Place the checkout of the remote inside the given folder, named after the repository.
    pub fn new(git_folder: &Path, remote_url: &str) -> Option<Self> {
        let name = repository_name(remote_url)?;

        Some(RepositoryState {
            local_path: git_folder.join(name),
            remote_url: remote_url.to_string(),
            last_head_commit: None,
        })
    }
}

/// Get the name of the repository from its url, without the `.git` extension.
///
/// Works with urls (`https://host/user/name.git`), scp-like addresses
/// (`git@host:user/name.git`) and local paths. A url with only a host has no name.
pub fn repository_name(url: &str) -> Option<&str> {
    // The host and port of a url are never the name
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => url,
    };
    let trimmed = path.trim_end_matches('/');
    let basename = trimmed
        .rsplit(|ch| ch == '/' || ch == ':')
        .next()
        .unwrap_or(trimmed);
    let name = basename.strip_suffix(".git").unwrap_or(basename);

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

/// The result of a successful synchronization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The repository was not checked out yet, it is cloned now.
    Cloned { branch: String, commit: String },
    /// The branch advanced from `before` to `after`.
    Changed { before: String, after: String },
    /// The remote has no new commits.
    Unchanged { commit: String },
}

/// A custom error describing the error cases for the synchronization.
///
/// All of them are fatal, the poll loop stops on the first one.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The existing checkout tracks a different remote than the one configured.
    #[error("{path} is cloned from {found}, not from {expected}")]
    RemoteMismatch {
        path: String,
        expected: String,
        found: String,
    },
    /// The underlying source control operation failed.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// The source control client operations needed to keep a checkout up to date.
#[automock]
pub trait SourceControl {
    /// Clone the remote into the local path and return the checked out branch.
    fn clone_from(&self, remote_url: &str, local_path: &Path) -> Result<String, GitError>;
    /// Open an existing checkout.
    fn open(&self, local_path: &Path) -> Result<Box<dyn Checkout>, GitError>;
}

/// An opened local checkout.
#[automock]
pub trait Checkout {
    /// The commit id the current branch points to.
    fn head_commit(&self) -> Result<String, GitError>;
    /// The url of the remote the current branch is tracking.
    fn remote_url(&self) -> Result<String, GitError>;
    /// Fetch from the remote and fast-forward the current branch.
    fn fetch_and_pull(&mut self) -> Result<(), GitError>;
    /// The paths that differ between two commits.
    fn changed_paths(&self, before: &str, after: &str) -> Result<Vec<String>, GitError>;
}

/// Bring the local checkout up to date and report if it changed.
#[automock]
pub trait Synchronize {
    fn synchronize(&mut self, state: &mut RepositoryState) -> Result<SyncOutcome, SyncError>;
}

/// Clones or pulls the repository and compares the heads before and after.
///
/// The change signal is only the head commit, the changed paths are logged
/// on debug level but never used for deciding.
pub struct Synchronizer<S: SourceControl> {
    client: S,
}

impl<S: SourceControl> Synchronizer<S> {
    pub fn new(client: S) -> Self {
        Synchronizer { client }
    }

    fn clone_repository(&self, state: &mut RepositoryState) -> Result<SyncOutcome, SyncError> {
        info!(
            "Cloning {} into {}.",
            state.remote_url,
            state.local_path.display()
        );
        let branch = self
            .client
            .clone_from(&state.remote_url, &state.local_path)?;
        let commit = self.client.open(&state.local_path)?.head_commit()?;
        debug!("Cloned branch {branch} at {}.", shorthash(&commit));

        state.last_head_commit = Some(commit.clone());
        Ok(SyncOutcome::Cloned { branch, commit })
    }

    fn pull_repository(&self, state: &mut RepositoryState) -> Result<SyncOutcome, SyncError> {
        debug!("Pulling {} in {}.", state.remote_url, state.local_path.display());
        let mut checkout = self.client.open(&state.local_path)?;

        let found = checkout.remote_url()?;
        if found != state.remote_url {
            return Err(SyncError::RemoteMismatch {
                path: state.local_path.display().to_string(),
                expected: state.remote_url.clone(),
                found,
            });
        }

        let before = checkout.head_commit()?;
        checkout.fetch_and_pull()?;
        let after = checkout.head_commit()?;
        state.last_head_commit = Some(after.clone());

        if before == after {
            return Ok(SyncOutcome::Unchanged { commit: after });
        }

        debug!(
            "Updated from {} to {}.",
            shorthash(&before),
            shorthash(&after)
        );
        match checkout.changed_paths(&before, &after) {
            Ok(paths) => paths.iter().for_each(|path| debug!("  - {path}")),
            Err(err) => debug!("Cannot list the changed files: {err}."),
        }

        Ok(SyncOutcome::Changed { before, after })
    }
}

impl<S: SourceControl> Synchronize for Synchronizer<S> {
    /// Clone the repository if there is no checkout yet, otherwise pull it.
    fn synchronize(&mut self, state: &mut RepositoryState) -> Result<SyncOutcome, SyncError> {
        if state.local_path.exists() {
            self.pull_repository(state)
        } else {
            self.clone_repository(state)
        }
    }
}
