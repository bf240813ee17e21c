use super::{credentials::CredentialHandler, Checkout, SourceControl};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AnnotatedCommit, AutotagOption, FetchOptions, Oid, RemoteCallbacks, Repository,
    StatusOptions, Tree,
};
use log::trace;
use std::path::Path;
use thiserror::Error;

/// A custom error describing the error cases of the git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The directory is not a valid git repository.
    #[error("{0} is not a valid git repository ({1})")]
    NotAGitRepository(String, String),
    /// Cannot clone the remote. This can be a network failure, authentication error or a wrong url.
    #[error("cannot clone {0} ({1})")]
    CloneFailed(String, String),
    /// Cannot parse HEAD, either stuck an unborn branch or some deleted reference
    #[error("HEAD is invalid, probably points to invalid commit")]
    NoHead,
    /// There is no branch in the repository currently. It can be a repository
    /// without any branch, or checked out on a commit.
    #[error("repository is not on a branch, checkout or create a commit first")]
    NotOnABranch,
    /// There is no remote for the current branch.
    #[error("branch {0} doesn't have a remote")]
    NoRemoteForBranch(String),
    /// There are changes in the directory, avoiding pulling. Fast-forwarding would
    /// overwrite them.
    #[error("there are uncommited changes in the directory")]
    DirtyWorkingTree,
    /// Cannot fetch the current branch. This can be a network failure, authentication error or many other things.
    #[error("cannot fetch ({0})")]
    FetchFailed(String),
    /// The local branch has commits that are not on the remote, it cannot be fast-forwarded.
    #[error("cannot fast-forward the branch, it has diverged from the remote")]
    MergeConflict,
    /// Cannot set the HEAD to the fetch commit.
    #[error("could not set HEAD to fetch commit {0}")]
    FailedSettingHead(String),
    /// Cannot diff the two commits.
    #[error("cannot compare {0} with {1}")]
    DiffFailed(String, String),
}

/// Shorten the commit sha to the usual seven characters.
pub fn shorthash(sha: &str) -> &str {
    sha.get(0..7).unwrap_or(sha)
}

fn fetch_options<'a>() -> FetchOptions<'a> {
    let mut handler = CredentialHandler::new(git2::Config::open_default().ok());
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        handler.next_credential(url, username, allowed)
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options.download_tags(AutotagOption::All);
    options
}

/// The source control client backed by libgit2.
#[derive(Clone, Copy, Debug, Default)]
pub struct GitClient;

impl SourceControl for GitClient {
    fn clone_from(&self, remote_url: &str, local_path: &Path) -> Result<String, GitError> {
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options())
            .clone(remote_url, local_path)
            .map_err(|err| {
                GitError::CloneFailed(remote_url.to_string(), err.message().to_string())
            })?;

        let head = repo.head().map_err(|_| GitError::NoHead)?;
        let branch = head.shorthand().ok_or(GitError::NotOnABranch)?;

        Ok(branch.to_string())
    }

    fn open(&self, local_path: &Path) -> Result<Box<dyn Checkout>, GitError> {
        Ok(Box::new(GitCheckout::open(local_path)?))
    }
}

/// A checkout opened with libgit2.
///
/// It always works on the current branch and its upstream remote.
pub struct GitCheckout {
    repo: Repository,
}

impl GitCheckout {
    pub fn open(directory: &Path) -> Result<Self, GitError> {
        let repo = Repository::open(directory).map_err(|err| {
            GitError::NotAGitRepository(
                directory.display().to_string(),
                err.message().to_string(),
            )
        })?;

        Ok(GitCheckout { repo })
    }

    /// The short and the full name of the current branch.
    fn branch(&self) -> Result<(String, String), GitError> {
        let head = self.repo.head().map_err(|_| GitError::NotOnABranch)?;
        if !head.is_branch() {
            return Err(GitError::NotOnABranch);
        }
        let branch_name = head.shorthand().ok_or(GitError::NotOnABranch)?;
        let branch_ref = head.name().ok_or(GitError::NotOnABranch)?;

        Ok((branch_name.to_string(), branch_ref.to_string()))
    }

    fn remote_name(&self) -> Result<(String, String), GitError> {
        let (branch_name, branch_ref) = self.branch()?;
        let remote_buf = self
            .repo
            .branch_upstream_remote(&branch_ref)
            .map_err(|_| GitError::NoRemoteForBranch(branch_name.clone()))?;
        let remote_name = remote_buf
            .as_str()
            .ok_or_else(|| GitError::NoRemoteForBranch(branch_name.clone()))?;

        Ok((branch_name, remote_name.to_string()))
    }

    // Inspired from: https://github.com/rust-lang/git2-rs/blob/master/examples/pull.rs
    fn fetch(&self) -> Result<AnnotatedCommit<'_>, GitError> {
        let (branch_name, remote_name) = self.remote_name()?;
        let mut remote = self
            .repo
            .find_remote(&remote_name)
            .map_err(|_| GitError::NoRemoteForBranch(branch_name.clone()))?;

        trace!("Fetching {branch_name} from {remote_name}.");
        remote
            .fetch(&[branch_name.as_str()], Some(&mut fetch_options()), None)
            .map_err(|err| GitError::FetchFailed(err.message().to_string()))?;

        let fetch_head = self
            .repo
            .find_reference("FETCH_HEAD")
            .map_err(|err| GitError::FetchFailed(err.message().to_string()))?;
        self.repo
            .reference_to_annotated_commit(&fetch_head)
            .map_err(|err| GitError::FetchFailed(err.message().to_string()))
    }

    fn check_if_updatable(&self, fetch_commit: &AnnotatedCommit) -> Result<bool, GitError> {
        let (analysis, _) = self
            .repo
            .merge_analysis(&[fetch_commit])
            .map_err(|_| GitError::MergeConflict)?;

        if analysis.is_up_to_date() {
            Ok(false)
        } else if analysis.is_fast_forward() {
            Ok(true)
        } else {
            Err(GitError::MergeConflict)
        }
    }

    fn check_if_clean(&self) -> Result<(), GitError> {
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        let statuses = self
            .repo
            .statuses(Some(&mut options))
            .map_err(|_| GitError::DirtyWorkingTree)?;

        if statuses.is_empty() {
            Ok(())
        } else {
            Err(GitError::DirtyWorkingTree)
        }
    }

    fn fast_forward(&self, fetch_commit: &AnnotatedCommit) -> Result<(), GitError> {
        let (_, branch_ref) = self.branch()?;
        let fetch_id = fetch_commit.id();
        let failed = |_: git2::Error| GitError::FailedSettingHead(fetch_id.to_string());

        let mut reference = self
            .repo
            .find_reference(&branch_ref)
            .map_err(|_| GitError::NotOnABranch)?;
        let msg = format!("Fast-Forward: Setting {branch_ref} to id: {fetch_id}");
        reference.set_target(fetch_id, &msg).map_err(failed)?;
        self.repo.set_head(&branch_ref).map_err(failed)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::default().force()))
            .map_err(failed)?;

        Ok(())
    }

    fn find_tree(&self, sha: &str) -> Result<Tree<'_>, git2::Error> {
        let oid = Oid::from_str(sha)?;
        self.repo.find_commit(oid)?.tree()
    }
}

impl Checkout for GitCheckout {
    fn head_commit(&self) -> Result<String, GitError> {
        let commit = self
            .repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(|_| GitError::NoHead)?;

        Ok(commit.id().to_string())
    }

    fn remote_url(&self) -> Result<String, GitError> {
        let (branch_name, remote_name) = self.remote_name()?;
        let remote = self
            .repo
            .find_remote(&remote_name)
            .map_err(|_| GitError::NoRemoteForBranch(branch_name.clone()))?;
        let url = remote
            .url()
            .ok_or_else(|| GitError::NoRemoteForBranch(branch_name.clone()))?;

        Ok(url.to_string())
    }

    /// Fetch the current branch and fast-forward to it, if it has new commits.
    /// Local modifications and diverged branches are errors, they are never overwritten.
    fn fetch_and_pull(&mut self) -> Result<(), GitError> {
        let fetch_commit = self.fetch()?;
        if self.check_if_updatable(&fetch_commit)? {
            self.check_if_clean()?;
            self.fast_forward(&fetch_commit)?;
        }

        Ok(())
    }

    fn changed_paths(&self, before: &str, after: &str) -> Result<Vec<String>, GitError> {
        let failed = |_: git2::Error| {
            GitError::DiffFailed(shorthash(before).to_string(), shorthash(after).to_string())
        };

        let old_tree = self.find_tree(before).map_err(failed)?;
        let new_tree = self.find_tree(after).map_err(failed)?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .map_err(failed)?;

        let paths = diff
            .deltas()
            .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
            .map(|path| path.to_string_lossy().into_owned())
            .collect();

        Ok(paths)
    }
}
