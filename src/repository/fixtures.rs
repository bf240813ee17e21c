use duct::cmd;
use rand::distributions::{Alphanumeric, DistString};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

pub fn get_random_id() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), 16)
}

pub fn test_directory(id: &str) -> Result<PathBuf, Box<dyn Error>> {
    let directory = PathBuf::from(format!("test_directories/{id}"));
    fs::create_dir_all(&directory)?;

    Ok(directory)
}

fn commit_all(path: &Path, message: &str) -> Result<(), Box<dyn Error>> {
    cmd!("git", "add", "-A").dir(path).read()?;
    cmd!(
        "git",
        "-c",
        "user.name=reposmon",
        "-c",
        "user.email=reposmon@example.com",
        "commit",
        "-m",
        message
    )
    .dir(path)
    .read()?;

    Ok(())
}

/// Create a bare `remote.git` with one commit, pushed from a `work` clone next to it.
/// Returns the absolute path of the remote.
pub fn create_remote(directory: &Path) -> Result<String, Box<dyn Error>> {
    let remote = directory.join("remote.git");
    let work = directory.join("work");

    fs::create_dir(&remote)?;
    cmd!("git", "init", "--bare").dir(&remote).read()?;
    cmd!("git", "clone", &remote, &work).stderr_null().read()?;
    fs::write(work.join("1"), "1")?;
    commit_all(&work, "1")?;
    cmd!("git", "push", "origin", "HEAD").dir(&work).stderr_null().read()?;

    let remote = fs::canonicalize(remote)?;
    Ok(remote.to_string_lossy().into_owned())
}

/// Commit a new file in the `work` clone and push it to the remote.
pub fn push_change(directory: &Path, file: &str) -> Result<(), Box<dyn Error>> {
    let work = directory.join("work");

    fs::write(work.join(file), file)?;
    commit_all(&work, file)?;
    cmd!("git", "push", "origin", "HEAD").dir(&work).stderr_null().read()?;

    Ok(())
}

/// Commit a file in any checkout without pushing it.
pub fn commit_locally(path: &Path, file: &str, contents: &str) -> Result<(), Box<dyn Error>> {
    fs::write(path.join(file), contents)?;
    commit_all(path, file)
}

pub fn get_last_commit(path: &Path) -> Result<String, Box<dyn Error>> {
    let commit_sha = cmd!("git", "rev-parse", "HEAD").dir(path).read()?;

    Ok(commit_sha)
}

pub fn cleanup(directory: &Path) -> Result<(), Box<dyn Error>> {
    if directory.exists() {
        fs::remove_dir_all(directory)?;
    }

    Ok(())
}
