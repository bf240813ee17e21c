#![allow(dead_code)]

use duct::cmd;
use rand::distributions::{Alphanumeric, DistString};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

/// A new empty directory under `test_directories`, with an absolute path.
pub fn test_directory() -> Result<PathBuf, Box<dyn Error>> {
    let id = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
    let directory = PathBuf::from(format!("test_directories/{id}"));
    fs::create_dir_all(&directory)?;

    Ok(fs::canonicalize(directory)?)
}

/// Commit a new file in the work clone and push it.
pub fn commit(work: &Path, file: &str) -> Result<(), Box<dyn Error>> {
    fs::write(work.join(file), file)?;
    cmd!("git", "add", "-A").dir(work).read()?;
    cmd!(
        "git",
        "-c",
        "user.name=Test",
        "-c",
        "user.email=test@example.com",
        "commit",
        "-m",
        file
    )
    .dir(work)
    .read()?;
    cmd!("git", "push", "origin", "HEAD").dir(work).stderr_null().read()?;

    Ok(())
}

/// A bare `remote.git` with one commit and a `work` clone of it.
pub fn create_remote(directory: &Path) -> Result<(String, PathBuf), Box<dyn Error>> {
    let remote = directory.join("remote.git");
    let work = directory.join("work");
    cmd!("git", "init", "--bare", &remote).read()?;
    cmd!("git", "clone", &remote, &work).stderr_null().read()?;
    commit(&work, "1")?;

    let remote = fs::canonicalize(remote)?;
    Ok((remote.display().to_string(), work))
}

pub fn head(path: &Path) -> Result<String, Box<dyn Error>> {
    Ok(cmd!("git", "rev-parse", "HEAD").dir(path).read()?)
}
