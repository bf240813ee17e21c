use crate::{
    repository::RepositoryState,
    start::Schedule,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Seconds between two polls, if it is not configured.
pub const DEFAULT_INTERVAL: u64 = 60;

/// A custom error describing the invalid configurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The repository url or the command is not given.
    #[error("the repository url and the command are required")]
    MissingArguments,
    /// The command only contains whitespace.
    #[error("the command cannot be empty")]
    EmptyCommand,
    /// The url doesn't look like a git remote.
    #[error("{0} is not a git repository url")]
    InvalidRepositoryUrl(String),
    /// One of the folders doesn't exist.
    #[error("the {0} {1} is not an existing directory")]
    FolderNotFound(&'static str, String),
    /// The interval is zero.
    #[error("the interval must be a positive number of seconds")]
    InvalidInterval,
    /// The configuration file cannot be read or written.
    #[error("cannot access {0}: {1}")]
    Io(String, std::io::Error),
    /// The configuration file is not valid YAML.
    #[error("cannot parse {0}: {1}")]
    Yaml(String, serde_yaml::Error),
}

/// The configuration as given by the user, every field is optional.
///
/// This is what the command line produces and what is saved into and loaded
/// from YAML files. Use [RawConfiguration::validate] to get a [Configuration].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub once: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_clone: Option<bool>,
}

fn is_repository_url(url: &str) -> bool {
    const SCHEMES: [&str; 5] = ["ssh://", "git://", "http://", "https://", "file://"];

    let is_scp_like = url
        .split_once(':')
        .map(|(host, path)| host.contains('@') && !host.contains('/') && !path.is_empty())
        .unwrap_or(false);

    url.trim_end_matches('/').ends_with(".git")
        || SCHEMES.iter().any(|scheme| url.starts_with(scheme))
        || is_scp_like
}

fn existing_folder(name: &'static str, folder: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    let folder = folder.unwrap_or_else(|| PathBuf::from("."));
    if folder.is_dir() {
        Ok(folder)
    } else {
        Err(ConfigError::FolderNotFound(
            name,
            folder.display().to_string(),
        ))
    }
}

impl RawConfiguration {
    /// Load the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err))?;

        serde_yaml::from_str(&contents)
            .map_err(|err| ConfigError::Yaml(path.display().to_string(), err))
    }

    /// Save the configuration into a YAML file, overwriting it.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|err| ConfigError::Yaml(path.display().to_string(), err))?;

        fs::write(path, yaml).map_err(|err| ConfigError::Io(path.display().to_string(), err))
    }

    /// Fill the missing fields from the fallback.
    pub fn or(self, fallback: RawConfiguration) -> Self {
        RawConfiguration {
            repository_url: self.repository_url.or(fallback.repository_url),
            command: self.command.or(fallback.command),
            git_folder: self.git_folder.or(fallback.git_folder),
            cmd_folder: self.cmd_folder.or(fallback.cmd_folder),
            interval: self.interval.or(fallback.interval),
            once: self.once.or(fallback.once),
            verbose: self.verbose.or(fallback.verbose),
            run_on_clone: self.run_on_clone.or(fallback.run_on_clone),
        }
    }

    /// Check the configuration and fill the defaults.
    pub fn validate(self) -> Result<Configuration, ConfigError> {
        let (repository_url, command) = match (self.repository_url, self.command) {
            (Some(repository_url), Some(command)) => (repository_url, command),
            _ => return Err(ConfigError::MissingArguments),
        };

        if command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        if !is_repository_url(&repository_url) {
            return Err(ConfigError::InvalidRepositoryUrl(repository_url));
        }

        let interval = self.interval.unwrap_or(DEFAULT_INTERVAL);
        if interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        let git_folder = existing_folder("git folder", self.git_folder)?;
        let cmd_folder = existing_folder("command folder", self.cmd_folder)?;
        let repository_state = RepositoryState::new(&git_folder, &repository_url)
            .ok_or_else(|| ConfigError::InvalidRepositoryUrl(repository_url.clone()))?;

        Ok(Configuration {
            git_folder,
            cmd_folder,
            repository_url,
            repository_state,
            command,
            interval,
            once: self.once.unwrap_or(false),
            verbose: self.verbose.unwrap_or(false),
            run_on_clone: self.run_on_clone.unwrap_or(false),
        })
    }
}

/// The validated configuration of a run, it doesn't change while running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub repository_url: String,
    pub command: String,
    pub git_folder: PathBuf,
    pub cmd_folder: PathBuf,
    /// Seconds between the polls.
    pub interval: u64,
    pub once: bool,
    pub verbose: bool,
    pub run_on_clone: bool,
    repository_state: RepositoryState,
}

impl Configuration {
    /// The checkout inside the git folder, named after the repository.
    pub fn repository_state(&self) -> RepositoryState {
        self.repository_state.clone()
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            interval: Duration::from_secs(self.interval),
            once: self.once,
            run_on_clone: self.run_on_clone,
        }
    }
}

impl From<&Configuration> for RawConfiguration {
    fn from(configuration: &Configuration) -> Self {
        RawConfiguration {
            repository_url: Some(configuration.repository_url.clone()),
            command: Some(configuration.command.clone()),
            git_folder: Some(configuration.git_folder.clone()),
            cmd_folder: Some(configuration.cmd_folder.clone()),
            interval: Some(configuration.interval),
            once: Some(configuration.once),
            verbose: Some(configuration.verbose),
            run_on_clone: Some(configuration.run_on_clone),
        }
    }
}
