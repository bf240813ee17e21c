use gumdrop::Options;
use reposmon::config::RawConfiguration;
use std::path::PathBuf;

/// Monitor a git repository and run a command when it changes.
#[derive(Debug, Options)]
pub struct Args {
    /// The url of the git repository to monitor.
    #[options(free)]
    pub repository_url: Option<String>,

    /// The command to run on changes, quote it if it has arguments.
    #[options(free)]
    pub command: Option<String>,

    /// Check the repository only once. Useful for cronjobs.
    #[options()]
    pub once: bool,

    /// Increase verbosity, can be set multiple times (-v debug, -vv tracing)
    #[options(count)]
    pub verbose: u8,

    /// Only print errors.
    #[options()]
    pub quiet: bool,

    /// The seconds to wait between two checks (default: 60).
    #[options(meta = "SECONDS")]
    pub interval: Option<u64>,

    /// The directory to clone the repository into (default: .).
    #[options(long = "gitfolder", meta = "DIR")]
    pub git_folder: Option<PathBuf>,

    /// The directory to run the command in (default: .).
    #[options(long = "cmdfolder", meta = "DIR")]
    pub cmd_folder: Option<PathBuf>,

    /// Load the configuration from a YAML file, the arguments override it.
    #[options(short = "l", meta = "FILE")]
    pub load: Option<PathBuf>,

    /// Write the configuration into a YAML file.
    #[options(short = "w", meta = "FILE")]
    pub write: Option<PathBuf>,

    /// Run the command after the first clone as well.
    #[options(no_short)]
    pub run_on_clone: bool,

    /// Print the current version.
    #[options(short = "V")]
    pub version: bool,

    /// Print this help.
    #[options()]
    pub help: bool,
}

impl Args {
    /// The configuration given on the command line, unset flags are left empty.
    pub fn to_raw(&self) -> RawConfiguration {
        RawConfiguration {
            repository_url: self.repository_url.clone(),
            command: self.command.clone(),
            git_folder: self.git_folder.clone(),
            cmd_folder: self.cmd_folder.clone(),
            interval: self.interval,
            once: self.once.then_some(true),
            verbose: (self.verbose > 0).then_some(true),
            run_on_clone: self.run_on_clone.then_some(true),
        }
    }
}

pub fn parse_args() -> Args {
    Args::parse_args_default_or_exit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_args_default(args).unwrap()
    }

    #[test]
    fn it_should_parse_the_positional_arguments() {
        let args = parse(&["git@github.com:erikdejonge/schema.git", "make build"]);
        let raw = args.to_raw();

        assert_eq!(
            Some(String::from("git@github.com:erikdejonge/schema.git")),
            raw.repository_url
        );
        assert_eq!(Some(String::from("make build")), raw.command);
        assert_eq!(None, raw.interval);
        assert_eq!(None, raw.once);
        assert_eq!(None, raw.verbose);
    }

    #[test]
    fn it_should_parse_the_options() {
        let args = parse(&[
            "-o", "-vv", "-i", "5", "-g", "/srv", "-c", "/tmp", "--run-on-clone", "repo.git",
            "make",
        ]);
        let raw = args.to_raw();

        assert_eq!(2, args.verbose);
        assert_eq!(Some(5), raw.interval);
        assert_eq!(Some(true), raw.once);
        assert_eq!(Some(true), raw.verbose);
        assert_eq!(Some(true), raw.run_on_clone);
        assert_eq!(Some(PathBuf::from("/srv")), raw.git_folder);
        assert_eq!(Some(PathBuf::from("/tmp")), raw.cmd_folder);
    }

    #[test]
    fn it_should_parse_the_configuration_files() {
        let args = parse(&["-l", "in.yml", "-w", "out.yml"]);

        assert_eq!(Some(PathBuf::from("in.yml")), args.load);
        assert_eq!(Some(PathBuf::from("out.yml")), args.write);
        assert_eq!(None, args.repository_url);
    }
}
